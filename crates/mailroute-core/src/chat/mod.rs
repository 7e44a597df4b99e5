//! Chat rooms, rosters, and handover arrangements.

mod model;
mod repository;

pub use model::{ChatRoom, ChatType, Tryst, TrystResponse};
pub use repository::{ChatRepository, TrystRepository};
