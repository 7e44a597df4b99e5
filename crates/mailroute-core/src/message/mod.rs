//! Stored messages: group posts and chat-bound mail.
//!
//! All writes for one routing decision commit in a single
//! transaction, so a visible post always carries its group
//! association and history record.

mod model;
mod repository;

pub use model::{Collection, NewChatEmail, NewPost, StoredMessage};
pub use repository::MessageRepository;
