//! Append-only bounce ledger and the delivery-suspension policy.

mod model;
mod repository;

pub use model::BounceRecord;
pub use repository::BounceLedger;
