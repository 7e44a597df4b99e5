//! Users, groups and memberships.
//!
//! Read-mostly inputs to the router, plus the membership mutations the
//! subscribe/unsubscribe and digest-off commands perform.

mod model;
mod repository;

pub use model::{Group, Membership, PostingStatus, Role, UserEmail};
pub use repository::MembershipRepository;
