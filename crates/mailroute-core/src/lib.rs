//! Core routing engine for incoming community-exchange mail.
//!
//! Every inbound message is parsed, classified by recipient address,
//! and driven to exactly one terminal [`RoutingOutcome`] with
//! at-most-once storage. The same pipeline runs in dry-run under the
//! replay harness to check parity against archived traffic.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
pub mod bounce;
pub mod chat;
pub mod config;
mod error;
pub mod ledger;
pub mod membership;
pub mod message;
pub mod outcome;
pub mod replay;
pub mod router;
pub mod spam;
pub mod store;

pub use config::RouterConfig;
pub use error::{EX_OK, EX_TEMPFAIL, Error, Result};
pub use outcome::{RoutingContext, RoutingDecision, RoutingOutcome};
pub use router::RoutingEngine;
pub use store::Store;
