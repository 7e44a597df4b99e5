//! Replay of archived historical traffic against the live router.
//!
//! The acceptance test for any routing change: feed captured
//! (message, recorded outcome) pairs through the parser and router in
//! dry-run and compare decisions, with no database mutation.

mod archive;
mod harness;

pub use archive::{ArchiveEntry, Envelope, LegacyResult};
pub use harness::{ReplayHarness, ReplayOptions, ReplayRecord, ReplayStats, ReplayStatus};
