//! Bounce ledger data model.

use chrono::{DateTime, Utc};

/// One entry in the append-only bounce ledger, keyed by the email row
/// the failure was reported against.
#[derive(Debug, Clone)]
pub struct BounceRecord {
    /// Email row the bounce was recorded against.
    pub email_id: i64,
    /// When the bounce arrived.
    pub date: DateTime<Utc>,
    /// Diagnostic text from the failure report.
    pub diagnostic: String,
    /// Permanent failures count towards suspension; transient ones
    /// are informational.
    pub permanent: bool,
    /// Set when a later successful delivery resolved this record.
    pub reset: bool,
}

impl BounceRecord {
    /// Creates a new unresolved record dated now.
    #[must_use]
    pub fn new(email_id: i64, diagnostic: impl Into<String>, permanent: bool) -> Self {
        Self {
            email_id,
            date: Utc::now(),
            diagnostic: diagnostic.into(),
            permanent,
            reset: false,
        }
    }
}
