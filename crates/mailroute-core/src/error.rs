//! Error types for the routing core.

use thiserror::Error;

/// Errors that can occur in routing operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unsupported archive entry.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error represents a transient infrastructure fault
    /// the MTA should retry (exit 75).
    ///
    /// The set is deliberately closed: connection refused/timed out,
    /// too many connections, deadlock and lock-wait faults. Everything
    /// else is absorbed at the entry boundary and reported as handled,
    /// so unrecoverable input can never produce an infinite retry loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let Self::Database(err) = self else {
            return false;
        };

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
            sqlx::Error::Database(db) => {
                // MySQL 2002/2006/1040/1205/1213 equivalents
                if let Some(code) = db.code() {
                    if matches!(code.as_ref(), "1040" | "1205" | "1213" | "2002" | "2006") {
                        return true;
                    }
                }
                let message = db.message().to_lowercase();
                message.contains("database is locked")
                    || message.contains("deadlock")
                    || message.contains("connection refused")
                    || message.contains("too many connections")
                    || message.contains("timed out")
            }
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code telling the MTA the message was handled; no retry.
pub const EX_OK: i32 = 0;

/// Exit code telling the MTA to retry later (sysexits EX_TEMPFAIL).
pub const EX_TEMPFAIL: i32 = 75;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_config_error_is_not_transient() {
        assert!(!Error::Config("bad".into()).is_transient());
    }
}
