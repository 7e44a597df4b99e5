//! Error types for MIME decoding.

/// Result type alias for MIME decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME decoding error types.
///
/// These surface only from the low-level decoding helpers. The
/// top-level [`crate::ParsedMail::parse`] is total and maps any of
/// them to a best-effort fallback instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
