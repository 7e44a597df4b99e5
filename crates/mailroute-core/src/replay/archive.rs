//! Versioned JSON archive entries.
//!
//! Version 1 carries the envelope, raw mail and recorded outcome;
//! version 2 adds the moderation fields used to explain mismatches.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::outcome::RoutingOutcome;
use crate::{Error, Result};

/// SMTP envelope as captured at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// MAIL FROM.
    pub from: String,
    /// RCPT TO.
    pub to: String,
}

/// What the historical system recorded for this message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyResult {
    /// Outcome name in the historical system's vocabulary.
    pub routing_outcome: String,
    /// Message row id the historical system stored, null when it
    /// stored nothing (duplicate or parse failure at capture time).
    pub message_id: Option<i64>,
    /// Sending user as the historical system resolved it.
    pub user_id: Option<i64>,
    /// Subject at capture time.
    pub subject: Option<String>,
    /// Posting-status override in effect (v2).
    #[serde(default)]
    pub our_posting_status: Option<String>,
    /// Sender's membership role (v2).
    #[serde(default)]
    pub membership_role: Option<String>,
    /// Group moderation default (v2).
    #[serde(default)]
    pub group_moderated: Option<bool>,
    /// Whether an override decided the outcome (v2).
    #[serde(default)]
    pub override_moderation: Option<bool>,
}

/// One captured message plus its historical outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Format version; 1 and 2 are understood.
    pub version: u32,
    /// Capture timestamp, RFC 3339.
    pub timestamp: String,
    /// SMTP envelope.
    pub envelope: Envelope,
    /// Raw message bytes, base64.
    pub raw_email: String,
    /// Historical routing result.
    pub legacy_result: LegacyResult,
}

/// Highest archive version this reader understands.
pub const MAX_SUPPORTED_VERSION: u32 = 2;

impl ArchiveEntry {
    /// Parses one entry from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or an unsupported version.
    pub fn from_json(json: &str) -> Result<Self> {
        let entry: Self =
            serde_json::from_str(json).map_err(|e| Error::Archive(e.to_string()))?;
        if entry.version == 0 || entry.version > MAX_SUPPORTED_VERSION {
            return Err(Error::Archive(format!(
                "unsupported archive version {}",
                entry.version
            )));
        }
        Ok(entry)
    }

    /// Decodes the captured raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64 payload is malformed.
    pub fn decode_raw(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.raw_email.trim())
            .map_err(|e| Error::Archive(format!("raw_email: {e}")))
    }

    /// The historical outcome translated into the current vocabulary.
    ///
    /// Returns `None` for outcome names with no current counterpart.
    #[must_use]
    pub fn legacy_outcome(&self) -> Option<RoutingOutcome> {
        translate_legacy_outcome(&self.legacy_result.routing_outcome)
    }

    /// Whether the historical system stored nothing for this message
    /// (duplicate or parse failure at capture time). Such entries are
    /// accepted as ground truth with no comparison.
    #[must_use]
    pub const fn nothing_stored(&self) -> bool {
        self.legacy_result.message_id.is_none()
    }
}

/// Fixed translation from historical outcome names to current ones.
fn translate_legacy_outcome(name: &str) -> Option<RoutingOutcome> {
    match name {
        // Renamed between systems
        "ReadReceipt" => Some(RoutingOutcome::Receipt),
        other => RoutingOutcome::parse(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry_json(version: u32, outcome: &str, message_id: Option<i64>) -> String {
        let raw = BASE64.encode(b"From: a@example.com\r\n\r\nhello\r\n");
        let message_id = message_id.map_or("null".to_string(), |id| id.to_string());
        format!(
            r#"{{
                "version": {version},
                "timestamp": "2024-01-31T12:00:00Z",
                "envelope": {{"from": "a@example.com", "to": "bristol@groups.example.org"}},
                "raw_email": "{raw}",
                "legacy_result": {{
                    "routing_outcome": "{outcome}",
                    "message_id": {message_id},
                    "user_id": 42,
                    "subject": "OFFER: Chair (Bristol)"
                }}
            }}"#
        )
    }

    #[test]
    fn test_v1_entry_parses() {
        let entry = ArchiveEntry::from_json(&entry_json(1, "Approved", Some(7))).unwrap();
        assert_eq!(entry.legacy_outcome(), Some(RoutingOutcome::Approved));
        assert!(!entry.nothing_stored());
        assert!(entry.decode_raw().unwrap().starts_with(b"From:"));
        assert!(entry.legacy_result.our_posting_status.is_none());
    }

    #[test]
    fn test_v2_fields() {
        let json = entry_json(2, "Pending", Some(7)).replace(
            r#""subject": "OFFER: Chair (Bristol)""#,
            r#""subject": "x", "our_posting_status": "MODERATED", "membership_role": "Member", "group_moderated": true, "override_moderation": true"#,
        );
        let entry = ArchiveEntry::from_json(&json).unwrap();
        assert_eq!(entry.legacy_result.our_posting_status.as_deref(), Some("MODERATED"));
        assert_eq!(entry.legacy_result.group_moderated, Some(true));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        assert!(ArchiveEntry::from_json(&entry_json(3, "Approved", Some(7))).is_err());
        assert!(ArchiveEntry::from_json(&entry_json(0, "Approved", Some(7))).is_err());
    }

    #[test]
    fn test_legacy_read_receipt_translation() {
        let entry = ArchiveEntry::from_json(&entry_json(1, "ReadReceipt", Some(7))).unwrap();
        assert_eq!(entry.legacy_outcome(), Some(RoutingOutcome::Receipt));
    }

    #[test]
    fn test_nothing_stored() {
        let entry = ArchiveEntry::from_json(&entry_json(1, "Approved", None)).unwrap();
        assert!(entry.nothing_stored());
    }
}
