//! Header block parsing.

use crate::encoding::decode_rfc2047;
use std::collections::HashMap;

/// Case-insensitive collection of message headers.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .entry(name.into().to_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets the first value for a header with RFC 2047 encoded-words
    /// decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns whether a header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_lowercase())
    }

    /// Returns an iterator over all `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses a raw header block, returning the headers and the byte
    /// offset of the body (past the blank separator line).
    ///
    /// Tolerates missing terminators, bare-LF line endings and
    /// malformed lines; a line without a colon is skipped rather than
    /// rejected.
    #[must_use]
    pub fn parse(raw: &[u8]) -> (Self, usize) {
        let mut headers = Self::new();
        let mut current_name: Option<String> = None;
        let mut current_value = String::new();
        let mut pos = 0;

        while pos < raw.len() {
            let line_end = find_line_end(raw, pos);
            let line = &raw[pos..line_end.0];

            if line.is_empty() {
                // Blank line terminates the header block
                pos = line_end.1;
                break;
            }

            if line[0] == b' ' || line[0] == b'\t' {
                // Continuation line
                if current_name.is_some() {
                    current_value.push(' ');
                    current_value.push_str(String::from_utf8_lossy(line).trim());
                }
            } else {
                if let Some(name) = current_name.take() {
                    headers.add(name, current_value.trim().to_string());
                    current_value.clear();
                }
                let text = String::from_utf8_lossy(line);
                if let Some((name, value)) = text.split_once(':') {
                    current_name = Some(name.trim().to_string());
                    current_value = value.trim().to_string();
                }
            }

            pos = line_end.1;
        }

        if let Some(name) = current_name {
            headers.add(name, current_value.trim().to_string());
        }

        (headers, pos)
    }
}

/// Returns (end of line content, start of next line) for the line
/// beginning at `pos`. Handles CRLF and bare LF.
fn find_line_end(raw: &[u8], pos: usize) -> (usize, usize) {
    let mut i = pos;
    while i < raw.len() {
        if raw[i] == b'\n' {
            let content_end = if i > pos && raw[i - 1] == b'\r' {
                i - 1
            } else {
                i
            };
            return (content_end, i + 1);
        }
        i += 1;
    }
    (raw.len(), raw.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_headers() {
        let raw = b"From: sender@example.com\r\nSubject: Hello\r\n\r\nbody";
        let (headers, body_start) = Headers::parse(raw);
        assert_eq!(headers.get("from"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Hello"));
        assert_eq!(&raw[body_start..], b"body");
    }

    #[test]
    fn test_parse_continuation_line() {
        let raw = b"Content-Type: multipart/mixed;\r\n boundary=abc\r\n\r\n";
        let (headers, _) = Headers::parse(raw);
        assert_eq!(
            headers.get("content-type"),
            Some("multipart/mixed; boundary=abc")
        );
    }

    #[test]
    fn test_parse_bare_lf() {
        let raw = b"Subject: test\nTo: a@b.com\n\nbody";
        let (headers, body_start) = Headers::parse(raw);
        assert_eq!(headers.get("subject"), Some("test"));
        assert_eq!(&raw[body_start..], b"body");
    }

    #[test]
    fn test_parse_no_body_separator() {
        let raw = b"Subject: dangling";
        let (headers, body_start) = Headers::parse(raw);
        assert_eq!(headers.get("subject"), Some("dangling"));
        assert_eq!(body_start, raw.len());
    }

    #[test]
    fn test_line_without_colon_skipped() {
        let raw = b"garbage line\r\nSubject: ok\r\n\r\n";
        let (headers, _) = Headers::parse(raw);
        assert_eq!(headers.get("subject"), Some("ok"));
    }

    #[test]
    fn test_get_decoded() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?T0ZGRVI=?=");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("OFFER"));
    }

    #[test]
    fn test_multi_value_header() {
        let mut headers = Headers::new();
        headers.add("Received", "one");
        headers.add("Received", "two");
        assert_eq!(headers.get_all("received").len(), 2);
        assert_eq!(headers.get("received"), Some("one"));
    }
}
