//! Content-Type header parsing.

use std::collections::HashMap;

/// Parsed Content-Type header with parameters.
#[derive(Debug, Clone)]
pub struct ContentType {
    /// Main type (e.g. "text", "multipart").
    pub main_type: String,
    /// Sub type (e.g. "plain", "alternative").
    pub sub_type: String,
    /// Parameters keyed by lowercase name (boundary, charset, name).
    pub params: HashMap<String, String>,
}

impl ContentType {
    /// The default content type when no header is present.
    #[must_use]
    pub fn text_plain() -> Self {
        Self {
            main_type: "text".into(),
            sub_type: "plain".into(),
            params: HashMap::new(),
        }
    }

    /// Parses a Content-Type header value.
    ///
    /// Lenient: a value without a slash parses as `<value>/plain`, and
    /// malformed parameters are skipped.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut segments = value.split(';');
        let mime = segments.next().unwrap_or("").trim().to_lowercase();

        let (main_type, sub_type) = mime
            .split_once('/')
            .map_or_else(|| (mime.clone(), "plain".to_string()), |(m, s)| {
                (m.to_string(), s.to_string())
            });

        let mut params = HashMap::new();
        for segment in segments {
            if let Some((name, val)) = segment.split_once('=') {
                let name = name.trim().to_lowercase();
                let val = val.trim().trim_matches('"').to_string();
                params.insert(name, val);
            }
        }

        Self {
            main_type,
            sub_type,
            params,
        }
    }

    /// Returns the boundary parameter for multipart types.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.params.get("boundary").map(String::as_str)
    }

    /// Returns the charset parameter.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.params.get("charset").map(String::as_str)
    }

    /// Whether this is a multipart type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Whether this matches the given `main/sub` pair.
    #[must_use]
    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main_type == main && self.sub_type == sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_params() {
        let ct = ContentType::parse("text/html; charset=\"UTF-8\"");
        assert!(ct.is("text", "html"));
        assert_eq!(ct.charset(), Some("UTF-8"));
    }

    #[test]
    fn test_parse_multipart_boundary() {
        let ct = ContentType::parse("multipart/report; report-type=delivery-status; boundary=ABC123");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("ABC123"));
        assert_eq!(ct.params.get("report-type").map(String::as_str), Some("delivery-status"));
    }

    #[test]
    fn test_parse_case_insensitive_type() {
        let ct = ContentType::parse("Text/PLAIN");
        assert!(ct.is("text", "plain"));
    }

    #[test]
    fn test_parse_missing_slash() {
        let ct = ContentType::parse("text");
        assert!(ct.is("text", "plain"));
    }
}
