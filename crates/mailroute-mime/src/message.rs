//! MIME message structure and multipart parsing.

use crate::content_type::ContentType;
use crate::encoding::{bytes_to_string, decode_base64, decode_quoted_printable};
use crate::header::Headers;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

/// One node of a MIME message tree.
///
/// A part is either a leaf with a raw body or a container with child
/// parts (multipart types). Parsing never fails: a multipart entity
/// with a missing or unmatched boundary degrades to a leaf holding the
/// raw body bytes.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Raw (still transfer-encoded) body for leaf parts.
    pub body: Vec<u8>,
    /// Child parts for multipart containers.
    pub children: Vec<Part>,
}

impl Part {
    /// Parses a MIME entity (headers + body) from raw bytes,
    /// recursing into multipart bodies.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (headers, body_start) = Headers::parse(raw);
        let body = raw.get(body_start..).unwrap_or_default();
        let content_type = headers
            .get("content-type")
            .map_or_else(ContentType::text_plain, ContentType::parse);

        if content_type.is_multipart() {
            if let Some(boundary) = content_type.boundary() {
                let children = split_multipart(body, boundary)
                    .into_iter()
                    .map(|chunk| Self::parse(chunk))
                    .collect::<Vec<_>>();
                if !children.is_empty() {
                    return Self {
                        headers,
                        body: Vec::new(),
                        children,
                    };
                }
            }
        }

        Self {
            headers,
            body: body.to_vec(),
            children: Vec::new(),
        }
    }

    /// Gets the content type, defaulting to `text/plain`.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .map_or_else(ContentType::text_plain, ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// Base64 bodies that fail to decode fall back to the raw bytes.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                let body_str = String::from_utf8_lossy(&self.body);
                decode_base64(&body_str).unwrap_or_else(|_| self.body.clone())
            }
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Gets the decoded body as text, honouring the declared charset.
    #[must_use]
    pub fn body_text(&self) -> String {
        let decoded = self.decode_body();
        bytes_to_string(&decoded, self.content_type().charset())
    }

    /// Depth-first search for the first leaf matching `main/sub`.
    #[must_use]
    pub fn find(&self, main: &str, sub: &str) -> Option<&Self> {
        if self.children.is_empty() {
            return self.content_type().is(main, sub).then_some(self);
        }
        self.children.iter().find_map(|c| c.find(main, sub))
    }

    /// Iterates over all leaf parts, depth-first.
    pub fn leaves(&self) -> Box<dyn Iterator<Item = &Self> + '_> {
        if self.children.is_empty() {
            Box::new(std::iter::once(self))
        } else {
            Box::new(self.children.iter().flat_map(Self::leaves))
        }
    }

    /// Returns the filename from Content-Disposition or Content-Type
    /// parameters, if any.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        if let Some(disposition) = self.headers.get("content-disposition") {
            for segment in disposition.split(';').skip(1) {
                if let Some((name, val)) = segment.split_once('=') {
                    if name.trim().eq_ignore_ascii_case("filename") {
                        return Some(val.trim().trim_matches('"').to_string());
                    }
                }
            }
        }
        self.content_type().params.get("name").cloned()
    }

    /// Whether this leaf is an attachment rather than body content.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if let Some(disposition) = self.headers.get("content-disposition") {
            let kind = disposition
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_lowercase();
            if kind == "attachment" {
                return true;
            }
        }
        // Inline images count as attachments for recovery purposes
        self.content_type().main_type == "image"
    }
}

/// Splits a multipart body into chunks between boundary delimiters.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delim = format!("--{boundary}");
    let delim = delim.as_bytes();
    let mut chunks = Vec::new();
    let mut cursor = 0;
    let mut chunk_start: Option<usize> = None;

    while let Some(hit) = find_slice(&body[cursor..], delim) {
        let line_start = cursor + hit;
        let after = line_start + delim.len();

        if let Some(start) = chunk_start {
            // Chunk ends just before the boundary line's CRLF
            let mut end = line_start;
            if end >= 1 && body[end - 1] == b'\n' {
                end -= 1;
                if end >= 1 && body[end - 1] == b'\r' {
                    end -= 1;
                }
            }
            if end > start {
                chunks.push(&body[start..end]);
            }
        }

        // Closing delimiter?
        if body.get(after..after + 2).is_some_and(|s| s == b"--") {
            chunk_start = None;
            break;
        }

        // Skip to the start of the next line
        let mut next = after;
        while next < body.len() && body[next] != b'\n' {
            next += 1;
        }
        next = (next + 1).min(body.len());
        chunk_start = Some(next);
        cursor = next;
    }

    // Unterminated multipart: take the trailing chunk as-is
    if let Some(start) = chunk_start {
        if start < body.len() {
            chunks.push(&body[start..]);
        }
    }

    chunks
}

fn find_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
