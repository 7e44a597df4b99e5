//! MIME decoding utilities.
//!
//! Base64, Quoted-Printable, RFC 2047 encoded-words and charset
//! conversion. Decoders are lenient: malformed input degrades to the
//! closest readable text rather than failing, because the callers sit
//! behind a parser that must never propagate an error.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes Base64 data.
///
/// Whitespace is stripped before decoding for lenient handling of
/// line-wrapped bodies.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64 after whitespace
/// removal.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable bytes (RFC 2045).
///
/// Invalid escape sequences are passed through literally instead of
/// failing; real-world bounce bodies contain bare `=` characters.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if b == b'=' {
            // Soft line break: =\r\n or =\n
            if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
                i += 3;
                continue;
            }
            if data.get(i + 1) == Some(&b'\n') {
                i += 2;
                continue;
            }
            // Hex escape
            if let (Some(&h), Some(&l)) = (data.get(i + 1), data.get(i + 2)) {
                if let (Some(hi), Some(lo)) = (hex_val(h), hex_val(l)) {
                    out.push(hi * 16 + lo);
                    i += 3;
                    continue;
                }
            }
            // Malformed escape, keep the literal byte
            out.push(b);
            i += 1;
        } else if b == b'_' {
            // RFC 2047 Q-encoding uses underscore for space; plain QP
            // bodies never contain meaningful underscores-as-space, so
            // this substitution is applied only by the header decoder.
            out.push(b);
            i += 1;
        } else {
            out.push(b);
            i += 1;
        }
    }

    out
}

const fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Converts decoded bytes to a `String` honouring a MIME charset label.
///
/// UTF-8 (and unknown charsets) decode lossily; Latin-1 family
/// charsets map bytes directly to code points.
#[must_use]
pub fn bytes_to_string(bytes: &[u8], charset: Option<&str>) -> String {
    let charset = charset.map(str::to_lowercase);
    match charset.as_deref() {
        Some("iso-8859-1" | "latin1" | "windows-1252" | "us-ascii") => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes RFC 2047 encoded-words in a header value.
///
/// Handles `=?charset?B?...?=` and `=?charset?Q?...?=` tokens anywhere
/// in the value; undecodable tokens are left verbatim.
#[must_use]
pub fn decode_rfc2047(value: &str) -> String {
    let mut out = String::new();
    let mut rest = value;

    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let token = &rest[start..];
        match decode_encoded_word(token) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &token[consumed..];
                // Whitespace between adjacent encoded-words is elided
                let trimmed = rest.trim_start();
                if trimmed.starts_with("=?") {
                    rest = trimmed;
                }
            }
            None => {
                out.push_str("=?");
                rest = &token[2..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decodes a single leading encoded-word, returning the text and the
/// number of bytes consumed.
fn decode_encoded_word(token: &str) -> Option<(String, usize)> {
    // =?charset?enc?payload?=
    let inner = token.strip_prefix("=?")?;
    let (charset, rest) = inner.split_once('?')?;
    let (enc, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let payload = &rest[..end];
    let consumed = 2 + charset.len() + 1 + enc.len() + 1 + end + 2;

    let bytes = match enc {
        "B" | "b" => decode_base64(payload).ok()?,
        "Q" | "q" => {
            let spaced = payload.replace('_', " ");
            decode_quoted_printable(spaced.as_bytes())
        }
        _ => return None,
    };

    Some((bytes_to_string(&bytes, Some(charset)), consumed))
}
