//! Envelope-aware view over a parsed message.
//!
//! [`ParsedMail::parse`] is the single entry point the routing layer
//! uses. It is total: arbitrary bytes (including empty input) produce
//! a `ParsedMail`; absent or malformed pieces surface as `None`.

use crate::header::Headers;
use crate::message::Part;

/// Metadata for one attachment part.
#[derive(Debug, Clone)]
pub struct AttachmentInfo {
    /// Declared filename, if any.
    pub filename: Option<String>,
    /// Content type as `main/sub`.
    pub content_type: String,
    /// Decoded size in bytes.
    pub size: usize,
}

/// Delivery-status fields extracted from a DSN-shaped message.
#[derive(Debug, Clone, Default)]
pub struct DsnInfo {
    /// Final-Recipient / Original-Recipient address.
    pub recipient: Option<String>,
    /// Status field (`5.1.1` style).
    pub status: Option<String>,
    /// Diagnostic-Code value.
    pub diagnostic: Option<String>,
}

/// A fully parsed incoming message plus its SMTP envelope.
///
/// Immutable once produced.
#[derive(Debug, Clone)]
pub struct ParsedMail {
    /// Raw message bytes as delivered.
    pub raw: Vec<u8>,
    /// SMTP envelope sender (MAIL FROM).
    pub envelope_from: String,
    /// SMTP envelope recipient (RCPT TO).
    pub envelope_to: String,
    /// Decoded Subject header.
    pub subject: Option<String>,
    /// Address from the From header.
    pub from_address: Option<String>,
    /// Display name from the From header.
    pub from_name: Option<String>,
    /// Message-ID with angle brackets stripped.
    pub message_id: Option<String>,
    /// First text/plain body, decoded, with provider-injected image
    /// links stripped out.
    pub text_body: Option<String>,
    /// First text/html body, decoded.
    pub html_body: Option<String>,
    /// Image links stripped from the text body, kept for recovery.
    pub stripped_image_links: Vec<String>,
    /// Attachment metadata.
    pub attachments: Vec<AttachmentInfo>,
    /// Delivery-status fields when the message is DSN-shaped.
    pub dsn: DsnInfo,
    /// Full header map of the top-level entity.
    pub headers: Headers,
}

impl ParsedMail {
    /// Parses raw bytes plus the SMTP envelope.
    #[must_use]
    pub fn parse(raw: &[u8], envelope_from: &str, envelope_to: &str) -> Self {
        let root = Part::parse(raw);
        let headers = root.headers.clone();

        let subject = headers.get_decoded("subject").filter(|s| !s.is_empty());
        let (from_address, from_name) = headers
            .get_decoded("from")
            .map_or((None, None), |v| parse_address(&v));
        let message_id = headers
            .get("message-id")
            .map(|v| v.trim().trim_matches(['<', '>']).to_string())
            .filter(|v| !v.is_empty());

        let raw_text = root.find("text", "plain").map(Part::body_text);
        let html_body = root.find("text", "html").map(Part::body_text);

        let (text_body, stripped_image_links) = match raw_text {
            Some(text) => {
                let (stripped, links) = strip_provider_image_links(&text);
                (Some(stripped), links)
            }
            None => (None, Vec::new()),
        };

        let attachments = root
            .leaves()
            .filter(|p| p.is_attachment())
            .map(|p| {
                let ct = p.content_type();
                AttachmentInfo {
                    filename: p.filename(),
                    content_type: format!("{}/{}", ct.main_type, ct.sub_type),
                    size: p.decode_body().len(),
                }
            })
            .collect();

        let dsn = extract_dsn(&root, envelope_from);

        Self {
            raw: raw.to_vec(),
            envelope_from: envelope_from.to_string(),
            envelope_to: envelope_to.to_string(),
            subject,
            from_address,
            from_name,
            message_id,
            text_body,
            html_body,
            stripped_image_links,
            attachments,
            dsn,
            headers,
        }
    }

    /// Whether the message carries any parsed content at all.
    ///
    /// Empty input or a byte soup with no recognisable headers and no
    /// body yields an unusable message which the router maps to a
    /// terminal failure outcome.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.headers.iter().next().is_some()
            || self.text_body.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the message declares itself automated (RFC 3834).
    #[must_use]
    pub fn is_auto_submitted(&self) -> bool {
        self.headers
            .get("auto-submitted")
            .is_some_and(|v| !v.trim().eq_ignore_ascii_case("no"))
    }

    /// Whether the message looks like a DSN based on structure or the
    /// conventional mailer-daemon envelope sender.
    #[must_use]
    pub fn is_dsn_shaped(&self) -> bool {
        self.dsn.recipient.is_some() || self.dsn.status.is_some()
    }

    /// The text body, falling back to a crudely de-tagged HTML body
    /// for HTML-only senders.
    #[must_use]
    pub fn effective_text(&self) -> Option<String> {
        if let Some(text) = &self.text_body {
            if !text.trim().is_empty() {
                return Some(text.clone());
            }
        }
        self.html_body.as_deref().map(html_to_text)
    }
}

/// Parses `Name <addr>` / `addr` forms into (address, display name).
fn parse_address(value: &str) -> (Option<String>, Option<String>) {
    let value = value.trim();
    if let (Some(open), Some(close)) = (value.rfind('<'), value.rfind('>')) {
        if open < close {
            let addr = value[open + 1..close].trim().to_lowercase();
            let name = value[..open].trim().trim_matches('"').to_string();
            let addr = (!addr.is_empty()).then_some(addr);
            let name = (!name.is_empty()).then_some(name);
            return (addr, name);
        }
    }
    if value.contains('@') {
        (Some(value.to_lowercase()), None)
    } else {
        (None, None)
    }
}

/// Hosts whose image links get injected into text bodies by partner
/// platforms; the links are stripped and retained for image recovery.
const PROVIDER_IMAGE_HOSTS: &[&str] = &[
    "trashnothing.com/img",
    "trashnothing.com/pics",
    "googleusercontent.com",
    "img.gumtree.com",
];

fn strip_provider_image_links(text: &str) -> (String, Vec<String>) {
    let mut links = Vec::new();
    let mut kept = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        let is_injected = trimmed.starts_with("http")
            && !trimmed.contains(' ')
            && PROVIDER_IMAGE_HOSTS.iter().any(|h| trimmed.contains(h));
        if is_injected {
            links.push(trimmed.to_string());
        } else {
            kept.push(line);
        }
    }

    (kept.join("\n"), links)
}

/// Very small HTML-to-text conversion for HTML-only messages: strips
/// tags, decodes the handful of entities that matter for chat bodies.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .trim()
        .to_string()
}

/// Pulls Final-Recipient / Status / Diagnostic-Code out of a
/// message/delivery-status part, with header fallbacks for
/// non-compliant bounces.
fn extract_dsn(root: &Part, envelope_from: &str) -> DsnInfo {
    let from_daemon = envelope_from.to_lowercase().contains("mailer-daemon");
    let ct = root.content_type();
    let is_report = ct.is("multipart", "report");

    if !from_daemon && !is_report {
        return DsnInfo::default();
    }

    let mut info = DsnInfo::default();

    for leaf in root.leaves() {
        if leaf.content_type().is("message", "delivery-status") {
            let content = leaf.body_text();
            for line in content.lines() {
                let Some((name, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match name.trim().to_lowercase().as_str() {
                    "final-recipient" | "original-recipient" if info.recipient.is_none() => {
                        let addr = value
                            .trim_start_matches("rfc822;")
                            .trim_start_matches("RFC822;")
                            .trim();
                        info.recipient = Some(addr.to_lowercase());
                    }
                    "status" if info.status.is_none() => {
                        info.status = Some(value.to_string());
                    }
                    "diagnostic-code" if info.diagnostic.is_none() => {
                        let diag = value.trim_start_matches("smtp;").trim();
                        info.diagnostic = Some(diag.to_string());
                    }
                    _ => {}
                }
            }
            break;
        }
    }

    info
}
