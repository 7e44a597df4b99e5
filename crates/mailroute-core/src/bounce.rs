//! Bounce detection and permanence classification.
//!
//! Structured DSN parts are trusted outright. For everything else the
//! body text must contain at least two known bounce markers before we
//! call it a bounce, which keeps forwarded bounce discussions from
//! triggering the detector.

use std::sync::LazyLock;

use regex::Regex;

use mailroute_mime::ParsedMail;

/// Phrases that mark mailer-generated failure reports.
const BOUNCE_MARKERS: &[&str] = &[
    "undelivered mail returned to sender",
    "could not be delivered",
    "delivery status notification",
    "this is the mail system at host",
    "delivery to the following recipient failed",
    "the email account that you tried to reach does not exist",
    "mail delivery failed",
    "returning message to sender",
];

/// Phrases that mark a failure as permanent even without a 5xx code.
const PERMANENT_PHRASES: &[&str] = &[
    "user unknown",
    "mailbox unavailable",
    "does not exist",
    "no such user",
];

// <addr>: host mx.example said: 550 ...
#[allow(clippy::unwrap_used)]
static RECIPIENT_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([^<>@\s]+@[^<>\s]+)>:?\s*(?:host\s+\S+(?:\[\S+\])?\s+said:\s*(.+))?").unwrap()
});

#[allow(clippy::unwrap_used)]
static SMTP_5XX_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(5\d\d[\s-].*)$").unwrap());

/// What the detector concluded about a failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceVerdict {
    /// The failed recipient, when one could be extracted.
    pub recipient: Option<String>,
    /// Human-readable failure diagnostic.
    pub diagnostic: String,
    /// Permanent failures suppress future delivery; transient ones
    /// are recorded but do not.
    pub permanent: bool,
}

/// Inspects a parsed mail for evidence it is a bounce report.
///
/// Returns `None` when the mail does not look like a bounce. A
/// structured `message/delivery-status` part is definitive; free-text
/// detection requires two or more [`BOUNCE_MARKERS`].
#[must_use]
pub fn detect(mail: &ParsedMail) -> Option<BounceVerdict> {
    let dsn = &mail.dsn;
    if dsn.recipient.is_some() || dsn.status.is_some() || dsn.diagnostic.is_some() {
        let diagnostic = dsn
            .diagnostic
            .clone()
            .or_else(|| dsn.status.clone())
            .unwrap_or_else(|| "delivery failed".to_string());
        let permanent = dsn
            .status
            .as_deref()
            .map_or_else(|| is_permanent_text(&diagnostic), |s| s.starts_with('5'));
        return Some(BounceVerdict {
            recipient: dsn.recipient.clone(),
            diagnostic,
            permanent,
        });
    }

    let text = mail.effective_text().unwrap_or_default();
    let lowered = text.to_lowercase();

    let marker_count = BOUNCE_MARKERS
        .iter()
        .filter(|m| lowered.contains(*m))
        .count();
    if marker_count < 2 {
        return None;
    }

    let (recipient, said) = extract_recipient(&text);
    let diagnostic = said
        .or_else(|| {
            SMTP_5XX_LINE
                .captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .unwrap_or_else(|| "delivery failed".to_string());
    // Permanence is judged on the diagnostic alone. Quoted reply text
    // can mention permanent-sounding phrases without the failure
    // itself being permanent, and suspension is one-way.
    let permanent = is_permanent_text(&diagnostic);

    Some(BounceVerdict {
        recipient,
        diagnostic,
        permanent,
    })
}

/// First `<addr>` in the body, preferring one with a `host ... said:`
/// diagnostic tail.
fn extract_recipient(text: &str) -> (Option<String>, Option<String>) {
    for caps in RECIPIENT_DIAGNOSTIC.captures_iter(text) {
        let addr = caps.get(1).map(|m| m.as_str().to_string());
        let said = caps
            .get(2)
            .map(|m| m.as_str().trim().trim_end_matches('.').to_string())
            .filter(|s| !s.is_empty());
        if addr.is_some() {
            return (addr, said);
        }
    }
    (None, None)
}

fn is_permanent_text(text: &str) -> bool {
    #[allow(clippy::unwrap_used)]
    static ENHANCED_5XX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b5\d\d\b|\b5\.\d+\.\d+\b").unwrap());
    let lowered = text.to_lowercase();
    ENHANCED_5XX.is_match(&lowered) || PERMANENT_PHRASES.iter().any(|p| lowered.contains(p))
}
