//! Spam scoring via a spamd-compatible daemon.
//!
//! The checker is advisory: any transport or protocol failure yields
//! [`SpamVerdict::Undetermined`] and routing proceeds as if the mail
//! were clean. Spam filtering must never hold up delivery.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Outcome of a spam check.
#[derive(Debug, Clone, PartialEq)]
pub enum SpamVerdict {
    /// The scorer flagged the mail.
    Spam {
        /// Reported score.
        score: f32,
        /// Human-readable reason recorded alongside the message.
        reason: String,
    },
    /// Scored below threshold.
    Clean,
    /// The scorer was unreachable or spoke garbage.
    Undetermined,
}

/// A pluggable spam scorer.
pub trait SpamChecker: Send + Sync {
    /// Scores raw message bytes.
    fn check(&self, raw: &[u8]) -> impl std::future::Future<Output = SpamVerdict> + Send;
}

/// Talks the spamd `CHECK` protocol over TCP.
#[derive(Debug, Clone)]
pub struct SpamdChecker {
    addr: String,
    timeout: Duration,
    threshold: f32,
}

impl SpamdChecker {
    /// Creates a checker for a spamd instance.
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration, threshold: f32) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            threshold,
        }
    }

    async fn check_inner(&self, raw: &[u8]) -> Option<SpamVerdict> {
        let mut stream = TcpStream::connect(&self.addr).await.ok()?;

        let header = format!("CHECK SPAMC/1.5\r\nContent-length: {}\r\n\r\n", raw.len());
        stream.write_all(header.as_bytes()).await.ok()?;
        stream.write_all(raw).await.ok()?;
        stream.shutdown().await.ok()?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.ok()?;
        let response = String::from_utf8_lossy(&response);
        debug!(%response, "spamd response");

        parse_check_response(&response, self.threshold)
    }
}

impl SpamChecker for SpamdChecker {
    async fn check(&self, raw: &[u8]) -> SpamVerdict {
        match tokio::time::timeout(self.timeout, self.check_inner(raw)).await {
            Ok(Some(verdict)) => verdict,
            Ok(None) => {
                warn!(addr = %self.addr, "spamd check failed");
                SpamVerdict::Undetermined
            }
            Err(_) => {
                warn!(addr = %self.addr, "spamd check timed out");
                SpamVerdict::Undetermined
            }
        }
    }
}

/// A checker that never flags anything, for installs without spamd.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledChecker;

impl SpamChecker for DisabledChecker {
    async fn check(&self, _raw: &[u8]) -> SpamVerdict {
        SpamVerdict::Undetermined
    }
}

/// Parses `Spam: True ; 15.5 / 5.0` out of a spamd CHECK response.
fn parse_check_response(response: &str, threshold: f32) -> Option<SpamVerdict> {
    let line = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("spam:"))?;
    let rest = line.split_once(':')?.1;
    let (flag, scores) = rest.split_once(';')?;
    let flagged = flag.trim().eq_ignore_ascii_case("true");
    let score: f32 = scores.split_once('/')?.0.trim().parse().ok()?;

    if flagged || score >= threshold {
        Some(SpamVerdict::Spam {
            score,
            reason: format!("spamassassin score {score}"),
        })
    } else {
        Some(SpamVerdict::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spam_response() {
        let response = "SPAMD/1.1 0 EX_OK\r\nSpam: True ; 15.5 / 5.0\r\n\r\n";
        assert_eq!(
            parse_check_response(response, 8.0),
            Some(SpamVerdict::Spam {
                score: 15.5,
                reason: "spamassassin score 15.5".to_string()
            })
        );
    }

    #[test]
    fn test_parse_clean_response() {
        let response = "SPAMD/1.1 0 EX_OK\r\nSpam: False ; 1.2 / 5.0\r\n\r\n";
        assert_eq!(parse_check_response(response, 8.0), Some(SpamVerdict::Clean));
    }

    #[test]
    fn test_score_over_threshold_flags_even_unflagged() {
        let response = "SPAMD/1.1 0 EX_OK\r\nSpam: False ; 9.1 / 5.0\r\n\r\n";
        assert!(matches!(
            parse_check_response(response, 8.0),
            Some(SpamVerdict::Spam { .. })
        ));
    }

    #[test]
    fn test_garbage_response_is_undetermined() {
        assert_eq!(parse_check_response("hello world", 8.0), None);
        assert_eq!(parse_check_response("Spam: maybe", 8.0), None);
    }

    #[tokio::test]
    async fn test_unreachable_spamd_is_undetermined() {
        // Reserved port with nothing listening
        let checker = SpamdChecker::new("127.0.0.1:1", Duration::from_millis(200), 8.0);
        assert_eq!(checker.check(b"Subject: x\r\n\r\nbody").await, SpamVerdict::Undetermined);
    }
}
