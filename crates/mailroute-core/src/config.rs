//! Router configuration.
//!
//! All moderation/feature knobs are explicit values injected at router
//! construction; there is no process-wide mutable state.

use std::time::Duration;

/// Configuration for the routing engine and its collaborators.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Domain for per-user system addresses (notify-, bounce-,
    /// digestoff-, ...).
    pub user_domain: String,
    /// Domain for group-post addresses.
    pub group_domain: String,
    /// SQLite database path.
    pub db_path: String,
    /// spamd endpoint as `host:port`.
    pub spamd_addr: String,
    /// Per-message timeout for the spam verdict call.
    pub spamd_timeout: Duration,
    /// Score at or above which spamd output counts as spam.
    pub spam_threshold: f32,
    /// Chats idle longer than this are stale for unfamiliar senders.
    pub stale_chat_days: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            user_domain: "users.example.org".into(),
            group_domain: "groups.example.org".into(),
            db_path: "mailroute.db".into(),
            spamd_addr: "127.0.0.1:783".into(),
            spamd_timeout: Duration::from_secs(5),
            spam_threshold: 8.0,
            stale_chat_days: 84,
        }
    }
}

impl RouterConfig {
    /// Builds a config from the environment, falling back to defaults.
    ///
    /// Recognised variables: `MAILROUTE_USER_DOMAIN`,
    /// `MAILROUTE_GROUP_DOMAIN`, `MAILROUTE_DB`, `MAILROUTE_SPAMD`,
    /// `MAILROUTE_SPAMD_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MAILROUTE_USER_DOMAIN") {
            config.user_domain = v;
        }
        if let Ok(v) = std::env::var("MAILROUTE_GROUP_DOMAIN") {
            config.group_domain = v;
        }
        if let Ok(v) = std::env::var("MAILROUTE_DB") {
            config.db_path = v;
        }
        if let Ok(v) = std::env::var("MAILROUTE_SPAMD") {
            config.spamd_addr = v;
        }
        if let Ok(secs) = std::env::var("MAILROUTE_SPAMD_TIMEOUT_SECS")
            .ok()
            .map_or(Err(()), |v| v.parse::<u64>().map_err(|_| ()))
        {
            config.spamd_timeout = Duration::from_secs(secs);
        }
        config
    }
}
