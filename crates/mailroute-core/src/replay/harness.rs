//! The replay harness driver.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use mailroute_mime::ParsedMail;

use crate::Result;
use crate::outcome::{RoutingContext, RoutingOutcome};
use crate::router::RoutingEngine;
use crate::spam::SpamChecker;

use super::archive::ArchiveEntry;

/// How a replay run should behave.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Stop after this many entries.
    pub limit: Option<usize>,
    /// Stop at the first mismatch.
    pub stop_on_mismatch: bool,
}

/// What happened to one archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplayStatus {
    /// Dry-run decision agreed with the historical record.
    Matched,
    /// Dry-run decision disagreed.
    Mismatched,
    /// Nothing stored historically; accepted without comparison.
    Skipped,
    /// Entry unreadable or outcome untranslatable.
    Errored,
}

/// Per-entry replay result.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayRecord {
    /// Source file.
    pub path: PathBuf,
    /// What happened.
    pub status: ReplayStatus,
    /// Historical outcome name, verbatim.
    pub legacy_outcome: String,
    /// Historical sender id.
    pub legacy_user: Option<i64>,
    /// Dry-run outcome, when a replay ran.
    pub new_outcome: Option<RoutingOutcome>,
    /// Dry-run sender id.
    pub new_user: Option<i64>,
    /// Dry-run decision trace, for explaining mismatches.
    pub context: Option<RoutingContext>,
    /// Error detail for [`ReplayStatus::Errored`] entries.
    pub detail: Option<String>,
}

/// Aggregate counts for a replay run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplayStats {
    /// Entries seen.
    pub total: usize,
    /// Agreements.
    pub matched: usize,
    /// Disagreements.
    pub mismatched: usize,
    /// Accepted without comparison.
    pub skipped: usize,
    /// Unreadable or untranslatable entries.
    pub errored: usize,
}

impl ReplayStats {
    /// Whether any entry disagreed.
    #[must_use]
    pub const fn has_mismatch(&self) -> bool {
        self.mismatched > 0
    }
}

/// Drives archived traffic through a router in dry-run.
pub struct ReplayHarness<'a, S> {
    engine: &'a RoutingEngine<S>,
    options: ReplayOptions,
}

impl<'a, S: SpamChecker> ReplayHarness<'a, S> {
    /// Creates a harness over an engine.
    #[must_use]
    pub const fn new(engine: &'a RoutingEngine<S>, options: ReplayOptions) -> Self {
        Self { engine, options }
    }

    /// Replays a file or a directory tree of archive JSON files.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be listed; per-entry
    /// problems become [`ReplayStatus::Errored`] records instead.
    pub async fn run(&self, path: &Path) -> Result<(ReplayStats, Vec<ReplayRecord>)> {
        let mut files = collect_archive_files(path)?;
        files.sort();
        if let Some(limit) = self.options.limit {
            files.truncate(limit);
        }

        let mut stats = ReplayStats::default();
        let mut records = Vec::with_capacity(files.len());

        for file in files {
            let record = self.replay_file(&file).await;
            stats.total += 1;
            match record.status {
                ReplayStatus::Matched => stats.matched += 1,
                ReplayStatus::Mismatched => stats.mismatched += 1,
                ReplayStatus::Skipped => stats.skipped += 1,
                ReplayStatus::Errored => stats.errored += 1,
            }
            let stop = self.options.stop_on_mismatch && record.status == ReplayStatus::Mismatched;
            records.push(record);
            if stop {
                break;
            }
        }

        Ok((stats, records))
    }

    async fn replay_file(&self, path: &Path) -> ReplayRecord {
        let mut record = ReplayRecord {
            path: path.to_path_buf(),
            status: ReplayStatus::Errored,
            legacy_outcome: String::new(),
            legacy_user: None,
            new_outcome: None,
            new_user: None,
            context: None,
            detail: None,
        };

        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                record.detail = Some(e.to_string());
                return record;
            }
        };
        let entry = match ArchiveEntry::from_json(&json) {
            Ok(entry) => entry,
            Err(e) => {
                record.detail = Some(e.to_string());
                return record;
            }
        };
        record.legacy_outcome = entry.legacy_result.routing_outcome.clone();
        record.legacy_user = entry.legacy_result.user_id;

        // The historical system stored nothing (duplicate or parse
        // failure at capture time): its outcome is ground truth and
        // there is nothing to replay against.
        if entry.nothing_stored() {
            debug!(path = %path.display(), "nothing stored historically, accepting");
            record.status = ReplayStatus::Skipped;
            return record;
        }

        let Some(expected) = entry.legacy_outcome() else {
            record.detail = Some(format!(
                "unknown legacy outcome {:?}",
                entry.legacy_result.routing_outcome
            ));
            return record;
        };
        let raw = match entry.decode_raw() {
            Ok(raw) => raw,
            Err(e) => {
                record.detail = Some(e.to_string());
                return record;
            }
        };

        let mail = ParsedMail::parse(&raw, &entry.envelope.from, &entry.envelope.to);
        let decision = match self.engine.route_dry_run(&mail).await {
            Ok(decision) => decision,
            Err(e) => {
                record.detail = Some(e.to_string());
                return record;
            }
        };

        record.new_outcome = Some(decision.outcome);
        record.new_user = decision.context.user_id;

        let user_matches = entry.legacy_result.user_id.is_none()
            || entry.legacy_result.user_id == decision.context.user_id;
        if decision.outcome == expected && user_matches {
            record.status = ReplayStatus::Matched;
        } else {
            warn!(
                path = %path.display(),
                legacy = %entry.legacy_result.routing_outcome,
                new = %decision.outcome,
                "replay mismatch"
            );
            record.status = ReplayStatus::Mismatched;
            record.context = Some(decision.context);
        }
        record
    }
}

/// One file, or every `*.json` under a directory tree.
fn collect_archive_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for dir_entry in fs::read_dir(&dir)? {
            let entry_path = dir_entry?.path();
            if entry_path.is_dir() {
                stack.push(entry_path);
            } else if entry_path.extension().is_some_and(|e| e == "json") {
                files.push(entry_path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    use crate::config::RouterConfig;
    use crate::membership::{PostingStatus, Role};
    use crate::spam::DisabledChecker;
    use crate::store::Store;

    fn entry(outcome: &str, message_id: Option<i64>, user_id: Option<i64>, raw: &str) -> String {
        let raw = BASE64.encode(raw.as_bytes());
        let message_id = message_id.map_or("null".to_string(), |id| id.to_string());
        let user_id = user_id.map_or("null".to_string(), |id| id.to_string());
        format!(
            r#"{{
                "version": 1,
                "timestamp": "2024-01-31T12:00:00Z",
                "envelope": {{"from": "alice@example.com", "to": "bristol@groups.example.org"}},
                "raw_email": "{raw}",
                "legacy_result": {{
                    "routing_outcome": "{outcome}",
                    "message_id": {message_id},
                    "user_id": {user_id},
                    "subject": "OFFER: Chair (Bristol)"
                }}
            }}"#
        )
    }

    const OFFER: &str = concat!(
        "From: Alice <alice@example.com>\r\n",
        "Message-ID: <offer@example.com>\r\n",
        "Subject: OFFER: Chair (Bristol)\r\n",
        "\r\n",
        "Collection only.\r\n",
    );

    async fn seeded_engine(moderated: bool) -> (RoutingEngine<DisabledChecker>, i64) {
        let store = Store::in_memory().await.unwrap();
        let memberships = store.memberships();
        let user = memberships.create_user().await.unwrap();
        memberships
            .add_email(user, "alice@example.com", true)
            .await
            .unwrap();
        let group = memberships.create_group("bristol", moderated).await.unwrap();
        memberships
            .add_membership(user, group, Role::Member, PostingStatus::Default)
            .await
            .unwrap();
        (
            RoutingEngine::new(store, DisabledChecker, RouterConfig::default()),
            user,
        )
    }

    #[tokio::test]
    async fn test_matching_entry() {
        let (engine, user) = seeded_engine(false).await;
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("one.json"),
            entry("Approved", Some(7), Some(user), OFFER),
        )
        .unwrap();

        let harness = ReplayHarness::new(&engine, ReplayOptions::default());
        let (stats, records) = harness.run(dir.path()).await.unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.mismatched, 0);
        assert_eq!(records[0].status, ReplayStatus::Matched);

        // Dry-run only: replay must not write
        assert_eq!(engine.store().messages().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mismatch_reports_context() {
        // The group is moderated here, so the dry run says Pending
        // while the archive says Approved.
        let (engine, user) = seeded_engine(true).await;

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("one.json"),
            entry("Approved", Some(7), Some(user), OFFER),
        )
        .unwrap();

        let harness = ReplayHarness::new(&engine, ReplayOptions::default());
        let (stats, records) = harness.run(dir.path()).await.unwrap();
        assert!(stats.has_mismatch());
        let record = &records[0];
        assert_eq!(record.status, ReplayStatus::Mismatched);
        assert_eq!(record.new_outcome, Some(RoutingOutcome::Pending));
        let context = record.context.as_ref().unwrap();
        assert_eq!(context.group_moderated, Some(true));
        assert!(!context.override_applied);
    }

    #[tokio::test]
    async fn test_nothing_stored_is_skipped() {
        let (engine, user) = seeded_engine(false).await;
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("one.json"),
            entry("Dropped", None, Some(user), OFFER),
        )
        .unwrap();

        let harness = ReplayHarness::new(&engine, ReplayOptions::default());
        let (stats, records) = harness.run(dir.path()).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(records[0].status, ReplayStatus::Skipped);
    }

    #[tokio::test]
    async fn test_limit_and_stop_on_mismatch() {
        let (engine, user) = seeded_engine(false).await;
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(
                dir.path().join(format!("{i}.json")),
                entry("Approved", Some(7), Some(user), OFFER),
            )
            .unwrap();
        }

        let harness = ReplayHarness::new(
            &engine,
            ReplayOptions {
                limit: Some(2),
                stop_on_mismatch: false,
            },
        );
        let (stats, _) = harness.run(dir.path()).await.unwrap();
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_errored() {
        let (engine, _) = seeded_engine(false).await;
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "not json at all").unwrap();

        let harness = ReplayHarness::new(&engine, ReplayOptions::default());
        let (stats, records) = harness.run(dir.path()).await.unwrap();
        assert_eq!(stats.errored, 1);
        assert!(records[0].detail.is_some());
    }
}
