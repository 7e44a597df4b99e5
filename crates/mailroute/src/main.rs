//! `mailroute` - MTA entry point and replay harness for the
//! incoming-mail routing engine.
//!
//! The `incoming` subcommand is what the MTA pipes each delivery
//! into: it prints exactly one outcome line and exits 0 for every
//! handled or dropped message, 75 only for transient store faults the
//! MTA should retry. The `replay` subcommand drives archived traffic
//! through the same pipeline in dry-run.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailroute_core::replay::{ReplayHarness, ReplayOptions, ReplayRecord, ReplayStats, ReplayStatus};
use mailroute_core::spam::{DisabledChecker, SpamdChecker};
use mailroute_core::{EX_OK, EX_TEMPFAIL, RouterConfig, RoutingEngine, RoutingOutcome, Store};
use mailroute_mime::ParsedMail;

#[derive(Parser)]
#[command(name = "mailroute", about = "Incoming-mail routing engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route one inbound message delivered by the MTA.
    Incoming {
        /// SMTP envelope sender (MAIL FROM).
        sender: String,
        /// SMTP envelope recipient (RCPT TO).
        recipient: String,
        /// Raw message content, instead of reading stdin.
        #[arg(long)]
        stdin_content: Option<String>,
    },
    /// Replay archived traffic through the router in dry-run.
    Replay {
        /// Archive JSON file, or a directory tree of them.
        path: PathBuf,
        /// Stop after this many entries.
        #[arg(long)]
        limit: Option<usize>,
        /// Stop at the first mismatch.
        #[arg(long)]
        stop_on_mismatch: bool,
        /// Report matched entries too, not just problems.
        #[arg(long)]
        verbose_match: bool,
        /// Report format.
        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Summary,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailroute=info,mailroute_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Incoming {
            sender,
            recipient,
            stdin_content,
        } => incoming(&sender, &recipient, stdin_content).await,
        Command::Replay {
            path,
            limit,
            stop_on_mismatch,
            verbose_match,
            output,
        } => {
            replay(
                &path,
                ReplayOptions {
                    limit,
                    stop_on_mismatch,
                },
                verbose_match,
                output,
            )
            .await
        }
    }
}

/// The MTA-facing boundary: the one place any fault is converted into
/// an exit code. Everything other than a transient store error is
/// absorbed as handled, so bad input can never loop.
async fn incoming(sender: &str, recipient: &str, stdin_content: Option<String>) -> ExitCode {
    let raw = match stdin_content {
        Some(content) => content.into_bytes(),
        None => {
            let mut raw = Vec::new();
            if let Err(e) = std::io::stdin().read_to_end(&mut raw) {
                error!(error = %e, "failed to read message from stdin");
                println!("{}", RoutingOutcome::Dropped);
                return exit_code(EX_OK);
            }
            raw
        }
    };

    let config = RouterConfig::from_env();
    let mail = ParsedMail::parse(&raw, sender, recipient);

    let store = match Store::new(&config.db_path).await {
        Ok(store) => store,
        Err(e) => return report_error(&e),
    };
    let spam = SpamdChecker::new(
        config.spamd_addr.clone(),
        config.spamd_timeout,
        config.spam_threshold,
    );
    let engine = RoutingEngine::new(store, spam, config);

    match engine.route(&mail).await {
        Ok(decision) => {
            info!(
                envelope_from = %mail.envelope_from,
                envelope_to = %mail.envelope_to,
                from = mail.from_address.as_deref().unwrap_or(""),
                subject = mail.subject.as_deref().unwrap_or(""),
                message_id = mail.message_id.as_deref().unwrap_or(""),
                outcome = %decision.outcome,
                context = %serde_json::to_string(&decision.context).unwrap_or_default(),
                "routed"
            );
            println!("{}", decision.outcome);
            exit_code(EX_OK)
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &mailroute_core::Error) -> ExitCode {
    if e.is_transient() {
        error!(error = %e, "transient store fault, asking MTA to retry");
        println!("{}", RoutingOutcome::Failure);
        exit_code(EX_TEMPFAIL)
    } else {
        error!(error = %e, "unrecoverable fault, dropping");
        println!("{}", RoutingOutcome::Dropped);
        exit_code(EX_OK)
    }
}

async fn replay(
    path: &std::path::Path,
    options: ReplayOptions,
    verbose_match: bool,
    output: OutputFormat,
) -> ExitCode {
    let run = replay_inner(path, options).await;
    let (stats, records) = match run {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "replay failed");
            return ExitCode::from(2);
        }
    };

    match output {
        OutputFormat::Summary => print_summary(&stats),
        OutputFormat::Table => print_table(&stats, &records, verbose_match),
        OutputFormat::Json => print_json(&stats, &records, verbose_match),
    }

    if stats.has_mismatch() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

async fn replay_inner(
    path: &std::path::Path,
    options: ReplayOptions,
) -> anyhow::Result<(ReplayStats, Vec<ReplayRecord>)> {
    let config = RouterConfig::from_env();
    let store = Store::new(&config.db_path).await?;
    // Replay must be deterministic and offline, so no live spamd.
    let engine = RoutingEngine::new(store, DisabledChecker, config);
    let harness = ReplayHarness::new(&engine, options);
    Ok(harness.run(path).await?)
}

fn print_summary(stats: &ReplayStats) {
    println!(
        "total {}  matched {}  mismatched {}  skipped {}  errored {}",
        stats.total, stats.matched, stats.mismatched, stats.skipped, stats.errored
    );
}

fn print_table(stats: &ReplayStats, records: &[ReplayRecord], verbose_match: bool) {
    for record in records {
        if record.status == ReplayStatus::Matched && !verbose_match {
            continue;
        }
        let new_outcome = record
            .new_outcome
            .map_or_else(|| "-".to_string(), |o| o.to_string());
        println!(
            "{:<10} {:<14} -> {:<14} {}",
            format!("{:?}", record.status),
            record.legacy_outcome,
            new_outcome,
            record.path.display()
        );
        if record.status == ReplayStatus::Mismatched {
            if let Some(context) = &record.context {
                println!(
                    "           context: {}",
                    serde_json::to_string(context).unwrap_or_default()
                );
            }
        }
        if let Some(detail) = &record.detail {
            println!("           {detail}");
        }
    }
    print_summary(stats);
}

fn print_json(stats: &ReplayStats, records: &[ReplayRecord], verbose_match: bool) {
    let records: Vec<&ReplayRecord> = records
        .iter()
        .filter(|r| verbose_match || r.status != ReplayStatus::Matched)
        .collect();
    let report = serde_json::json!({
        "stats": stats,
        "records": records,
    });
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
