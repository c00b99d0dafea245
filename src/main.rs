//! Unsubscriber CLI entry point.
//!
//! Provides `run`, `config`, and `parse-header` subcommands for processing a
//! batch of unsubscribe candidates, printing the effective configuration, or
//! inspecting a single `List-Unsubscribe` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use unsubscriber::candidate::{ChainOutcome, UnsubscribeCandidate};
use unsubscriber::chain::{standard_chain, ChainDependencies, StrategyChain};
use unsubscriber::config::{config_dir, load_config, Config};
use unsubscriber::credentials::load_default_credentials;
use unsubscriber::gate::ConcurrencyGate;
use unsubscriber::store::jsonl::{JsonFileMustDeleteList, JsonlAuditLog};
use unsubscriber::store::memory::StaticAccountStore;
use unsubscriber::strategies::header_link::extract_http_urls;
use unsubscriber::strategies::mail_fallback::SmtpSubmitter;

/// Unsubscriber: automated List-Unsubscribe processing.
#[derive(Parser)]
#[command(name = "unsubscriber", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Unsubscribe from every candidate in a JSON file.
    Run {
        /// JSON array of candidates.
        #[arg(long)]
        input: PathBuf,
        /// Config file (default: ~/.unsubscriber/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Candidates processed concurrently.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Print the effective configuration.
    Config {
        /// Config file (default: ~/.unsubscriber/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the HTTP URLs found in a List-Unsubscribe header value.
    ParseHeader {
        /// Raw header value, e.g. `<mailto:u@x.com>, <https://x.com/u>`.
        value: String,
    },
}

/// One output line per processed candidate.
#[derive(Serialize)]
struct OutcomeLine<'a> {
    sender: &'a str,
    #[serde(flatten)]
    outcome: &'a ChainOutcome,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            input,
            config,
            workers,
        } => handle_run(&input, config.as_deref(), workers).await,
        Command::Config { config } => handle_config(config.as_deref()),
        Command::ParseHeader { value } => handle_parse_header(&value),
    }
}

/// Resolve and load configuration with env overrides applied.
fn effective_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_dir()?.join("config.toml"),
    };
    let mut config =
        load_config(&path).with_context(|| format!("failed to load {}", path.display()))?;
    config.apply_overrides(|k| std::env::var(k).ok());
    Ok(config)
}

/// Process a candidate batch through the standard chain.
async fn handle_run(input: &Path, config_path: Option<&Path>, workers: usize) -> anyhow::Result<()> {
    let base = config_dir()?;
    let logs_dir = unsubscriber::logging::logs_dir(&base);
    let _logging_guard = unsubscriber::logging::init_production(&logs_dir, "info")?;

    let config = effective_config(config_path)?;
    let credentials = load_default_credentials().context("failed to load credentials")?;

    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let candidates: Vec<UnsubscribeCandidate> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse candidates in {}", input.display()))?;

    let audit_path = config.paths.audit_log_or(&base);
    let must_delete_path = config.paths.must_delete_or(&base);
    let audit = Arc::new(
        JsonlAuditLog::open(&audit_path)
            .with_context(|| format!("failed to open audit log {}", audit_path.display()))?,
    );
    let must_delete = Arc::new(
        JsonFileMustDeleteList::open(&must_delete_path).with_context(|| {
            format!("failed to open must-delete list {}", must_delete_path.display())
        })?,
    );

    let mail_settings = config.mail.settings();
    let chain = standard_chain(ChainDependencies {
        gate: Arc::new(ConcurrencyGate::new(config.gate.settings())),
        audit,
        must_delete,
        accounts: Arc::new(StaticAccountStore::new(
            config.account.as_ref().map(|a| a.to_account()),
        )),
        secrets: Arc::new(credentials),
        submitter: Arc::new(SmtpSubmitter::new(mail_settings.timeout)),
        header_link: config.header_link.settings(),
        direct_link: config.direct_link.settings(),
        mail_fallback: mail_settings,
    })
    .context("failed to build strategy chain")?;

    info!(
        candidates = candidates.len(),
        workers,
        strategies = ?chain.strategy_names(),
        "unsubscribe run started"
    );

    let (succeeded, failed) = process_all(Arc::new(chain), candidates, workers).await;

    info!(succeeded, failed, "unsubscribe run complete");
    println!("{succeeded} unsubscribed, {failed} added to must-delete");
    Ok(())
}

/// Fan candidates out over at most `workers` tasks, printing outcomes as
/// they complete. Returns `(succeeded, failed)`.
async fn process_all(
    chain: Arc<StrategyChain>,
    candidates: Vec<UnsubscribeCandidate>,
    workers: usize,
) -> (usize, usize) {
    let limiter = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for candidate in candidates {
        let chain = Arc::clone(&chain);
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            let _slot = limiter.acquire_owned().await.ok();
            let outcome = chain.execute(&candidate).await;
            (candidate.sender, outcome)
        });
    }

    let mut succeeded: usize = 0;
    let mut failed: usize = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((sender, outcome)) => {
                if outcome.success {
                    succeeded = succeeded.saturating_add(1);
                } else {
                    failed = failed.saturating_add(1);
                }
                let line = OutcomeLine {
                    sender: &sender,
                    outcome: &outcome,
                };
                match serde_json::to_string(&line) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!(error = %e, sender = %sender, "failed to serialize outcome"),
                }
            }
            Err(e) => {
                failed = failed.saturating_add(1);
                warn!(error = %e, "candidate task aborted");
            }
        }
    }
    (succeeded, failed)
}

/// Print the effective configuration as TOML.
fn handle_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    unsubscriber::logging::init_cli("warn");
    let config = effective_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    print!("{rendered}");
    Ok(())
}

/// Print each HTTP URL from a header value on its own line.
fn handle_parse_header(value: &str) -> anyhow::Result<()> {
    unsubscriber::logging::init_cli("warn");
    let urls = extract_http_urls(value);
    if urls.is_empty() {
        anyhow::bail!("no HTTP URLs found in List-Unsubscribe header");
    }
    for url in urls {
        println!("{url}");
    }
    Ok(())
}
