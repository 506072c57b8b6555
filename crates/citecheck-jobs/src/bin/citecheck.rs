//! citecheck: command-line client for the citation validation backend.
//!
//! Submits citation batches, follows async jobs to completion, and manages
//! the local state file (current job, pending upgrade, experiment arms).
//! Results are printed to stdout as JSON; logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use citecheck_client::{ClientConfig, HttpTransport, SubmitMode};
use citecheck_jobs::defaults::{self, KEY_CURRENT_JOB_ID};
use citecheck_jobs::{
    CitationBatch, FileJobStore, JobStore, PollConfig, SubmitOutcome, ValidationSession,
    EXPERIMENTS,
};

#[derive(Parser)]
#[command(name = "citecheck")]
#[command(author, version, about = "Validate citations against the citecheck backend")]
#[command(propagate_version = true)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "CITECHECK_API_URL")]
    api_url: Option<String>,

    /// Local state file
    #[arg(long, env = "CITECHECK_STATE_PATH", default_value = defaults::STATE_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit citations for validation
    Validate {
        /// Citations to validate (one per argument)
        citations: Vec<String>,

        /// Read citations from a file, one per line ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Citation style
        #[arg(short, long, default_value = defaults::STYLE)]
        style: String,

        /// Uploaded document to match inline citations against
        #[arg(long)]
        document_id: Option<String>,

        /// Submission mode: sync or async
        #[arg(long, env = "CITECHECK_SUBMIT_MODE")]
        mode: Option<SubmitMode>,

        /// Return after enqueueing instead of waiting for results
        #[arg(long)]
        no_wait: bool,
    },

    /// Resume polling the last submitted job
    Resume,

    /// Abandon the last submitted job
    Cancel,

    /// Show this client's experiment assignments
    Variant,

    /// Report a completed upgrade for the pending partial job
    Upgrade {
        /// User token sent with the upgrade event
        #[arg(long, env = "CITECHECK_USER_TOKEN")]
        token: String,
    },

    /// Show locally stored job state
    Status,
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, replaces stderr output)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "citecheck=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "citecheck=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("citecheck.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn read_citations(inline: Vec<String>, file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let text = match file {
        None => return Ok(inline),
        Some(path) if path == Path::new("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read citations from stdin")?;
            buf
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
    };

    let mut citations = inline;
    citations.extend(
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from),
    );
    Ok(citations)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();

    let mut client_config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        client_config = client_config.with_base_url(url);
    }
    if let Commands::Validate {
        mode: Some(mode), ..
    } = &cli.command
    {
        client_config = client_config.with_submit_mode(*mode);
    }
    let submit_mode = client_config.submit_mode;

    let store = Arc::new(
        FileJobStore::open(&cli.state)
            .with_context(|| format!("Failed to open state file {}", cli.state.display()))?,
    );
    let transport = Arc::new(HttpTransport::new(client_config)?);
    let session = ValidationSession::builder(transport, store.clone())
        .with_submit_mode(submit_mode)
        .with_poll_config(PollConfig::from_env())
        .build();

    info!(state = %cli.state.display(), "citecheck starting");

    match cli.command {
        Commands::Validate {
            citations,
            file,
            style,
            document_id,
            no_wait,
            ..
        } => {
            let citations = read_citations(citations, file.as_deref()).await?;
            let mut batch = CitationBatch::new(citations, style);
            if let Some(id) = document_id {
                batch = batch.with_document(id);
            }

            match session.submit(&batch).await? {
                SubmitOutcome::Completed(view) => print_json(&view)?,
                queued @ SubmitOutcome::Queued { .. } if no_wait => print_json(&queued)?,
                SubmitOutcome::Queued { .. } => print_json(&session.wait().await?)?,
            }
        }
        Commands::Resume => match session.resume().await? {
            Some(_) => print_json(&session.wait().await?)?,
            None => print_json(&json!({ "job_id": null }))?,
        },
        Commands::Cancel => {
            let job_id = session.cancel().await?;
            print_json(&json!({ "cancelled": job_id }))?;
        }
        Commands::Variant => {
            let mut assignments = Vec::new();
            for experiment in EXPERIMENTS {
                assignments.push(session.experiments().assignment(*experiment)?);
            }
            print_json(&assignments)?;
        }
        Commands::Upgrade { token } => match session.complete_upgrade(&token)? {
            Some(completion) => {
                let job_id = completion.job_id.clone();
                // The process would exit before a detached report is sent.
                completion.report.await?;
                print_json(&json!({ "upgraded": job_id }))?;
            }
            None => print_json(&json!({ "upgraded": null }))?,
        },
        Commands::Status => {
            print_json(&json!({
                "current_job_id": store.get(KEY_CURRENT_JOB_ID)?,
                "pending_upgrade_job_id": session.upgrades().pending()?,
            }))?;
        }
    }

    Ok(())
}
