//! Command-line interface for concierge.
//!
//! Provides commands for processing webhook payloads, re-running
//! materialization, and inspecting stored voicemails and their logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{Concierge, DateTimeResolver, PipelineLogStore};
use crate::domain::{VoicemailRecord, VoicemailWebhookInput};
use crate::store::{SqliteStore, VoicemailRepository};

/// concierge - Voicemail-to-job pipeline
#[derive(Parser, Debug)]
#[command(name = "concierge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a voicemail webhook payload (JSON file, or "-" for stdin)
    Process {
        /// Path to the webhook JSON
        webhook: PathBuf,

        /// Stop after the draft is saved
        #[arg(long)]
        no_materialize: bool,

        /// Country hint for phone numbers and dates (e.g. "US")
        #[arg(long)]
        country: Option<String>,
    },

    /// Materialize the stored draft of a processed voicemail
    Materialize {
        /// Call SID
        call_sid: String,

        /// Owning user
        #[arg(short, long)]
        user: String,
    },

    /// Show a stored voicemail
    Status {
        /// Call SID
        call_sid: String,

        /// Owning user
        #[arg(short, long)]
        user: String,
    },

    /// List recent voicemails for a user
    List {
        /// Owning user
        #[arg(short, long)]
        user: String,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print the pipeline log of a call
    Logs {
        /// Call SID
        call_sid: String,

        /// Owning user
        #[arg(short, long)]
        user: String,
    },

    /// Resolve a date/time pair the way drafts are scheduled
    ResolveDate {
        /// Date string (e.g. 2024-06-02)
        date: String,

        /// Time string (e.g. "2:00 PM")
        time: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Process {
                webhook,
                no_materialize,
                country,
            } => process_webhook(&webhook, no_materialize, country).await,
            Commands::Materialize { call_sid, user } => materialize(&call_sid, &user).await,
            Commands::Status { call_sid, user } => show_status(&call_sid, &user).await,
            Commands::List { user, limit } => list_voicemails(&user, limit).await,
            Commands::Logs { call_sid, user } => show_logs(&call_sid, &user).await,
            Commands::ResolveDate { date, time } => resolve_date(&date, time.as_deref()),
            Commands::Config => show_config(),
        }
    }
}

fn open_store(cfg: &ResolvedConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&cfg.database)
        .with_context(|| format!("Failed to open database: {}", cfg.database.display()))?;
    Ok(Arc::new(store))
}

fn read_webhook(path: &Path) -> Result<VoicemailWebhookInput> {
    let content = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read webhook file: {}", path.display()))?
    };

    serde_json::from_str(&content).context("Failed to parse webhook JSON")
}

async fn find_record(
    store: &SqliteStore,
    call_sid: &str,
    user: &str,
) -> Result<VoicemailRecord> {
    store
        .find_by_call_sid(call_sid, user)
        .await?
        .with_context(|| format!("No voicemail {} for user {}", call_sid, user))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the full pipeline on one webhook payload
async fn process_webhook(
    path: &Path,
    no_materialize: bool,
    country: Option<String>,
) -> Result<()> {
    let webhook = read_webhook(path)?;
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let mut concierge = Concierge::from_config(cfg, store)?;
    if no_materialize {
        concierge = concierge.without_materializer();
    }
    if let Some(country) = country {
        concierge = concierge.with_country_hint(country);
    }

    let outcome = concierge.handle(&webhook).await?;
    print_json(&outcome)?;

    eprintln!(
        "\n[Voicemail {} {}]",
        outcome.processing.record.call_sid, outcome.processing.record.status
    );
    Ok(())
}

/// Re-run materialization against a stored draft
async fn materialize(call_sid: &str, user: &str) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let record = find_record(&store, call_sid, user).await?;

    let concierge = Concierge::from_config(cfg, store)?;
    let result = concierge.materialize_record(&record).await?;
    print_json(&result)
}

/// Show one stored voicemail
async fn show_status(call_sid: &str, user: &str) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let record = find_record(&store, call_sid, user).await?;

    println!("Call SID: {}", record.call_sid);
    println!("User: {}", record.user_id);
    println!("From: {}", record.from_number);
    println!("Status: {}", record.status);
    println!("Created: {}", record.created_at);
    println!("Updated: {}", record.updated_at);
    if let Some(confidence) = record.transcript_confidence {
        println!(
            "Transcript: {} (confidence {:.2}, {})",
            record.transcript.as_deref().unwrap_or(""),
            confidence,
            record.transcript_vendor.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(draft) = &record.job_draft {
        println!("\nJob draft:");
        print_json(draft)?;
    }
    if let Some(error) = &record.last_error {
        println!("Last error: {}", error);
    }

    Ok(())
}

/// List recent voicemails for a user
async fn list_voicemails(user: &str, limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let records = store.list_for_user(user, limit).await?;

    if records.is_empty() {
        println!("No voicemails found for {}", user);
        return Ok(());
    }

    println!("{:<36} {:<13} {:<16} CREATED", "CALL SID", "STATUS", "FROM");
    for record in records {
        println!(
            "{:<36} {:<13} {:<16} {}",
            record.call_sid,
            record.status.as_str(),
            record.from_number,
            record.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Print the JSONL log of a call
async fn show_logs(call_sid: &str, user: &str) -> Result<()> {
    let cfg = config::config()?;
    let logs = PipelineLogStore::new(cfg.logs_dir());
    let entries = logs.replay(user, call_sid).await?;

    if entries.is_empty() {
        println!("No log entries for {}", call_sid);
        return Ok(());
    }

    for entry in entries {
        let error = entry
            .meta
            .get("error")
            .and_then(|e| e.as_str())
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        println!(
            "{} {:<10} {:<9} {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.step).to_lowercase(),
            format!("{:?}", entry.status).to_lowercase(),
            entry.message,
            error
        );
    }

    Ok(())
}

fn resolve_date(date: &str, time: Option<&str>) -> Result<()> {
    match DateTimeResolver::new().resolve(Some(date), time) {
        Some(ts) => {
            println!("{}", ts.format("%Y-%m-%d %H:%M"));
            Ok(())
        }
        None => anyhow::bail!("Could not resolve date '{}'", date),
    }
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Concierge Configuration");
    println!("  Config file:   {}", display_opt(cfg.config_file.as_ref()));
    println!("  Home:          {}", cfg.home.display());
    println!("  Database:      {}", cfg.database.display());
    println!("  Logs:          {}", cfg.logs_dir().display());
    println!();
    println!(
        "  Transcription: {:?} ({}) key={}",
        cfg.transcription.vendor,
        cfg.transcription.model,
        key_state(&cfg.transcription.api_key)
    );
    println!(
        "  Extraction:    {:?} ({}) key={}",
        cfg.extraction.vendor,
        cfg.extraction.model,
        key_state(&cfg.extraction.api_key)
    );
    println!("  Messaging:     {:?}", cfg.messaging.vendor);
    println!();
    println!(
        "  Threshold:     {}",
        cfg.materialization.confidence_threshold
    );
    println!(
        "  Event length:  {} min",
        cfg.materialization.event_duration_minutes
    );
    println!(
        "  Re-extract:    {}",
        cfg.materialization.reextract_on_retry
    );
    println!("  HTTP timeout:  {}s", cfg.http_timeout_seconds);

    Ok(())
}

fn display_opt(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

fn key_state(key: &Option<String>) -> &'static str {
    if key.is_some() {
        "set"
    } else {
        "missing"
    }
}
