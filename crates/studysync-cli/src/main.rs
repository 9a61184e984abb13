//! studysync CLI - operator tool for the offline action queue
//!
//! Enqueue, replay, inspect and settle a user's queued actions against a
//! local database.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use studysync_core::sync::DEFAULT_RETENTION_DAYS;
use studysync_core::util::unix_millis_now;
use studysync_core::{
    ActionId, ActionRecord, ConflictResolution, SyncPolicy, SyncService, SyncSummary,
};
use thiserror::Error;

const MAX_RETRIES_LIMIT: u32 = 20;

#[derive(Parser)]
#[command(name = "studysync")]
#[command(about = "Inspect and replay queued offline actions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// User whose queue the command acts on (falls back to STUDYSYNC_OWNER)
    #[arg(short = 'u', long, global = true, value_name = "USER")]
    owner: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an action for later replay
    Enqueue {
        /// Action type, e.g. `note_create`
        action_type: String,
        /// Action data as a JSON object
        data: String,
    },
    /// Replay the queue in enqueue order
    Sync {
        /// Stop at the first record that does not sync
        #[arg(long)]
        halt_on_failure: bool,
        /// Failed attempts before a record is marked failed
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending, failed and conflicted actions
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single action with its full state
    Show {
        /// Action ID
        id: String,
    },
    /// Settle a conflicted action
    Resolve {
        /// Action ID
        id: String,
        /// One of `server`, `client`, `merge`
        resolution: String,
        /// JSON object overlaid on the queued data
        #[arg(long, value_name = "JSON")]
        client_data: Option<String>,
    },
    /// Re-submit an action that exhausted its retries
    Retry {
        /// Action ID
        id: String,
    },
    /// Delete synced actions past the retention window
    Purge {
        /// Retention window in days
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        older_than_days: u32,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] studysync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No owner given. Pass --owner or set STUDYSYNC_OWNER")]
    MissingOwner,
    #[error("Action ID cannot be empty")]
    EmptyActionId,
    #[error("Invalid action ID: {0}")]
    InvalidActionId(String),
    #[error("Action not found: {0}")]
    ActionNotFound(String),
    #[error("Invalid JSON for {field}: {message}")]
    InvalidJson {
        field: &'static str,
        message: String,
    },
    #[error("--max-retries must be between 1 and {MAX_RETRIES_LIMIT}")]
    InvalidMaxRetries,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["studysync=info", "studysync_core=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let db_path = resolve_db_path(cli.db_path);
    let owner = resolve_owner(cli.owner)?;

    match command {
        Commands::Enqueue { action_type, data } => {
            run_enqueue(&owner, &action_type, &data, &db_path).await?;
        }
        Commands::Sync {
            halt_on_failure,
            max_retries,
            json,
        } => {
            let policy = sync_policy(max_retries, halt_on_failure)?;
            run_sync(&owner, policy, json, &db_path).await?;
        }
        Commands::Pending { json } => run_pending(&owner, json, &db_path).await?,
        Commands::Show { id } => run_show(&owner, &id, &db_path).await?,
        Commands::Resolve {
            id,
            resolution,
            client_data,
        } => {
            run_resolve(
                &owner,
                &id,
                &resolution,
                client_data.as_deref(),
                &db_path,
            )
            .await?;
        }
        Commands::Retry { id } => run_retry(&owner, &id, &db_path).await?,
        Commands::Purge { older_than_days } => {
            run_purge(&owner, older_than_days, &db_path).await?;
        }
    }

    Ok(())
}

async fn run_enqueue(
    owner: &str,
    action_type: &str,
    data: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let data = parse_json_arg("action data", data)?;
    let service = open_service(db_path, SyncPolicy::default()).await?;
    let record = service.enqueue(owner, action_type, data).await?;

    println!("{}", record.id);
    Ok(())
}

async fn run_sync(
    owner: &str,
    policy: SyncPolicy,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path, policy).await?;
    let summary = service.sync_all(owner).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", format_summary(&summary));
    }
    Ok(())
}

async fn run_pending(owner: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, SyncPolicy::default()).await?;
    let records = service.list_pending(owner).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No unresolved actions.");
        return Ok(());
    }

    for line in format_action_lines(&records, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}

async fn run_show(owner: &str, id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_action_id(id)?;
    let service = open_service(db_path, SyncPolicy::default()).await?;
    let record = service
        .get_action(owner, &id)
        .await?
        .ok_or_else(|| CliError::ActionNotFound(id.to_string()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn run_resolve(
    owner: &str,
    id: &str,
    resolution: &str,
    client_data: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let id = parse_action_id(id)?;
    let resolution: ConflictResolution = resolution.parse()?;
    let client_data = client_data
        .map(|raw| parse_json_arg("--client-data", raw))
        .transpose()?;

    let service = open_service(db_path, SyncPolicy::default()).await?;
    let record = service.resolve(owner, &id, resolution, client_data).await?;

    println!("{}", format_transition(&record));
    Ok(())
}

async fn run_retry(owner: &str, id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_action_id(id)?;
    let service = open_service(db_path, SyncPolicy::default()).await?;
    let record = service.retry_failed(owner, &id).await?;

    println!("{}", format_transition(&record));
    Ok(())
}

async fn run_purge(owner: &str, older_than_days: u32, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, SyncPolicy::default()).await?;
    let deleted = service.purge(owner, older_than_days).await?;

    println!("Deleted {deleted} synced action(s) older than {older_than_days} day(s)");
    Ok(())
}

async fn open_service(path: &Path, policy: SyncPolicy) -> Result<SyncService, CliError> {
    Ok(SyncService::open_path(path, policy).await?)
}

fn sync_policy(max_retries: Option<u32>, halt_on_failure: bool) -> Result<SyncPolicy, CliError> {
    let mut policy = SyncPolicy {
        halt_on_failure,
        ..SyncPolicy::default()
    };
    if let Some(max_retries) = max_retries {
        if !(1..=MAX_RETRIES_LIMIT).contains(&max_retries) {
            return Err(CliError::InvalidMaxRetries);
        }
        policy.max_retries = max_retries;
    }
    Ok(policy)
}

fn parse_action_id(id: &str) -> Result<ActionId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyActionId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidActionId(trimmed.to_string()))
}

fn parse_json_arg(field: &'static str, raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw.trim()).map_err(|error| CliError::InvalidJson {
        field,
        message: error.to_string(),
    })
}

fn format_summary(summary: &SyncSummary) -> String {
    if summary.attempted() == 0 {
        return "Nothing to sync".to_string();
    }
    format!(
        "Attempted {}: {} synced, {} failed, {} conflict(s)",
        summary.attempted(),
        summary.synced,
        summary.failed,
        summary.conflicts
    )
}

fn format_transition(record: &ActionRecord) -> String {
    format!(
        "{} {} -> {}",
        record.id,
        record.action_type(),
        record.status
    )
}

fn format_action_lines(records: &[ActionRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let mut line = format!(
                "{}  {:<8}  {:<22}  retries={}  {}",
                record.id,
                record.status.as_str(),
                record.action_type().as_str(),
                record.retry_count,
                format_relative_time(record.created_at, now_ms)
            );
            if let Some(error) = &record.error_message {
                line.push_str("  ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format_timestamp(timestamp_ms)
    }
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

fn resolve_owner(cli_owner: Option<String>) -> Result<String, CliError> {
    cli_owner
        .or_else(|| env::var("STUDYSYNC_OWNER").ok())
        .map(|owner| owner.trim().to_string())
        .filter(|owner| !owner.is_empty())
        .ok_or(CliError::MissingOwner)
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STUDYSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studysync")
        .join("studysync.db")
}
