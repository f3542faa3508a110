use anyhow::{Context, Result};
use clap::Parser;
use libcrosspost::config::{resolve_db_path, Config};
use libcrosspost::progress::display_label;
use libcrosspost::{CrosspostError, Database, EntryStatus, RunItemRecord, RunSummary};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "cross-history")]
#[command(version, about = "Inspect stored cross-post runs")]
#[command(long_about = r#"Inspect stored cross-post runs.

EXAMPLES:
    # Show the last 20 runs (default)
    cross-history

    # Runs since a date
    cross-history --since "2025-10-01"

    # Every destination of one run
    cross-history 3f2a9c1e-...

    # Destinations that did not succeed, comma-separated
    cross-history 3f2a9c1e-... --failed

    # Post the failed ones again under a new title
    cross-post -t "Second try" -b "..." "$(cross-history 3f2a9c1e-... --failed)"

    # JSON output for scripting
    cross-history --format json | jq '.[] | select(.failed > 0) | .id'

OUTPUT FORMATS:
    text  - Human-readable (default)
    json  - JSON array
    jsonl - One JSON object per line
    csv   - CSV with headers

EXIT CODES:
    0 - Success (including empty results)
    1 - Error (database not found, query failed, etc.)
    3 - Unknown run ID or invalid arguments
"#)]
struct Args {
    /// Show the destinations of this run
    #[arg(value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Print only the destinations that did not succeed, comma-separated
    #[arg(long, requires = "run_id")]
    failed: bool,

    /// Show runs since this date (Unix timestamp, YYYY-MM-DD, or ISO 8601)
    #[arg(long, value_name = "DATE", conflicts_with = "run_id")]
    since: Option<String>,

    /// Maximum number of runs to list
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl", "csv"])]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// A run as printed in listings
#[derive(Debug, Serialize)]
struct RunEntry {
    id: String,
    title: String,
    created_at: i64,
    finished_at: Option<i64>,
    state: String,
    retry_of: Option<String>,
    total: usize,
    succeeded: usize,
    failed: usize,
}

impl From<RunSummary> for RunEntry {
    fn from(summary: RunSummary) -> Self {
        Self {
            id: summary.run.id,
            title: summary.run.title,
            created_at: summary.run.created_at,
            finished_at: summary.run.finished_at,
            state: summary.run.state.to_string(),
            retry_of: summary.run.retry_of,
            total: summary.total,
            succeeded: summary.succeeded,
            failed: summary.failed,
        }
    }
}

/// One destination of a run
#[derive(Debug, Serialize)]
struct ItemEntry {
    index: usize,
    subreddit: String,
    kind: String,
    status: String,
    url: Option<String>,
    error: Option<String>,
}

impl From<RunItemRecord> for ItemEntry {
    fn from(record: RunItemRecord) -> Self {
        Self {
            index: record.index,
            subreddit: record.subreddit,
            kind: record.item.kind.to_string(),
            status: record.status.to_string(),
            url: record.url,
            error: record.error,
        }
    }
}

/// Parse date string to Unix timestamp
fn parse_date(date_str: &str) -> Result<i64> {
    if let Ok(timestamp) = date_str.parse::<i64>() {
        return Ok(timestamp);
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date_str) {
        return Ok(dt.timestamp());
    }

    chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .with_context(|| {
            format!(
                "Invalid date format: {}. Use Unix timestamp or ISO 8601 (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ)",
                date_str
            )
        })
}

fn format_time(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    libcrosspost::logging::init_from_env(args.verbose);

    tracing::debug!("cross-history started with args: {:?}", args);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<CrosspostError>()
            .map_or(1, CrosspostError::exit_code);
        std::process::exit(code);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let db_path = resolve_db_path(&config.database.path);

    if !db_path.exists() {
        eprintln!("Error: Database not found at {}", db_path.display());
        eprintln!("Have you posted anything yet? Try: cross-post -t \"Hello\" -b \"...\" <subreddits>");
        std::process::exit(1);
    }

    let db_path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let db = Database::new(db_path_str)
        .await
        .context("Failed to open database")?;

    match &args.run_id {
        Some(run_id) => show_run(&db, run_id, &args).await,
        None => list_runs(&db, &args).await,
    }
}

async fn list_runs(db: &Database, args: &Args) -> Result<()> {
    let since = args.since.as_deref().map(parse_date).transpose()?;
    let entries: Vec<RunEntry> = db
        .list_runs(since, args.limit)
        .await
        .context("Failed to query runs")?
        .into_iter()
        .map(RunEntry::from)
        .collect();

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        "jsonl" => {
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        }
        "csv" => {
            println!("id,created_at,state,total,succeeded,failed,title");
            for entry in &entries {
                println!(
                    "{},{},{},{},{},{},{}",
                    entry.id,
                    entry.created_at,
                    entry.state,
                    entry.total,
                    entry.succeeded,
                    entry.failed,
                    csv_field(&entry.title)
                );
            }
        }
        _ => {
            for entry in &entries {
                let mut counts = format!("{}/{} posted", entry.succeeded, entry.total);
                if entry.failed > 0 {
                    counts.push_str(&format!(", {} failed", entry.failed));
                }
                println!(
                    "{} | {} | {} | {} | {}",
                    format_time(entry.created_at),
                    entry.id,
                    entry.state,
                    counts,
                    entry.title
                );
            }
        }
    }

    Ok(())
}

async fn show_run(db: &Database, run_id: &str, args: &Args) -> Result<()> {
    let run = db
        .get_run(run_id)
        .await?
        .ok_or_else(|| CrosspostError::InvalidInput(format!("Run not found: {}", run_id)))?;
    let records = db.get_run_items(run_id).await?;

    if args.failed {
        let remaining: Vec<&str> = records
            .iter()
            .filter(|r| r.status != EntryStatus::Success)
            .map(|r| r.subreddit.as_str())
            .collect();
        if !remaining.is_empty() {
            println!("{}", remaining.join(","));
        }
        return Ok(());
    }

    let items: Vec<ItemEntry> = records.into_iter().map(ItemEntry::from).collect();

    match args.format.as_str() {
        "json" => {
            let output = serde_json::json!({
                "id": run.id,
                "title": run.title,
                "created_at": run.created_at,
                "finished_at": run.finished_at,
                "state": run.state,
                "items": items,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "jsonl" => {
            for item in &items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        "csv" => {
            println!("index,subreddit,kind,status,url,error");
            for item in &items {
                println!(
                    "{},{},{},{},{},{}",
                    item.index,
                    item.subreddit,
                    item.kind,
                    item.status,
                    item.url.as_deref().unwrap_or(""),
                    csv_field(item.error.as_deref().unwrap_or(""))
                );
            }
        }
        _ => {
            println!(
                "{} | {} | {} | {}",
                format_time(run.created_at),
                run.id,
                run.state,
                run.title
            );
            for item in &items {
                let label = display_label(&item.subreddit);
                match (item.url.as_deref(), item.error.as_deref()) {
                    (Some(url), _) => println!("  ✓ {}: {}", label, url),
                    (None, Some(error)) => println!("  ✗ {}: {}", label, error),
                    (None, None) => println!("  - {}: {}", label, item.status),
                }
            }
        }
    }

    Ok(())
}
