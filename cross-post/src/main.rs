//! cross-post - Submit one post to several subreddits

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libcrosspost::destinations::{normalize_subreddit, MediaMode, ResolveRequest};
use libcrosspost::logging;
use libcrosspost::progress::display_label;
use libcrosspost::queue::CancelHandle;
use libcrosspost::service::events::{Event, EventReceiver};
use libcrosspost::service::posting::{PostRequest, PostResponse};
use libcrosspost::service::CrosspostService;
use libcrosspost::submitters::mock::MockSubmitter;
use libcrosspost::submitters::reddit::RedditSubmitter;
use libcrosspost::submitters::{FixedIdentity, Identity, Submitter};
use libcrosspost::types::{MediaFile, QueueItemData};
use libcrosspost::{Config, CrosspostError, EntryStatus};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "cross-post")]
#[command(version)]
#[command(about = "Submit one post to several subreddits")]
#[command(long_about = "\
cross-post - Submit one post to several subreddits

DESCRIPTION:
    Posts the same title and content to every listed subreddit (and
    optionally your own profile), one at a time. After each successful
    submission it waits for the configured cooldown before the next one.
    A failing subreddit never stops the run.

    Every run is stored. Use `cross-post --retry RUN_ID` to post again to
    the destinations that did not succeed, or `cross-history` to inspect
    past runs. Retrying a run that was already retried continues from its
    latest retry, so nothing is posted twice.

USAGE:
    cross-post -t \"Hello\" -b \"Body text\" rust,programming
    cross-post -t \"My cat\" --file cat.jpg aww cats --flair aww=abc123
    cross-post -t \"Read this\" --url https://example.com --profile rust
    cross-post -t \"Clip\" --file clip.mp4 --poster frame.jpg videos
    cross-post --retry 3f2a...

SIGNALS:
    SIGINT, SIGTERM - Cancel the run after the current submission; a second
                      signal exits immediately (status 130)

EXIT CODES:
    0 - Every destination was posted
    1 - Some destinations failed or the run was cancelled
    2 - Authentication error
    3 - Invalid input
")]
struct Cli {
    /// Subreddits to post to (comma-separated or repeated; `r/` prefix optional)
    #[arg(value_delimiter = ',')]
    subreddits: Vec<String>,

    /// Post title
    #[arg(short, long, required_unless_present = "retry")]
    title: Option<String>,

    /// Text body; `-` reads it from stdin
    #[arg(short, long)]
    body: Option<String>,

    /// Link to submit instead of media
    #[arg(short, long, conflicts_with = "file")]
    url: Option<String>,

    /// Image or video to upload (repeat for a gallery)
    #[arg(long, value_name = "PATH")]
    file: Vec<String>,

    /// Still image shown before an uploaded video plays (required for videos)
    #[arg(long, value_name = "PATH")]
    poster: Option<String>,

    /// Caption for uploaded files, also used as text when there is no body
    #[arg(long)]
    caption: Option<String>,

    /// Also post to your own profile
    #[arg(long)]
    profile: bool,

    /// Flair for a subreddit, as SUBREDDIT=FLAIR_ID
    #[arg(long, value_name = "SUB=ID", value_parser = parse_key_val)]
    flair: Vec<(String, String)>,

    /// Text appended to the title for a subreddit, as SUBREDDIT=SUFFIX
    #[arg(long, value_name = "SUB=TEXT", value_parser = parse_key_val)]
    suffix: Vec<(String, String)>,

    /// Replacement title for a subreddit, as SUBREDDIT=TITLE
    #[arg(long, value_name = "SUB=TITLE", value_parser = parse_key_val)]
    custom_title: Vec<(String, String)>,

    /// Allow a text post with no body
    #[arg(long)]
    allow_empty: bool,

    /// Wait between successful submissions (e.g. "10s", "1m"; overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    cooldown: Option<Duration>,

    /// Re-run the destinations of a stored run that did not succeed
    #[arg(long, value_name = "RUN_ID", conflicts_with_all = ["subreddits", "title"])]
    retry: Option<String>,

    /// Print the resolved queue without posting
    #[arg(long)]
    dry_run: bool,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Use an offline submitter instead of Reddit
    #[arg(long, hide = true)]
    mock: bool,

    /// Make the offline submitter reject this subreddit
    #[arg(long, hide = true, value_name = "SUB")]
    mock_fail: Vec<String>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SUBREDDIT=VALUE, got '{}'", s))?;
    let key = normalize_subreddit(key);
    if key.is_empty() {
        return Err(format!("missing subreddit in '{}'", s));
    }
    Ok((key, value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_from_env(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<CrosspostError>()
                .map_or(1, CrosspostError::exit_code);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(cooldown) = cli.cooldown {
        config.queue.cooldown_secs = cooldown.as_secs();
    }

    let (submitter, identity) = build_submitter(&cli, &config)?;
    let service = CrosspostService::from_config(config, submitter, identity).await?;
    let json = cli.format == "json";

    if let Some(run_id) = &cli.retry {
        if cli.dry_run {
            let plan = service.posting().plan_retry(run_id).await?;
            print_plan(&plan.items, json)?;
            return Ok(0);
        }
        let response = execute(&service, json, |posting| async move {
            posting.retry(run_id).await
        })
        .await?;
        return report(&response, json);
    }

    let request = build_request(&cli)?;
    if cli.dry_run {
        let items = service.posting().plan(&request).await?;
        print_plan(&items, json)?;
        return Ok(0);
    }

    let response = execute(&service, json, |posting| async move {
        posting.post(request).await
    })
    .await?;
    report(&response, json)
}

fn build_submitter(
    cli: &Cli,
    config: &Config,
) -> anyhow::Result<(Arc<dyn Submitter>, Option<Arc<dyn Identity>>)> {
    let configured: Option<Arc<dyn Identity>> = config
        .reddit
        .username
        .clone()
        .map(|name| Arc::new(FixedIdentity(name)) as Arc<dyn Identity>);

    if cli.mock || cli.dry_run {
        let mut mock = MockSubmitter::success();
        for sub in &cli.mock_fail {
            mock = mock.fail_on(&normalize_subreddit(sub), "rejected by mock submitter");
        }
        let identity = configured.or_else(|| {
            cli.mock
                .then(|| Arc::new(FixedIdentity("mock-user".to_string())) as Arc<dyn Identity>)
        });
        let submitter: Arc<dyn Submitter> = Arc::new(mock);
        return Ok((submitter, identity));
    }

    let reddit = Arc::new(RedditSubmitter::new(&config.reddit)?);
    let identity = configured.unwrap_or_else(|| Arc::clone(&reddit) as Arc<dyn Identity>);
    let submitter: Arc<dyn Submitter> = reddit;
    Ok((submitter, Some(identity)))
}

fn build_request(cli: &Cli) -> anyhow::Result<PostRequest> {
    let body = match cli.body.as_deref() {
        Some("-") => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read body from stdin")?;
            Some(buffer)
        }
        other => other.map(str::to_string),
    };

    let mut files = Vec::with_capacity(cli.file.len());
    for path in &cli.file {
        let mut file = MediaFile::from_path(path).ok_or_else(|| {
            CrosspostError::InvalidInput(format!("Unsupported media file: {}", path))
        })?;
        if let Some(caption) = &cli.caption {
            file = file.with_caption(caption.clone());
        }
        if let Some(poster) = cli.poster.as_deref().filter(|_| file.media_type.is_video()) {
            file = file.with_poster(poster);
        }
        files.push(file);
    }
    if cli.poster.is_some() && !files.iter().any(|f| f.media_type.is_video()) {
        return Err(CrosspostError::InvalidInput(
            "--poster only applies to a video upload".to_string(),
        )
        .into());
    }

    let media_mode = if files.is_empty() && cli.url.is_some() {
        MediaMode::Url
    } else {
        MediaMode::Files
    };

    Ok(PostRequest {
        resolve: ResolveRequest {
            subreddits: cli.subreddits.clone(),
            post_to_profile: cli.profile,
            username: None,
            media_mode,
            title: cli.title.clone().unwrap_or_default(),
            body,
            caption: cli.caption.clone(),
            url: cli.url.clone(),
            files,
            flairs: cli.flair.iter().cloned().collect(),
            title_suffixes: cli.suffix.iter().cloned().collect(),
            custom_titles: cli.custom_title.iter().cloned().collect(),
        },
        allow_empty_body: cli.allow_empty,
    })
}

/// Run a posting operation with signal-driven cancellation and live progress
async fn execute<'a, F, Fut>(
    service: &'a CrosspostService,
    json: bool,
    operation: F,
) -> anyhow::Result<PostResponse>
where
    F: FnOnce(&'a libcrosspost::service::posting::PostingService) -> Fut,
    Fut: std::future::Future<Output = libcrosspost::Result<PostResponse>>,
{
    setup_signal_handlers(service.posting().cancel_handle())?;

    let printer = (!json).then(|| tokio::spawn(print_progress(service.subscribe())));
    let result = operation(service.posting()).await;
    if let Some(printer) = printer {
        // A finished run ends the printer on RunFinished; no run means no event
        if result.is_ok() {
            if let Err(e) = printer.await {
                debug!("Progress printer stopped: {}", e);
            }
        } else {
            printer.abort();
        }
    }

    Ok(result?)
}

/// Cancel the run on the first SIGINT/SIGTERM, exit on the second
///
/// Installed before planning starts: a signal that arrives before the queue
/// runs still cancels it, so nothing gets posted.
#[cfg(unix)]
fn setup_signal_handlers(handle: CancelHandle) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;

    std::thread::spawn(move || {
        let mut received = 0;
        for sig in signals.forever() {
            received += 1;
            if received > 1 {
                eprintln!("Interrupted again, exiting");
                std::process::exit(130);
            }
            info!("Received signal {}, cancelling after the current submission", sig);
            eprintln!("Cancelling after the current submission (repeat to exit now)...");
            handle.cancel();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_handle: CancelHandle) -> anyhow::Result<()> {
    Ok(())
}

/// Live progress on stderr
async fn print_progress(mut events: EventReceiver) {
    let mut total = 0;
    while let Ok(event) = events.recv().await {
        match event {
            Event::RunStarted { destinations, .. } => {
                total = destinations.len();
                eprintln!("Posting to {} destination(s)", total);
            }
            Event::ItemPosting {
                index, subreddit, ..
            } => {
                eprintln!("[{}/{}] {} ...", index + 1, total, display_label(&subreddit));
            }
            Event::ItemSucceeded { url, .. } => eprintln!("    posted: {}", url),
            Event::ItemFailed { error, .. } => eprintln!("    failed: {}", error),
            Event::WaitTick { remaining, .. } => {
                if remaining > 0 && (remaining % 5 == 0 || remaining <= 3) {
                    eprintln!("    next in {}s", remaining);
                }
            }
            Event::RunFinished { .. } => break,
        }
    }
}

#[derive(Serialize)]
struct PlannedItem<'a> {
    subreddit: &'a str,
    kind: &'a str,
    title: String,
    flair_id: Option<&'a str>,
}

fn print_plan(items: &[QueueItemData], json: bool) -> anyhow::Result<()> {
    debug!("Planned {} item(s)", items.len());
    let planned: Vec<PlannedItem> = items
        .iter()
        .map(|item| PlannedItem {
            subreddit: &item.subreddit,
            kind: item.kind.as_str(),
            title: item.effective_title(),
            flair_id: item.flair_id.as_deref(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
    } else {
        for item in &planned {
            println!(
                "{}\t{}\t{}",
                display_label(item.subreddit),
                item.kind,
                item.title
            );
        }
    }
    Ok(())
}

fn report(response: &PostResponse, json: bool) -> anyhow::Result<i32> {
    if json {
        let output = serde_json::json!({
            "run_id": response.run_id,
            "state": response.snapshot.state,
            "succeeded": response.report.succeeded,
            "failed": response.report.failed,
            "total": response.report.total,
            "items": response.report.rows,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for row in &response.report.rows {
            match row.status {
                EntryStatus::Success => println!(
                    "ok\t{}\t{}",
                    row.label,
                    row.url.as_deref().unwrap_or_default()
                ),
                EntryStatus::Error => println!(
                    "error\t{}\t{}",
                    row.label,
                    row.error.as_deref().unwrap_or_default()
                ),
                _ => println!("skipped\t{}", row.label),
            }
        }
        println!("run: {}", response.run_id);
        eprintln!("{} ({})", response.report.summary_line(), response.snapshot.state);
    }

    Ok(if response.overall_success() { 0 } else { 1 })
}
