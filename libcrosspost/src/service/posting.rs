//! Posting service
//!
//! Turns a composed post into a queue, runs it through the [`QueueRunner`]
//! and records the outcome in the run history. Retries re-run only the
//! destinations of a stored run that did not succeed.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use super::events::EventBus;
use crate::db::{Database, RunRecord};
use crate::destinations::{self, ResolveRequest};
use crate::error::{CrosspostError, Result};
use crate::progress::ProgressReport;
use crate::queue::{CancelHandle, QueueRunner, QueueSettings, QueueSnapshot, RunnerState};
use crate::submitters::{Identity, Submitter};
use crate::types::{PostContent, PostKind, QueueItemData};

/// Reddit rejects titles longer than this many characters
pub const MAX_TITLE_LEN: usize = 300;

/// Request to cross-post
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub resolve: ResolveRequest,
    /// Accept a text post without body
    pub allow_empty_body: bool,
}

/// Outcome of a run started by the service
#[derive(Debug, Clone)]
pub struct PostResponse {
    pub run_id: String,
    pub snapshot: QueueSnapshot,
    pub report: ProgressReport,
}

impl PostResponse {
    fn new(snapshot: QueueSnapshot) -> Self {
        Self {
            run_id: snapshot.run_id.clone().unwrap_or_default(),
            report: ProgressReport::from_snapshot(&snapshot),
            snapshot,
        }
    }

    /// Every destination was posted
    pub fn overall_success(&self) -> bool {
        self.snapshot.state == RunnerState::Completed && self.report.succeeded == self.report.total
    }
}

/// The destinations a retry would post, and the run they come from
#[derive(Debug, Clone)]
pub struct RetryPlan {
    /// Newest attempt in the retry chain of the requested run
    pub source_run_id: String,
    pub items: Vec<QueueItemData>,
}

/// Posting service
#[derive(Clone)]
pub struct PostingService {
    db: Arc<Database>,
    runner: Arc<QueueRunner>,
    identity: Option<Arc<dyn Identity>>,
}

impl PostingService {
    pub fn new(
        db: Arc<Database>,
        submitter: Arc<dyn Submitter>,
        settings: QueueSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            runner: Arc::new(QueueRunner::new(submitter, settings, event_bus)),
            identity: None,
        }
    }

    /// Look up the user's handle from `identity` for profile posts
    pub fn with_identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Resolve and validate a request without posting anything
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty or overlong title, an empty text
    /// post (unless allowed), or when no destination is selected.
    pub async fn plan(&self, request: &PostRequest) -> Result<Vec<QueueItemData>> {
        let title = request.resolve.title.trim();
        if title.is_empty() {
            return Err(CrosspostError::InvalidInput(
                "Title cannot be empty".to_string(),
            ));
        }

        let mut resolve = request.resolve.clone();
        resolve.title = title.to_string();
        if resolve.post_to_profile && resolve.username.is_none() {
            if let Some(identity) = &self.identity {
                resolve.username = Some(identity.username().await?);
            }
        }

        let items = destinations::resolve(&resolve)?;
        if items.is_empty() {
            return Err(CrosspostError::InvalidInput(
                "No destinations selected".to_string(),
            ));
        }

        for item in &items {
            validate_item(item, request.allow_empty_body)?;
        }

        Ok(items)
    }

    /// Post to every destination of the request
    ///
    /// Individual destination failures are part of the response, not errors.
    pub async fn post(&self, request: PostRequest) -> Result<PostResponse> {
        let items = self.plan(&request).await?;
        self.run(items).await
    }

    /// Find what a retry of `run_id` would post
    ///
    /// A run that was already retried continues from its newest retry, so
    /// destinations an earlier retry posted are not posted again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the run does not exist or every destination
    /// already succeeded.
    pub async fn plan_retry(&self, run_id: &str) -> Result<RetryPlan> {
        if self.db.get_run(run_id).await?.is_none() {
            return Err(CrosspostError::InvalidInput(format!(
                "Run not found: {}",
                run_id
            )));
        }

        let mut source = run_id.to_string();
        while let Some(newer) = self.db.latest_retry(&source).await? {
            info!("Run {} was retried as {}", source, newer);
            source = newer;
        }

        let items = self.db.retry_items(&source).await?;
        if items.is_empty() {
            let message = if source == run_id {
                format!("Run {} has nothing to retry", run_id)
            } else {
                format!(
                    "Run {} has nothing to retry (latest retry: {})",
                    run_id, source
                )
            };
            return Err(CrosspostError::InvalidInput(message));
        }

        Ok(RetryPlan {
            source_run_id: source,
            items,
        })
    }

    /// Re-run the destinations of a stored run that did not succeed
    ///
    /// # Errors
    ///
    /// See [`PostingService::plan_retry`].
    pub async fn retry(&self, run_id: &str) -> Result<PostResponse> {
        let plan = self.plan_retry(run_id).await?;
        info!(
            "Retrying {} destination(s) of run {}",
            plan.items.len(),
            plan.source_run_id
        );
        self.execute(plan.items, Some(plan.source_run_id)).await
    }

    /// Run the queue and record it; history failures are logged, not returned
    pub async fn run(&self, items: Vec<QueueItemData>) -> Result<PostResponse> {
        self.execute(items, None).await
    }

    async fn execute(
        &self,
        items: Vec<QueueItemData>,
        retry_of: Option<String>,
    ) -> Result<PostResponse> {
        let created_at = chrono::Utc::now().timestamp();
        let snapshot = self.runner.start(items.clone()).await?;

        if let Err(e) = self.record(created_at, retry_of, &items, &snapshot).await {
            warn!("Failed to record run history: {}", e);
        }

        Ok(PostResponse::new(snapshot))
    }

    async fn record(
        &self,
        created_at: i64,
        retry_of: Option<String>,
        items: &[QueueItemData],
        snapshot: &QueueSnapshot,
    ) -> Result<()> {
        let Some(run_id) = snapshot.run_id.as_deref() else {
            return Ok(());
        };
        let title = items.first().map(|i| i.title.clone()).unwrap_or_default();

        self.db
            .create_run(&RunRecord {
                id: run_id.to_string(),
                title,
                created_at,
                finished_at: None,
                state: RunnerState::Running,
                retry_of,
            })
            .await?;
        self.db.record_items(run_id, items, &snapshot.log).await?;
        self.db.finish_run(run_id, snapshot.state).await
    }

    /// Stop the active run after its in-flight submission
    pub fn cancel(&self) {
        self.runner.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.runner.cancel_handle()
    }

    /// Watch the runner's latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.runner.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.runner.snapshot()
    }
}

fn validate_item(item: &QueueItemData, allow_empty_body: bool) -> Result<()> {
    let title = item.effective_title();
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CrosspostError::InvalidInput(format!(
            "Title for {} is {} characters (max {})",
            item.subreddit,
            title.chars().count(),
            MAX_TITLE_LEN
        )));
    }

    if let (PostKind::SelfText, PostContent::Text(text)) = (&item.kind, &item.content) {
        if text.trim().is_empty() && !allow_empty_body {
            return Err(CrosspostError::InvalidInput(
                "Post has no body, link or media (use --allow-empty to post a title only)"
                    .to_string(),
            ));
        }
    }

    item.validate()
        .map_err(|e| CrosspostError::InvalidInput(e.message().to_string()))
}
