//! Rate-limited posting queue
//!
//! [`QueueRunner`] submits queue items strictly one at a time. Each item moves
//! `queued → posting → success | error`; after a success, if more items
//! remain, the runner counts down a fixed cooldown before the next
//! submission so the Reddit API's abuse limits are not tripped.
//!
//! A failing destination never halts the run. Each destination gets exactly
//! one attempt per run; retrying is done by starting a new run with the
//! destinations that did not succeed (see [`crate::progress`]).
//!
//! # Observing a run
//!
//! The runner owns the run log and the countdown. Observers either watch the
//! latest [`QueueSnapshot`] through [`QueueRunner::subscribe`] or receive the
//! ordered event stream of the [`EventBus`] the runner was built with.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosspost::queue::{QueueRunner, QueueSettings};
//! use libcrosspost::service::events::EventBus;
//! use libcrosspost::submitters::mock::MockSubmitter;
//! # use libcrosspost::types::QueueItemData;
//!
//! # async fn example(items: Vec<QueueItemData>) -> libcrosspost::Result<()> {
//! let runner = QueueRunner::new(
//!     Arc::new(MockSubmitter::success()),
//!     QueueSettings::default(),
//!     EventBus::new(100),
//! );
//!
//! let snapshot = runner.start(items).await?;
//! println!("{:?}: {} entries", snapshot.state, snapshot.log.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::service::events::{Event, EventBus};
use crate::submitters::Submitter;
use crate::types::QueueItemData;

/// Default cooldown between submissions, in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// Status of one log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Queued,
    Posting,
    Success,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Posting => "posting",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Parse the stored representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "posting" => Some(Self::Posting),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record of one queue item within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of the item in the original queue
    pub index: usize,
    pub subreddit: String,
    pub status: EntryStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl LogEntry {
    fn queued(index: usize, subreddit: &str) -> Self {
        Self {
            index,
            subreddit: subreddit.to_string(),
            status: EntryStatus::Queued,
            url: None,
            error: None,
        }
    }
}

/// Cooldown in progress after the item at `index` succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentWait {
    pub index: usize,
    pub seconds: u64,
    pub remaining: u64,
}

/// Lifecycle of the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the runner, published on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub run_id: Option<String>,
    pub state: RunnerState,
    pub log: Vec<LogEntry>,
    pub current_wait: Option<CurrentWait>,
    pub total: usize,
}

impl QueueSnapshot {
    fn idle() -> Self {
        Self {
            run_id: None,
            state: RunnerState::Idle,
            log: Vec::new(),
            current_wait: None,
            total: 0,
        }
    }
}

/// Timing policy for a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Cooldown after a successful submission, in countdown steps
    pub cooldown_secs: u64,
    /// Length of one countdown step
    pub tick: Duration,
}

impl QueueSettings {
    pub fn with_cooldown(cooldown_secs: u64) -> Self {
        Self {
            cooldown_secs,
            ..Self::default()
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            tick: Duration::from_secs(1),
        }
    }
}

/// Cancels the run of the runner it was taken from
///
/// Cheap to clone and safe to move into signal handlers or other tasks.
/// A cancel requested while no run is active applies to the next run, which
/// then ends as `cancelled` without submitting anything. The request is
/// consumed when that run ends.
#[derive(Clone)]
pub struct CancelHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Sequential, rate-limited submission of queue items
pub struct QueueRunner {
    submitter: Arc<dyn Submitter>,
    settings: QueueSettings,
    event_bus: EventBus,
    state: watch::Sender<QueueSnapshot>,
    cancel: Arc<watch::Sender<bool>>,
}

impl QueueRunner {
    pub fn new(submitter: Arc<dyn Submitter>, settings: QueueSettings, event_bus: EventBus) -> Self {
        let (state, _) = watch::channel(QueueSnapshot::idle());
        let (cancel, _) = watch::channel(false);
        Self {
            submitter,
            settings,
            event_bus,
            state,
            cancel: Arc::new(cancel),
        }
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> RunnerState {
        self.state.borrow().state
    }

    /// Watch the runner's snapshot; the receiver always holds the latest value
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.state.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Stop the current run after the in-flight submission, if any
    ///
    /// Entries already recorded keep their status and items not yet attempted
    /// stay `queued`. Has no effect when no run is active.
    pub fn cancel(&self) {
        if self.state() == RunnerState::Running {
            info!("Cancelling run");
            self.cancel.send_replace(true);
        }
    }

    /// Run the queue to completion (or cancellation)
    ///
    /// Returns the final snapshot. Per-item failures are recorded in the log,
    /// never returned as errors.
    ///
    /// # Errors
    ///
    /// - [`QueueError::EmptyQueue`] if `items` is empty
    /// - [`QueueError::AlreadyRunning`] if another run is in progress
    pub async fn start(&self, items: Vec<QueueItemData>) -> Result<QueueSnapshot> {
        if items.is_empty() {
            return Err(QueueError::EmptyQueue.into());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut already_running = false;
        self.state.send_if_modified(|snapshot| {
            if snapshot.state == RunnerState::Running {
                already_running = true;
                return false;
            }
            *snapshot = QueueSnapshot {
                run_id: Some(run_id.clone()),
                state: RunnerState::Running,
                log: items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| LogEntry::queued(index, &item.subreddit))
                    .collect(),
                current_wait: None,
                total: items.len(),
            };
            true
        });
        if already_running {
            return Err(QueueError::AlreadyRunning.into());
        }
        if self.is_cancelled() {
            info!("Run {} was cancelled before it started", run_id);
        }

        info!("Starting run {} with {} item(s)", run_id, items.len());
        self.event_bus.emit(Event::RunStarted {
            run_id: run_id.clone(),
            destinations: items.iter().map(|i| i.subreddit.clone()).collect(),
        });

        let final_state = self.run(&run_id, &items).await;
        self.cancel.send_replace(false);

        self.state.send_modify(|snapshot| {
            snapshot.state = final_state;
            snapshot.current_wait = None;
        });

        let snapshot = self.snapshot();
        let succeeded = count(&snapshot.log, EntryStatus::Success);
        let failed = count(&snapshot.log, EntryStatus::Error);
        info!(
            "Run {} {}: {} succeeded, {} failed, {} not attempted",
            run_id,
            final_state,
            succeeded,
            failed,
            snapshot.total - succeeded - failed
        );
        self.event_bus.emit(Event::RunFinished {
            run_id,
            state: final_state,
            succeeded,
            failed,
        });

        Ok(snapshot)
    }

    async fn run(&self, run_id: &str, items: &[QueueItemData]) -> RunnerState {
        let total = items.len();

        for (index, item) in items.iter().enumerate() {
            if self.is_cancelled() {
                return RunnerState::Cancelled;
            }

            let succeeded = self.process_next(run_id, index, item).await;

            let more = index + 1 < total;
            if !more {
                break;
            }
            if self.is_cancelled() {
                return RunnerState::Cancelled;
            }
            if succeeded && !self.countdown(run_id, index).await {
                return RunnerState::Cancelled;
            }
        }

        RunnerState::Completed
    }

    /// Submit one item and record its outcome; returns true on success
    async fn process_next(&self, run_id: &str, index: usize, item: &QueueItemData) -> bool {
        self.update_entry(index, |entry| entry.status = EntryStatus::Posting);
        self.event_bus.emit(Event::ItemPosting {
            run_id: run_id.to_string(),
            index,
            subreddit: item.subreddit.clone(),
        });
        info!("Posting to {} via {}", item.subreddit, self.submitter.name());

        match self.submitter.submit(item).await {
            Ok(submitted) => {
                info!("Posted to {}: {}", item.subreddit, submitted.url);
                self.update_entry(index, |entry| {
                    entry.status = EntryStatus::Success;
                    entry.url = Some(submitted.url.clone());
                });
                self.event_bus.emit(Event::ItemSucceeded {
                    run_id: run_id.to_string(),
                    index,
                    subreddit: item.subreddit.clone(),
                    url: submitted.url,
                });
                true
            }
            Err(e) => {
                warn!("Failed to post to {}: {}", item.subreddit, e);
                let message = e.message().to_string();
                self.update_entry(index, |entry| {
                    entry.status = EntryStatus::Error;
                    entry.error = Some(message.clone());
                });
                self.event_bus.emit(Event::ItemFailed {
                    run_id: run_id.to_string(),
                    index,
                    subreddit: item.subreddit.clone(),
                    error: message,
                });
                false
            }
        }
    }

    /// Count down the cooldown after item `index`; returns false if cancelled
    async fn countdown(&self, run_id: &str, index: usize) -> bool {
        let seconds = self.settings.cooldown_secs;
        if seconds == 0 {
            return true;
        }

        debug!("Waiting {}s before the next submission", seconds);
        let mut remaining = seconds;
        self.publish_wait(run_id, index, seconds, remaining);

        while remaining > 0 {
            tokio::select! {
                _ = sleep(self.settings.tick) => {}
                _ = cancelled(self.cancel.subscribe()) => {
                    self.state.send_modify(|snapshot| snapshot.current_wait = None);
                    return false;
                }
            }
            remaining -= 1;
            self.publish_wait(run_id, index, seconds, remaining);
        }

        self.state.send_modify(|snapshot| snapshot.current_wait = None);
        true
    }

    fn publish_wait(&self, run_id: &str, index: usize, seconds: u64, remaining: u64) {
        self.state.send_modify(|snapshot| {
            snapshot.current_wait = Some(CurrentWait {
                index,
                seconds,
                remaining,
            });
        });
        self.event_bus.emit(Event::WaitTick {
            run_id: run_id.to_string(),
            index,
            remaining,
        });
    }

    fn update_entry(&self, index: usize, f: impl FnOnce(&mut LogEntry)) {
        self.state.send_modify(|snapshot| {
            if let Some(entry) = snapshot.log.get_mut(index) {
                f(entry);
            }
        });
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Resolves once the cancel flag is set
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn count(log: &[LogEntry], status: EntryStatus) -> usize {
    log.iter().filter(|e| e.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submitters::mock::MockSubmitter;
    use crate::types::{PostContent, PostKind};

    fn items(subs: &[&str]) -> Vec<QueueItemData> {
        subs.iter()
            .map(|s| QueueItemData {
                subreddit: s.to_string(),
                title: "Title".to_string(),
                flair_id: None,
                title_suffix: None,
                custom_title: None,
                kind: PostKind::SelfText,
                content: PostContent::Text("Body".to_string()),
            })
            .collect()
    }

    fn runner(submitter: MockSubmitter, cooldown_secs: u64) -> QueueRunner {
        QueueRunner::new(
            Arc::new(submitter),
            QueueSettings::with_cooldown(cooldown_secs),
            EventBus::new(100),
        )
    }

    #[tokio::test]
    async fn test_empty_queue_is_rejected() {
        let runner = runner(MockSubmitter::success(), 0);

        let result = runner.start(vec![]).await;
        assert!(matches!(
            result,
            Err(crate::CrosspostError::Queue(QueueError::EmptyQueue))
        ));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_success_and_failure_are_isolated() {
        let submitter = MockSubmitter::with_url_base("https://x").fail_on("b", "banned");
        let runner = runner(submitter, 0);

        let snapshot = runner.start(items(&["a", "b"])).await.unwrap();

        assert_eq!(snapshot.state, RunnerState::Completed);
        assert_eq!(snapshot.log[0].index, 0);
        assert_eq!(snapshot.log[0].status, EntryStatus::Success);
        assert_eq!(snapshot.log[0].url.as_deref(), Some("https://x/a"));
        assert_eq!(snapshot.log[1].index, 1);
        assert_eq!(snapshot.log[1].status, EntryStatus::Error);
        assert_eq!(snapshot.log[1].error.as_deref(), Some("banned"));
        assert!(snapshot.current_wait.is_none());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_items() {
        let submitter = MockSubmitter::success().fail_on("a", "nope");
        let calls = submitter.clone();
        let runner = runner(submitter, 0);

        let snapshot = runner.start(items(&["a", "b", "c"])).await.unwrap();

        assert_eq!(calls.submitted(), vec!["a", "b", "c"]);
        assert!(snapshot.log.iter().all(|e| e.status.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_after_success_only() {
        let submitter = MockSubmitter::success().fail_on("a", "nope");
        let runner = runner(submitter, 3);
        let mut events = runner.event_bus.subscribe();

        runner.start(items(&["a", "b", "c"])).await.unwrap();

        let mut ticks = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::WaitTick { index, remaining, .. } = event {
                ticks.push((index, remaining));
            }
        }
        // "a" failed: no wait; "b" succeeded: wait; "c" is last: no wait
        assert_eq!(ticks, vec![(1, 3), (1, 2), (1, 1), (1, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_item_posts_only_after_countdown_reaches_zero() {
        let runner = runner(MockSubmitter::success(), 2);
        let mut events = runner.event_bus.subscribe();

        runner.start(items(&["a", "b"])).await.unwrap();

        let mut last_remaining = None;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::WaitTick { remaining, .. } => {
                    if let Some(previous) = last_remaining {
                        assert!(remaining < previous, "remaining must strictly decrease");
                    }
                    last_remaining = Some(remaining);
                }
                Event::ItemPosting { index: 1, .. } => {
                    assert_eq!(last_remaining, Some(0));
                }
                _ => {}
            }
        }
        assert_eq!(last_remaining, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_takes_cooldown_time() {
        let runner = runner(MockSubmitter::success(), 5);

        let start = tokio::time::Instant::now();
        runner.start(items(&["a", "b"])).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_first_success() {
        let submitter = MockSubmitter::success();
        let calls = submitter.clone();
        let runner = Arc::new(runner(submitter, 10));
        let mut events = runner.event_bus.subscribe();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.start(items(&["a", "b", "c"])).await })
        };

        loop {
            if let Event::ItemSucceeded { index: 0, .. } = events.recv().await.unwrap() {
                runner.cancel();
                break;
            }
        }

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.state, RunnerState::Cancelled);
        assert_eq!(snapshot.log[0].status, EntryStatus::Success);
        assert_eq!(snapshot.log[1].status, EntryStatus::Queued);
        assert_eq!(snapshot.log[2].status, EntryStatus::Queued);
        assert!(snapshot.current_wait.is_none());
        assert_eq!(calls.submitted(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_submission_records_outcome() {
        let submitter = MockSubmitter::with_delay(Duration::from_secs(2));
        let runner = Arc::new(runner(submitter, 0));
        let handle = runner.cancel_handle();
        let mut events = runner.event_bus.subscribe();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.start(items(&["a", "b"])).await })
        };

        loop {
            if let Event::ItemPosting { index: 0, .. } = events.recv().await.unwrap() {
                handle.cancel();
                break;
            }
        }

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.state, RunnerState::Cancelled);
        assert_eq!(snapshot.log[0].status, EntryStatus::Success);
        assert_eq!(snapshot.log[1].status, EntryStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_running_is_rejected() {
        let runner = Arc::new(runner(MockSubmitter::with_delay(Duration::from_secs(1)), 0));
        let mut watcher = runner.subscribe();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.start(items(&["a"])).await })
        };

        watcher
            .wait_for(|s| s.state == RunnerState::Running)
            .await
            .unwrap();
        let second = runner.start(items(&["b"])).await;
        assert!(matches!(
            second,
            Err(crate::CrosspostError::Queue(QueueError::AlreadyRunning))
        ));

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.state, RunnerState::Completed);
        assert_eq!(snapshot.log.len(), 1);
    }

    #[tokio::test]
    async fn test_new_run_restarts_log() {
        let runner = runner(MockSubmitter::success().fail_on("b", "x"), 0);

        let first = runner.start(items(&["a", "b"])).await.unwrap();
        let second = runner.start(items(&["b"])).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.log.len(), 1);
        assert_eq!(second.log[0].subreddit, "b");
        assert_eq!(second.log[0].index, 0);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let runner = runner(MockSubmitter::success(), 0);
        runner.cancel();

        let snapshot = runner.start(items(&["a", "b"])).await.unwrap();
        assert_eq!(snapshot.state, RunnerState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_handle_before_start_cancels_next_run_only() {
        let submitter = MockSubmitter::success();
        let calls = submitter.clone();
        let runner = runner(submitter, 0);
        runner.cancel_handle().cancel();

        let cancelled = runner.start(items(&["a", "b"])).await.unwrap();
        assert_eq!(cancelled.state, RunnerState::Cancelled);
        assert!(cancelled.log.iter().all(|e| e.status == EntryStatus::Queued));
        assert_eq!(calls.call_count(), 0);

        let next = runner.start(items(&["a", "b"])).await.unwrap();
        assert_eq!(next.state, RunnerState::Completed);
        assert!(next.log.iter().all(|e| e.status == EntryStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_on_last_item_does_not_leak_into_next_run() {
        let runner = Arc::new(runner(MockSubmitter::with_delay(Duration::from_secs(1)), 0));
        let handle = runner.cancel_handle();
        let mut events = runner.event_bus.subscribe();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.start(items(&["a"])).await })
        };
        loop {
            if let Event::ItemPosting { .. } = events.recv().await.unwrap() {
                handle.cancel();
                break;
            }
        }
        let first = task.await.unwrap().unwrap();
        assert_eq!(first.log[0].status, EntryStatus::Success);

        let second = runner.start(items(&["b"])).await.unwrap();
        assert_eq!(second.state, RunnerState::Completed);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            EntryStatus::Queued,
            EntryStatus::Posting,
            EntryStatus::Success,
            EntryStatus::Error,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunnerState::parse("cancelled"), Some(RunnerState::Cancelled));
        assert_eq!(EntryStatus::parse("waiting"), None);
    }
}
