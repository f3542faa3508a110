//! Progress reporting
//!
//! Pure projections of a [`QueueSnapshot`] for display, plus the selection
//! helpers used for partial-failure recovery.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::queue::{CurrentWait, EntryStatus, LogEntry, QueueSnapshot, RunnerState};
use crate::types::{is_profile_destination, PROFILE_PREFIX};

/// Human label for a destination: `r/<name>` or `u/<handle> (profile)`
pub fn display_label(subreddit: &str) -> String {
    if is_profile_destination(subreddit) {
        format!("u/{} (profile)", &subreddit[PROFILE_PREFIX.len()..])
    } else {
        format!("r/{}", subreddit)
    }
}

/// One row of the progress display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub index: usize,
    pub label: String,
    pub status: EntryStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// Summary of a run's log at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub state: RunnerState,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub queued: usize,
    /// An item is posting or a cooldown is pending
    pub active: bool,
    pub current_wait: Option<CurrentWait>,
    pub rows: Vec<ProgressRow>,
}

impl ProgressReport {
    pub fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        Self::compute(
            snapshot.state,
            &snapshot.log,
            snapshot.current_wait,
            snapshot.total,
        )
    }

    pub fn compute(
        state: RunnerState,
        log: &[LogEntry],
        current_wait: Option<CurrentWait>,
        total: usize,
    ) -> Self {
        let count = |status: EntryStatus| log.iter().filter(|e| e.status == status).count();
        let posting = log.iter().any(|e| e.status == EntryStatus::Posting);

        let mut rows: Vec<ProgressRow> = log
            .iter()
            .map(|e| ProgressRow {
                index: e.index,
                label: display_label(&e.subreddit),
                status: e.status,
                url: e.url.clone(),
                error: e.error.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.index);

        Self {
            state,
            total,
            succeeded: count(EntryStatus::Success),
            failed: count(EntryStatus::Error),
            queued: count(EntryStatus::Queued),
            active: posting || current_wait.is_some(),
            current_wait,
            rows,
        }
    }

    /// One-line status, e.g. "2/5 posted, 1 failed, next in 7s"
    pub fn summary_line(&self) -> String {
        let mut line = format!("{}/{} posted", self.succeeded, self.total);
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", self.failed));
        }
        if let Some(wait) = self.current_wait {
            line.push_str(&format!(", next in {}s", wait.remaining));
        }
        line
    }
}

/// Destinations that succeeded, to be removed from the selection
pub fn unselect_succeeded(log: &[LogEntry]) -> BTreeSet<String> {
    log.iter()
        .filter(|e| e.status == EntryStatus::Success)
        .map(|e| e.subreddit.clone())
        .collect()
}

/// Destinations that did not succeed (failed or never attempted), in queue order
pub fn remaining_destinations(log: &[LogEntry]) -> Vec<String> {
    let mut entries: Vec<&LogEntry> = log
        .iter()
        .filter(|e| e.status != EntryStatus::Success)
        .collect();
    entries.sort_by_key(|e| e.index);
    entries.into_iter().map(|e| e.subreddit.clone()).collect()
}
