//! Crosspost - submit one post to many subreddits
//!
//! This library resolves a composed post into one queue item per destination,
//! submits the items one at a time with a cooldown between successes, and
//! keeps a history of runs so failed destinations can be retried.

pub mod config;
pub mod db;
pub mod destinations;
pub mod error;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod service;
pub mod submitters;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, RunItemRecord, RunRecord, RunSummary};
pub use error::{CrosspostError, Result};
pub use queue::{EntryStatus, QueueRunner, QueueSettings, QueueSnapshot, RunnerState};
pub use types::{PostContent, PostKind, QueueItemData};
