//! Event system for progress tracking
//!
//! This module provides an in-process event bus for distributing run progress
//! to subscribers without blocking the queue runner.
//!
//! # Architecture
//!
//! The event bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! The queue runner emits one event per state change (item posting, item
//! outcome, countdown tick) so a subscriber sees the full ordered history of a
//! run, while `QueueRunner::subscribe` only ever shows the latest snapshot.
//!
//! # Non-Blocking Behavior
//!
//! If no subscribers exist, events are dropped immediately. Subscribers can
//! lag without blocking the runner; lagging subscribers lose the oldest
//! events first.
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::service::events::{EventBus, Event};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::ItemPosting {
//!     run_id: "abc123".to_string(),
//!     index: 0,
//!     subreddit: "rust".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::RunnerState;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Never blocks and never fails; with no subscribers the event is dropped.
    pub fn emit(&self, event: Event) {
        // send() only errors when nobody is listening
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started with these destinations, in queue order
    RunStarted {
        run_id: String,
        destinations: Vec<String>,
    },

    /// The item at `index` is being submitted
    ItemPosting {
        run_id: String,
        index: usize,
        subreddit: String,
    },

    /// The item at `index` was posted
    ItemSucceeded {
        run_id: String,
        index: usize,
        subreddit: String,
        url: String,
    },

    /// The item at `index` failed; `error` is the submitter's message
    ItemFailed {
        run_id: String,
        index: usize,
        subreddit: String,
        error: String,
    },

    /// Cooldown after item `index`; emitted when the wait starts and on each tick
    WaitTick {
        run_id: String,
        index: usize,
        remaining: u64,
    },

    /// The run ended (completed or cancelled)
    RunFinished {
        run_id: String,
        state: RunnerState,
        succeeded: usize,
        failed: usize,
    },
}

impl Event {
    pub fn run_id(&self) -> &str {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::ItemPosting { run_id, .. }
            | Event::ItemSucceeded { run_id, .. }
            | Event::ItemFailed { run_id, .. }
            | Event::WaitTick { run_id, .. }
            | Event::RunFinished { run_id, .. } => run_id,
        }
    }
}
