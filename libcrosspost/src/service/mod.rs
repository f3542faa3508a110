//! Service layer for Crosspost
//!
//! `CrosspostService` bundles the shared resources (configuration, run
//! history, event bus) with the posting service, so the binaries only build
//! a submitter and hand it over.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosspost::destinations::ResolveRequest;
//! use libcrosspost::service::CrosspostService;
//! use libcrosspost::service::posting::PostRequest;
//! use libcrosspost::submitters::mock::MockSubmitter;
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let service = CrosspostService::new(Arc::new(MockSubmitter::success()), None).await?;
//!
//! let request = PostRequest {
//!     resolve: ResolveRequest {
//!         subreddits: vec!["rust".to_string(), "programming".to_string()],
//!         title: "Hello".to_string(),
//!         body: Some("Posted everywhere".to_string()),
//!         ..Default::default()
//!     },
//!     allow_empty_body: false,
//! };
//!
//! let response = service.posting().post(request).await?;
//! println!("{}", response.report.summary_line());
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod posting;

use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::posting::PostingService;
use crate::config::resolve_db_path;
use crate::error::ConfigError;
use crate::submitters::{Identity, Submitter};
use crate::{Config, Database, Result};

/// Main service facade
pub struct CrosspostService {
    db: Arc<Database>,
    config: Arc<Config>,
    posting: PostingService,
    event_bus: EventBus,
}

impl CrosspostService {
    /// Create a service from the default configuration
    pub async fn new(
        submitter: Arc<dyn Submitter>,
        identity: Option<Arc<dyn Identity>>,
    ) -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config, submitter, identity).await
    }

    /// Create a service with a custom configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn from_config(
        config: Config,
        submitter: Arc<dyn Submitter>,
        identity: Option<Arc<dyn Identity>>,
    ) -> Result<Self> {
        let db_path = resolve_db_path(&config.database.path);
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| ConfigError::MissingField("valid database path".to_string()))?;
        let db = Arc::new(Database::new(db_path_str).await?);

        let event_bus = EventBus::new(256);
        let mut posting = PostingService::new(
            Arc::clone(&db),
            submitter,
            config.queue.settings(),
            event_bus.clone(),
        );
        if let Some(identity) = identity {
            posting = posting.with_identity(identity);
        }

        Ok(Self {
            db,
            config: Arc::new(config),
            posting,
            event_bus,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    /// Subscribe to run events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, QueueConfig, RedditConfig};
    use crate::destinations::ResolveRequest;
    use crate::service::events::Event;
    use crate::service::posting::PostRequest;
    use crate::submitters::mock::MockSubmitter;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            database: DatabaseConfig {
                path: dir.path().join("runs.db").to_str().unwrap().to_string(),
            },
            reddit: RedditConfig::default(),
            queue: QueueConfig { cooldown_secs: 0 },
        }
    }

    #[tokio::test]
    async fn test_events_reach_facade_subscribers() {
        let dir = TempDir::new().unwrap();
        let service = CrosspostService::from_config(
            config(&dir),
            Arc::new(MockSubmitter::success()),
            None,
        )
        .await
        .unwrap();
        let mut events = service.subscribe();

        let response = service
            .posting()
            .post(PostRequest {
                resolve: ResolveRequest {
                    subreddits: vec!["a".to_string()],
                    title: "T".to_string(),
                    body: Some("B".to_string()),
                    ..Default::default()
                },
                allow_empty_body: false,
            })
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, Event::RunStarted { .. }));
        assert_eq!(first.run_id(), response.run_id);

        let runs = service.database().list_runs(None, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(service.config().queue.cooldown_secs, 0);
    }
}
