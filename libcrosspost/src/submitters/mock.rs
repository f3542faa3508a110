//! Mock submitter implementation for testing
//!
//! Provides a configurable submitter that can succeed, fail for selected
//! destinations, or delay, without touching the network. Used by the queue
//! and service tests and by `cross-post --mock`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::SubmitError;
use crate::submitters::{Submitted, Submitter};
use crate::types::QueueItemData;

/// Configuration for mock submitter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Submitter name reported in logs
    pub name: String,

    /// Destinations that fail, with the error returned for each
    pub failures: HashMap<String, SubmitError>,

    /// Error returned for every destination not listed in `failures`
    pub fail_all: Option<SubmitError>,

    /// Delay before completing a submission (simulates network latency)
    pub delay: Duration,

    /// Base for generated post URLs (`<base>/<subreddit>`)
    pub url_base: String,

    /// Destinations submitted so far, in call order
    pub submitted: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            failures: HashMap::new(),
            fail_all: None,
            delay: Duration::from_millis(0),
            url_base: "https://mock.reddit.local/r".to_string(),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock submitter for testing
#[derive(Debug, Clone)]
pub struct MockSubmitter {
    config: MockConfig,
}

impl MockSubmitter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A submitter that always succeeds
    pub fn success() -> Self {
        Self::new(MockConfig::default())
    }

    /// A submitter that succeeds with URLs under `url_base`
    pub fn with_url_base(url_base: &str) -> Self {
        Self::new(MockConfig {
            url_base: url_base.trim_end_matches('/').to_string(),
            ..Default::default()
        })
    }

    /// A submitter that fails every submission with the given message
    pub fn always_failing(message: &str) -> Self {
        Self::new(MockConfig {
            fail_all: Some(SubmitError::Rejected(message.to_string())),
            ..Default::default()
        })
    }

    /// A submitter that delays every submission
    pub fn with_delay(delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..Default::default()
        })
    }

    /// Make submissions to `subreddit` fail with a rejection carrying `message`
    pub fn fail_on(mut self, subreddit: &str, message: &str) -> Self {
        self.config.failures.insert(
            subreddit.to_string(),
            SubmitError::Rejected(message.to_string()),
        );
        self
    }

    /// Make submissions to `subreddit` fail with a specific error
    pub fn fail_with(mut self, subreddit: &str, error: SubmitError) -> Self {
        self.config.failures.insert(subreddit.to_string(), error);
        self
    }

    /// Number of submissions attempted
    pub fn call_count(&self) -> usize {
        self.lock_submitted().len()
    }

    /// Destinations submitted so far, in call order
    pub fn submitted(&self) -> Vec<String> {
        self.lock_submitted().clone()
    }

    fn lock_submitted(&self) -> MutexGuard<'_, Vec<String>> {
        self.config
            .submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn submit(&self, item: &QueueItemData) -> Result<Submitted, SubmitError> {
        self.lock_submitted().push(item.subreddit.clone());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        item.validate()?;

        if let Some(error) = self.config.failures.get(&item.subreddit) {
            return Err(error.clone());
        }
        if let Some(error) = &self.config.fail_all {
            return Err(error.clone());
        }

        Ok(Submitted {
            url: format!("{}/{}", self.config.url_base, item.subreddit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PostContent, PostKind};

    fn item(subreddit: &str) -> QueueItemData {
        QueueItemData {
            subreddit: subreddit.to_string(),
            title: "Test".to_string(),
            flair_id: None,
            title_suffix: None,
            custom_title: None,
            kind: PostKind::SelfText,
            content: PostContent::Text("Body".to_string()),
        }
    }

    #[tokio::test]
    async fn test_mock_success() {
        let submitter = MockSubmitter::with_url_base("https://x/");

        let submitted = submitter.submit(&item("a")).await.unwrap();
        assert_eq!(submitted.url, "https://x/a");
        assert_eq!(submitter.call_count(), 1);
        assert_eq!(submitter.submitted(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_fail_on_destination() {
        let submitter = MockSubmitter::success().fail_on("b", "banned");

        assert!(submitter.submit(&item("a")).await.is_ok());
        let err = submitter.submit(&item("b")).await.unwrap_err();
        assert_eq!(err.message(), "banned");
        assert_eq!(submitter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_always_failing() {
        let submitter = MockSubmitter::always_failing("down");

        let err = submitter.submit(&item("a")).await.unwrap_err();
        assert_eq!(err, SubmitError::Rejected("down".to_string()));
    }

    #[tokio::test]
    async fn test_mock_rejects_inconsistent_item() {
        let submitter = MockSubmitter::success();
        let mut bad = item("a");
        bad.kind = PostKind::Link;

        let err = submitter.submit(&bad).await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_with_delay() {
        let submitter = MockSubmitter::with_delay(Duration::from_millis(50));

        let start = tokio::time::Instant::now();
        submitter.submit(&item("a")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let submitter = MockSubmitter::success();
        let clone = submitter.clone();

        clone.submit(&item("a")).await.unwrap();
        assert_eq!(submitter.call_count(), 1);
    }
}
