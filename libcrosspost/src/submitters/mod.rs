//! Post submitters
//!
//! A [`Submitter`] performs the network call that creates one post for one
//! queue item. The queue runner only ever talks to this trait, so tests drive
//! it with [`mock::MockSubmitter`] and the CLI with [`reddit::RedditSubmitter`].
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::submitters::{Submitter, mock::MockSubmitter};
//! use libcrosspost::types::{PostContent, PostKind, QueueItemData};
//!
//! # async fn example() {
//! let submitter = MockSubmitter::success();
//! let item = QueueItemData {
//!     subreddit: "rust".to_string(),
//!     title: "Hello".to_string(),
//!     flair_id: None,
//!     title_suffix: None,
//!     custom_title: None,
//!     kind: PostKind::SelfText,
//!     content: PostContent::Text("Hi from crosspost".to_string()),
//! };
//!
//! match submitter.submit(&item).await {
//!     Ok(submitted) => println!("Posted: {}", submitted.url),
//!     Err(e) => eprintln!("Failed: {}", e.message()),
//! }
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SubmitError};
use crate::types::QueueItemData;

// Not behind cfg(test): integration tests and `cross-post --mock` use it
pub mod mock;
pub mod reddit;

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    /// Public URL of the created post
    pub url: String,
}

/// Creates a post for a single queue item
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Short identifier used in logs (e.g. "reddit", "mock")
    fn name(&self) -> &str;

    /// Submit one item
    ///
    /// # Errors
    ///
    /// Any failure is reported as a [`SubmitError`]; the queue runner records
    /// its message against the item and moves on.
    async fn submit(&self, item: &QueueItemData) -> std::result::Result<Submitted, SubmitError>;
}

/// Supplies the authenticated user's handle
#[async_trait]
pub trait Identity: Send + Sync {
    async fn username(&self) -> Result<String>;
}

/// An identity with a known, configured handle
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

#[async_trait]
impl Identity for FixedIdentity {
    async fn username(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_identity() {
        let identity = FixedIdentity("ferris".to_string());
        assert_eq!(identity.username().await.unwrap(), "ferris");
    }
}
