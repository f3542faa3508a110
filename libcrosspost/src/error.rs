//! Error types for Crosspost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosspostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::InvalidInput(_) => 3,
            CrosspostError::Queue(QueueError::EmptyQueue) => 3,
            CrosspostError::Submit(SubmitError::Authentication(_)) => 2,
            CrosspostError::Submit(_) => 1,
            CrosspostError::Queue(_) => 1,
            CrosspostError::Config(_) => 1,
            CrosspostError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stored payload is unreadable: {0}")]
    PayloadError(#[from] serde_json::Error),
}

/// Failure of a single submission to a single destination.
///
/// The queue runner records `message()` verbatim in the run log; the variant
/// only informs logging and exit codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl SubmitError {
    /// The human-readable message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            SubmitError::Authentication(m)
            | SubmitError::Validation(m)
            | SubmitError::Rejected(m)
            | SubmitError::Network(m)
            | SubmitError::RateLimit(m) => m,
        }
    }
}

impl From<reqwest::Error> for SubmitError {
    fn from(e: reqwest::Error) -> Self {
        SubmitError::Network(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Cannot start a run with no queue items")]
    EmptyQueue,

    #[error("A run is already in progress")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = CrosspostError::InvalidInput("Empty title".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_empty_queue() {
        let error = CrosspostError::Queue(QueueError::EmptyQueue);
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = CrosspostError::Submit(SubmitError::Authentication("Expired token".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let rejected = CrosspostError::Submit(SubmitError::Rejected("banned".to_string()));
        assert_eq!(rejected.exit_code(), 1);

        let running = CrosspostError::Queue(QueueError::AlreadyRunning);
        assert_eq!(running.exit_code(), 1);

        let config = CrosspostError::Config(ConfigError::MissingField("reddit".to_string()));
        assert_eq!(config.exit_code(), 1);

        let db = CrosspostError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn test_submit_error_message_is_verbatim() {
        assert_eq!(SubmitError::Rejected("banned".to_string()).message(), "banned");
        assert_eq!(
            SubmitError::RateLimit("you are doing that too much".to_string()).message(),
            "you are doing that too much"
        );
    }

    #[test]
    fn test_error_message_formatting() {
        let error = CrosspostError::Submit(SubmitError::Network("Connection refused".to_string()));
        assert_eq!(
            error.to_string(),
            "Submission error: Network error: Connection refused"
        );

        let error = CrosspostError::Queue(QueueError::AlreadyRunning);
        assert_eq!(error.to_string(), "Queue error: A run is already in progress");
    }

    #[test]
    fn test_error_conversion_from_submit_error() {
        let err: CrosspostError = SubmitError::Validation("bad".to_string()).into();
        assert!(matches!(err, CrosspostError::Submit(SubmitError::Validation(_))));
    }
}
