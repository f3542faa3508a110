//! Configuration management for Crosspost

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::queue::{QueueSettings, DEFAULT_COOLDOWN_SECS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Environment variable holding the OAuth bearer token
    #[serde(default = "default_token_env")]
    pub access_token_env: String,
    /// Handle used for profile posts; looked up from the API when absent
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_user_agent() -> String {
    format!("crosspost/{}", env!("CARGO_PKG_VERSION"))
}

fn default_token_env() -> String {
    "CROSSPOST_REDDIT_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            access_token_env: default_token_env(),
            username: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RedditConfig {
    /// Read the access token from the configured environment variable
    pub fn access_token(&self) -> Result<SecretString> {
        match std::env::var(&self.access_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(SecretString::from(token)),
            _ => Err(ConfigError::MissingField(format!(
                "Reddit access token (set {})",
                self.access_token_env
            ))
            .into()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl QueueConfig {
    pub fn settings(&self) -> QueueSettings {
        QueueSettings::with_cooldown(self.cooldown_secs)
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the default configuration. `CROSSPOST_DB_PATH`
    /// overrides the database path in either case.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default_config()
        };

        if let Ok(db_path) = std::env::var("CROSSPOST_DB_PATH") {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/crosspost/runs.db".to_string(),
            },
            reddit: RedditConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Resolve the configuration file path: `CROSSPOST_CONFIG`, else the user config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}

/// Expand `~` in the configured database path
pub fn resolve_db_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            path = "/tmp/runs.db"

            [reddit]
            user_agent = "test-agent"
            access_token_env = "MY_TOKEN"
            username = "ferris"
            timeout_secs = 5

            [queue]
            cooldown_secs = 45
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path, "/tmp/runs.db");
        assert_eq!(config.reddit.user_agent, "test-agent");
        assert_eq!(config.reddit.username.as_deref(), Some("ferris"));
        assert_eq!(config.reddit.timeout(), Duration::from_secs(5));
        assert_eq!(config.queue.settings().cooldown_secs, 45);
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config: Config = toml::from_str("[database]\npath = \"x.db\"\n").unwrap();
        assert_eq!(config.queue.cooldown_secs, DEFAULT_COOLDOWN_SECS);
        assert_eq!(config.reddit.access_token_env, "CROSSPOST_REDDIT_TOKEN");
        assert!(config.reddit.username.is_none());
    }

    #[test]
    fn test_load_from_path_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml [").unwrap();

        let result = Config::load_from_path(file.path());
        assert!(matches!(
            result,
            Err(crate::CrosspostError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults_and_db_override() {
        let dir = tempfile::TempDir::new().unwrap();
        std::env::set_var("CROSSPOST_CONFIG", dir.path().join("absent.toml"));
        std::env::set_var("CROSSPOST_DB_PATH", "/tmp/override.db");

        let config = Config::load().unwrap();

        std::env::remove_var("CROSSPOST_CONFIG");
        std::env::remove_var("CROSSPOST_DB_PATH");

        assert_eq!(config.database.path, "/tmp/override.db");
        assert_eq!(config.queue.cooldown_secs, DEFAULT_COOLDOWN_SECS);
    }

    #[test]
    #[serial]
    fn test_access_token_from_env() {
        let reddit = RedditConfig {
            access_token_env: "CROSSPOST_TEST_TOKEN".to_string(),
            ..Default::default()
        };

        std::env::remove_var("CROSSPOST_TEST_TOKEN");
        assert!(reddit.access_token().is_err());

        std::env::set_var("CROSSPOST_TEST_TOKEN", "secret-token");
        let token = reddit.access_token().unwrap();
        assert_eq!(token.expose_secret(), "secret-token");
        std::env::remove_var("CROSSPOST_TEST_TOKEN");
    }
}
