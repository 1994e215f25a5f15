//! Configuration management for Syndicast

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub vault: VaultConfig,
    /// OAuth client registrations keyed by platform name
    #[serde(default)]
    pub oauth: HashMap<String, OAuthAppConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Secret the vault key is derived from. `SYNDICAST_VAULT_SECRET`
    /// takes precedence over the file value.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between drain passes
    pub poll_interval_secs: u64,
    /// Maximum jobs claimed per drain pass
    pub batch_size: u32,
    /// Attempts before a job is failed permanently
    pub max_attempts: i32,
    /// Pause between sequential jobs within a batch
    pub job_pause_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            batch_size: 10,
            max_attempts: 3,
            job_pause_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between refresh sweeps
    pub poll_interval_secs: u64,
    /// Connections expiring within this window get a refresh job
    pub buffer_minutes: i64,
    /// Maximum refresh jobs claimed per sweep
    pub batch_size: u32,
    /// Attempts before the connection is marked expired
    pub max_attempts: i32,
    /// Fixed delay between refresh retries
    pub retry_delay_secs: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            buffer_minutes: 60,
            batch_size: 10,
            max_attempts: 3,
            retry_delay_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(secret) = std::env::var("SYNDICAST_VAULT_SECRET") {
            config.vault.secret = secret;
        }
        if config.vault.secret.is_empty() {
            return Err(ConfigError::MissingField("vault.secret".to_string()).into());
        }

        Ok(config)
    }

    /// OAuth client registration for a platform, if configured
    pub fn oauth_app(&self, platform: Platform) -> Option<&OAuthAppConfig> {
        self.oauth.get(platform.as_str())
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndicast/syndicast.db".to_string(),
            },
            vault: VaultConfig {
                secret: String::new(),
            },
            oauth: HashMap::new(),
            queue: QueueConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndicast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("syndicast"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_refresh_defaults() {
        let config = RefreshConfig::default();
        assert_eq!(config.buffer_minutes, 60);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
            [database]
            path = "/tmp/syndicast.db"

            [vault]
            secret = "test-secret"

            [oauth.twitter]
            client_id = "cid"
            client_secret = "csecret"
            redirect_uri = "https://app.test/oauth/twitter/callback"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/syndicast.db");
        assert_eq!(config.queue.max_attempts, 3);
        assert!(config.oauth_app(Platform::Twitter).is_some());
        assert!(config.oauth_app(Platform::Reddit).is_none());
    }

    #[test]
    fn test_oauth_app_lookup_uses_platform_name() {
        let mut config = Config::default_config();
        config.oauth.insert(
            "linkedin".to_string(),
            OAuthAppConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "https://app.test/cb".to_string(),
            },
        );

        assert!(config.oauth_app(Platform::LinkedIn).is_some());
        assert!(config.oauth_app(Platform::Facebook).is_none());
    }
}
