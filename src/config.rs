use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, error};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name used as `sub` of the service tokens we mint for collaborators
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HS256 secret shared with the identity service
    pub auth_jwt_secret: Option<String>,

    /// Base URL of the class roster service
    pub roster_service_url: Option<String>,

    /// JSON roster used when no roster service is configured (local runs)
    pub roster_file: Option<String>,

    /// Database URL for the chat write-behind log
    pub db_url: Option<String>,

    /// Lifetime of every ephemeral key in the shared store
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,

    /// How early a participant may enter before the class starts
    #[serde(default = "default_early_join_minutes")]
    pub early_join_minutes: i64,

    /// Buffer size of each broadcast topic
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,

    /// Frames queued for one connection before it is treated as stalled and aborted
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Maximum chat message length, in characters
    #[serde(default = "default_max_chat_length")]
    pub max_chat_length: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    /// Parsed list of allowed CORS origins; empty means "any"
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            auth_jwt_secret: None,
            roster_service_url: None,
            roster_file: None,
            db_url: None,
            state_ttl_secs: default_state_ttl_secs(),
            early_join_minutes: default_early_join_minutes(),
            topic_capacity: default_topic_capacity(),
            outbound_capacity: default_outbound_capacity(),
            max_chat_length: default_max_chat_length(),
        }
    }
}

/// Install the process-wide configuration. Only the first call wins.
pub fn init_config(config: Config) -> &'static Config {
    CONFIG.get_or_init(|| config)
}

/// Get the process-wide configuration, falling back to defaults if it was never installed.
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "classroom-live".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_state_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_early_join_minutes() -> i64 {
    10
}

fn default_topic_capacity() -> usize {
    256
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_max_chat_length() -> usize {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert_eq!(config.state_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.max_chat_length, 500);
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = Config {
            cors_origins: Some("http://a.test, http://b.test ,".to_string()),
            ..Config::default()
        };
        assert_eq!(config.cors_origin_list(), vec!["http://a.test", "http://b.test"]);
    }
}
