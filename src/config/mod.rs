//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file and then overridden by
//! environment variables. Missing optional values are filled with defaults,
//! so an absent or empty file yields a runnable configuration.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
///
/// Pool sizing and connection lifetimes are operational settings; the
/// authentication core never depends on their values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Upper bound on pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Idle connections are closed after this many seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Connections are recycled after this many seconds
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

impl DatabaseConfig {
    /// In-memory SQLite configuration, used by tests
    pub fn in_memory() -> Self {
        Self {
            driver: DatabaseDriver::Sqlite,
            url: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

fn default_database_url() -> String {
    "data/pagelisting.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_max_lifetime_secs() -> u64 {
    30 * 60
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Sliding idle timeout in minutes
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,
    /// Add the `Secure` attribute to the session cookie
    #[serde(default)]
    pub secure_cookie: bool,
    /// Upper bound for a single session store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            secure_cookie: false,
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_cookie_name() -> String {
    "session_id".to_string()
}

fn default_idle_timeout_minutes() -> i64 {
    30
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

/// Longest accepted session idle timeout (one year)
pub const MAX_IDLE_TIMEOUT_MINUTES: i64 = 365 * 24 * 60;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - PAGELISTING_SERVER_HOST
    /// - PAGELISTING_SERVER_PORT
    /// - PAGELISTING_DATABASE_DRIVER
    /// - PAGELISTING_DATABASE_URL
    /// - PAGELISTING_DATABASE_MAX_CONNECTIONS
    /// - PAGELISTING_SESSION_IDLE_TIMEOUT_MINUTES
    /// - PAGELISTING_SESSION_COOKIE_SECURE
    /// - PAGELISTING_SESSION_STORE_TIMEOUT_MS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session layer cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.idle_timeout_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "session.idle_timeout_minutes must be positive".to_string(),
            ));
        }
        if self.session.idle_timeout_minutes > MAX_IDLE_TIMEOUT_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "session.idle_timeout_minutes cannot exceed {}",
                MAX_IDLE_TIMEOUT_MINUTES
            )));
        }
        if self.session.store_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session.store_timeout_ms must be positive".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "session.cookie_name cannot be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PAGELISTING_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PAGELISTING_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(driver) = std::env::var("PAGELISTING_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("PAGELISTING_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("PAGELISTING_DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<u32>() {
                self.database.max_connections = max;
            }
        }

        if let Ok(minutes) = std::env::var("PAGELISTING_SESSION_IDLE_TIMEOUT_MINUTES") {
            if let Ok(minutes) = minutes.parse::<i64>() {
                self.session.idle_timeout_minutes = minutes;
            }
        }
        if let Ok(secure) = std::env::var("PAGELISTING_SESSION_COOKIE_SECURE") {
            match secure.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.session.secure_cookie = true,
                "0" | "false" | "no" => self.session.secure_cookie = false,
                _ => {}
            }
        }
        if let Ok(ms) = std::env::var("PAGELISTING_SESSION_STORE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.session.store_timeout_ms = ms;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
