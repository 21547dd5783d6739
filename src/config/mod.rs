//! Configuration management
//!
//! Loads configuration for the Userhub service from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

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
    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
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
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cors_origin() -> String {
    "http://localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/userhub.db".to_string()
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
    /// Session lifetime in days
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    /// Interval between expired-session sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_ttl_days() -> i64 {
    7
}

fn default_sweep_interval() -> u64 {
    300
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Secret key used to sign session cookies
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    /// Deployment environment, controls the cookie Secure attribute
    #[serde(default)]
    pub environment: Environment,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            environment: Environment::default(),
        }
    }
}

fn default_secret_key() -> String {
    "userhub-dev-secret".to_string()
}

/// Deployment environment flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development (default)
    #[default]
    Development,
    /// Automated test runs
    Test,
    /// Production deployment
    Production,
}

impl Environment {
    /// Whether session cookies must carry the Secure attribute.
    ///
    /// Secure is set everywhere except development and test, matching the
    /// deployment policy for cookie-based auth behind TLS.
    pub fn secure_cookies(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// SameSite attribute for the session cookie.
    ///
    /// Cross-origin credentialed requests need SameSite=None, which browsers
    /// only accept together with Secure; plain Lax is used otherwise.
    pub fn cookie_same_site(&self) -> &'static str {
        if self.secure_cookies() {
            "None"
        } else {
            "Lax"
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file.
    ///
    /// If the file doesn't exist, returns default configuration. If the file
    /// exists but is invalid YAML, returns an error with details.
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
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides.
    ///
    /// Environment variables follow the pattern:
    /// - USERHUB_SERVER_HOST
    /// - USERHUB_SERVER_PORT
    /// - USERHUB_SERVER_CORS_ORIGIN
    /// - USERHUB_DATABASE_DRIVER
    /// - USERHUB_DATABASE_URL
    /// - USERHUB_SESSION_TTL_DAYS
    /// - USERHUB_SECRET_KEY
    /// - USERHUB_ENV
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("USERHUB_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("USERHUB_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("USERHUB_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("USERHUB_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("USERHUB_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(ttl) = std::env::var("USERHUB_SESSION_TTL_DAYS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.session.ttl_days = ttl;
            }
        }

        if let Ok(secret) = std::env::var("USERHUB_SECRET_KEY") {
            self.security.secret_key = secret;
        }
        if let Ok(env) = std::env::var("USERHUB_ENV") {
            match env.to_lowercase().as_str() {
                "development" => self.security.environment = Environment::Development,
                "test" => self.security.environment = Environment::Test,
                "production" => self.security.environment = Environment::Production,
                _ => {} // Ignore invalid values
            }
        }
    }

    /// Whether the service is still running on the built-in dev secret.
    pub fn uses_default_secret(&self) -> bool {
        self.security.secret_key == default_secret_key()
    }
}
