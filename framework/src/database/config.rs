//! Database configuration

use crate::config::env;

/// Database backend, derived from the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Postgres,
    Sqlite,
}

/// Database configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL` - Connection URL (default: sqlite://./ppm.db)
/// - `DB_MAX_CONNECTIONS` - Pool ceiling (default: 10)
/// - `DB_MIN_CONNECTIONS` - Pool floor (default: 1)
/// - `DB_CONNECT_TIMEOUT` - Seconds (default: 30)
/// - `DB_LOGGING` - Log SQL statements (default: false)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub logging: bool,
}

impl DatabaseConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        Self {
            url: env("DATABASE_URL", "sqlite://./ppm.db".to_string()),
            max_connections: env("DB_MAX_CONNECTIONS", 10u32),
            min_connections: env("DB_MIN_CONNECTIONS", 1u32),
            connect_timeout: env("DB_CONNECT_TIMEOUT", 30u64),
            logging: env("DB_LOGGING", false),
        }
    }

    /// Create a builder for customizing config
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::default()
    }

    pub fn database_type(&self) -> DatabaseType {
        if self.url.starts_with("sqlite:") {
            DatabaseType::Sqlite
        } else {
            DatabaseType::Postgres
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Builder for DatabaseConfig
#[derive(Default)]
pub struct DatabaseConfigBuilder {
    url: Option<String>,
    max_connections: Option<u32>,
    min_connections: Option<u32>,
    connect_timeout: Option<u64>,
    logging: Option<bool>,
}

impl DatabaseConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = Some(min);
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = Some(enabled);
        self
    }

    pub fn build(self) -> DatabaseConfig {
        let default = DatabaseConfig::from_env();
        DatabaseConfig {
            url: self.url.unwrap_or(default.url),
            max_connections: self.max_connections.unwrap_or(default.max_connections),
            min_connections: self.min_connections.unwrap_or(default.min_connections),
            connect_timeout: self.connect_timeout.unwrap_or(default.connect_timeout),
            logging: self.logging.unwrap_or(default.logging),
        }
    }
}
