use crate::config::env::env;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration
///
/// # Environment Variables
///
/// - `LOG_LEVEL` - Default filter directive (default: info). `RUST_LOG` wins when set.
/// - `LOG_FORMAT` - `pretty` or `json` (default: pretty)
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        Self {
            level: env("LOG_LEVEL", "info".to_string()),
            format: LogFormat::parse(&env("LOG_FORMAT", "pretty".to_string())),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
