//! Configuration for the PPM backend
//!
//! - `.env` loading with environment-based precedence
//! - Type-safe configuration structs kept in a process-wide repository
//!
//! # Example
//!
//! ```rust,no_run
//! use ppm::{Config, LogConfig};
//!
//! Config::init(std::path::Path::new("."));
//!
//! let log = Config::get::<LogConfig>().unwrap();
//! println!("Log level: {}", log.level);
//! ```

pub mod env;
pub mod providers;
pub mod repository;

pub use env::{env, env_optional, load_dotenv, Environment};
pub use providers::{AppConfig, AppConfigBuilder, LogConfig, LogFormat};

use crate::database::DatabaseConfig;
use crate::workflow::WorkflowConfig;
use std::path::Path;

/// Config facade
pub struct Config;

impl Config {
    /// Load `.env` files and register the built-in configs
    ///
    /// Returns the detected environment.
    pub fn init(project_root: &Path) -> Environment {
        let env = env::load_dotenv(project_root);

        repository::register(AppConfig::from_env());
        repository::register(LogConfig::from_env());
        repository::register(DatabaseConfig::from_env());
        repository::register(WorkflowConfig::from_env());

        env
    }

    /// Get a typed config struct from the repository
    pub fn get<T: std::any::Any + Send + Sync + Clone + 'static>() -> Option<T> {
        repository::get::<T>()
    }

    /// Register (or replace) a config struct
    pub fn register<T: std::any::Any + Send + Sync + 'static>(config: T) {
        repository::register(config);
    }

    /// Check if a config type is registered
    pub fn has<T: std::any::Any + 'static>() -> bool {
        repository::has::<T>()
    }

    /// Current environment, from AppConfig when registered
    pub fn environment() -> Environment {
        Config::get::<AppConfig>()
            .map(|c| c.environment)
            .unwrap_or_else(Environment::detect)
    }

    /// Check if running in production
    pub fn is_production() -> bool {
        Self::environment().is_production()
    }

    /// Check if debug mode is enabled
    pub fn is_debug() -> bool {
        Config::get::<AppConfig>().map(|c| c.debug).unwrap_or(true)
    }
}
