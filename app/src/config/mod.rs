mod services;

pub use services::{AuditDriver, NotificationDriver, ServicesConfig};

use ppm::Config;

/// Register all application configs
pub fn register_all() {
    Config::register(ServicesConfig::from_env());
}
