mod app;
mod log;

pub use app::{AppConfig, AppConfigBuilder};
pub use log::{LogConfig, LogFormat};
