use ppm::config::{env, env_optional};
use std::str::FromStr;

/// Where workflow notifications go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDriver {
    /// `notifications` table
    Database,
    /// Log lines only
    Log,
}

impl FromStr for NotificationDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "database" | "db" => Ok(Self::Database),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown notification driver '{}'", other)),
        }
    }
}

/// Where audit events go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDriver {
    Database,
    Log,
}

impl FromStr for AuditDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "database" | "db" => Ok(Self::Database),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown audit driver '{}'", other)),
        }
    }
}

/// Collaborator wiring for the engine
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub notifications: NotificationDriver,
    pub audit: AuditDriver,
    /// JSON file mapping role (or `org:role`) to user ids
    pub roles_file: Option<String>,
}

impl ServicesConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        Self {
            notifications: env("NOTIFICATION_DRIVER", NotificationDriver::Database),
            audit: env("AUDIT_DRIVER", AuditDriver::Database),
            roles_file: env_optional::<String>("ROLES_FILE").filter(|p| !p.is_empty()),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            notifications: NotificationDriver::Database,
            audit: AuditDriver::Database,
            roles_file: None,
        }
    }
}
