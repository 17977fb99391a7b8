//! Service wiring
//!
//! Reads the registered configs, opens the pool and builds the engine with
//! the configured collaborators.

use ppm::{
    AuditLogger, Config, DatabaseAuditLogger, DatabaseConfig, DatabaseNotifier, DbConnection,
    NoRoleResolver, Notifier, RoleResolver, SeaOrmWorkflowStore, StaticRoleResolver,
    TracingAuditLogger, TracingNotifier, WorkflowConfig, WorkflowEngine, WorkflowError,
};
use std::sync::Arc;

use crate::config::{AuditDriver, NotificationDriver, ServicesConfig};

/// Everything a command needs
pub struct Services {
    pub db: DbConnection,
    pub engine: WorkflowEngine,
}

/// Connect and build the engine
pub async fn boot() -> Result<Services, WorkflowError> {
    let db_config = Config::get::<DatabaseConfig>().unwrap_or_default();
    let services = Config::get::<ServicesConfig>().unwrap_or_default();
    let workflow = Config::get::<WorkflowConfig>().unwrap_or_default();

    let db = DbConnection::connect(&db_config).await?;

    let notifier: Arc<dyn Notifier> = match services.notifications {
        NotificationDriver::Database => Arc::new(DatabaseNotifier::new(db.clone())),
        NotificationDriver::Log => Arc::new(TracingNotifier),
    };
    let audit: Arc<dyn AuditLogger> = match services.audit {
        AuditDriver::Database => Arc::new(DatabaseAuditLogger::new(db.clone())),
        AuditDriver::Log => Arc::new(TracingAuditLogger),
    };
    let roles = role_resolver(services.roles_file.as_deref())?;

    tracing::debug!(
        notifications = ?services.notifications,
        audit = ?services.audit,
        roles_file = ?services.roles_file,
        "services configured"
    );

    let engine = WorkflowEngine::new(
        Arc::new(SeaOrmWorkflowStore::new(db.clone())),
        notifier,
        audit,
        roles,
        workflow,
    );

    Ok(Services { db, engine })
}

fn role_resolver(path: Option<&str>) -> Result<Arc<dyn RoleResolver>, WorkflowError> {
    let Some(path) = path else {
        return Ok(Arc::new(NoRoleResolver));
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::internal(format!("Cannot read roles file {}: {}", path, e)))?;
    Ok(Arc::new(StaticRoleResolver::from_json(&raw)?))
}
