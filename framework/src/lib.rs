pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod notifications;
pub mod roles;
pub mod workflow;

pub use audit::{AuditAction, AuditEvent, AuditLogger, DatabaseAuditLogger, TracingAuditLogger};
pub use config::{AppConfig, Config, Environment, LogConfig, LogFormat};
pub use database::{DatabaseConfig, DbConnection, TestDatabase};
pub use error::WorkflowError;
pub use migrations::Migrator;
pub use notifications::{
    DatabaseNotifier, Notification, NotificationEvent, Notifier, TracingNotifier,
};
pub use roles::{NoRoleResolver, RoleResolver, StaticRoleResolver};
pub use workflow::{
    Approval, ApprovalOutcome, ApprovalStatus, ApprovalSubmission, ApprovalType, InstanceStatus,
    InstanceStatusView, NewStepDefinition, NewWorkflowDefinition, RejectionAction,
    SeaOrmWorkflowStore, StartWorkflow, SubmitOutcome, WorkflowConfig, WorkflowDefinition,
    WorkflowEngine, WorkflowInstance, WorkflowStore,
};

// Re-export for the app crate
pub use async_trait::async_trait;
pub use chrono;
pub use sea_orm;
pub use serde_json;
