//! Append-only audit trail of workflow events
//!
//! The engine writes here but never reads back for decisions.

use crate::database::DbConnection;
use crate::error::WorkflowError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Serialize;

pub mod audit_logs {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "audit_logs")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub organization_id: Option<String>,
        pub user_id: String,
        pub action: String,
        pub entity_type: String,
        pub entity_id: String,
        #[sea_orm(column_type = "Text")]
        pub details: String,
        pub created_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Audited workflow actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowCreated,
    ApprovalDecision,
    WorkflowAdvanced,
    WorkflowCompleted,
    WorkflowRejected,
    WorkflowRestarted,
    WorkflowEscalated,
    ApprovalDelegated,
    WorkflowCancelled,
    StepTimedOut,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowCreated => "workflow_created",
            Self::ApprovalDecision => "approval_decision",
            Self::WorkflowAdvanced => "workflow_advanced",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowRejected => "workflow_rejected",
            Self::WorkflowRestarted => "workflow_restarted",
            Self::WorkflowEscalated => "workflow_escalated",
            Self::ApprovalDelegated => "approval_delegated",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::StepTimedOut => "step_timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub organization_id: Option<String>,
    pub user_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn append_event(&self, event: AuditEvent) -> Result<(), WorkflowError>;
}

/// Persists events in `audit_logs`
#[derive(Clone)]
pub struct DatabaseAuditLogger {
    db: DbConnection,
}

impl DatabaseAuditLogger {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// History of one entity in insertion order
    pub async fn events_for(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<audit_logs::Model>, WorkflowError> {
        Ok(audit_logs::Entity::find()
            .filter(audit_logs::Column::EntityType.eq(entity_type))
            .filter(audit_logs::Column::EntityId.eq(entity_id))
            .order_by_asc(audit_logs::Column::Id)
            .all(self.db.inner())
            .await?)
    }
}

#[async_trait]
impl AuditLogger for DatabaseAuditLogger {
    async fn append_event(&self, event: AuditEvent) -> Result<(), WorkflowError> {
        audit_logs::ActiveModel {
            organization_id: Set(event.organization_id),
            user_id: Set(event.user_id),
            action: Set(event.action.as_str().to_string()),
            entity_type: Set(event.entity_type),
            entity_id: Set(event.entity_id),
            details: Set(event.details.to_string()),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(self.db.inner())
        .await?;

        Ok(())
    }
}

/// Emits events as structured log lines under the `audit` target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn append_event(&self, event: AuditEvent) -> Result<(), WorkflowError> {
        tracing::info!(
            target: "audit",
            organization_id = event.organization_id.as_deref().unwrap_or("-"),
            user_id = %event.user_id,
            action = event.action.as_str(),
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            details = %event.details,
            "audit event"
        );
        Ok(())
    }
}
