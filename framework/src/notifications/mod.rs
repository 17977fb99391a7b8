//! Approval notifications
//!
//! The engine hands every notification to a [`Notifier`] and never waits on
//! delivery. Failures are logged by the engine and swallowed.

mod entity;

pub use entity::notifications;

use crate::database::DbConnection;
use crate::error::WorkflowError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Serialize;

/// Kinds of notification the engine sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    ApprovalRequested,
    WorkflowCompleted,
    WorkflowRejected,
    WorkflowRestarted,
    ApprovalEscalated,
    ApprovalDelegated,
    WorkflowCancelled,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowRejected => "workflow_rejected",
            Self::WorkflowRestarted => "workflow_restarted",
            Self::ApprovalEscalated => "approval_escalated",
            Self::ApprovalDelegated => "approval_delegated",
            Self::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub event: NotificationEvent,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event,
            payload,
        }
    }
}

/// Best-effort delivery of notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), WorkflowError>;
}

/// Stores notifications as in-app inbox rows
#[derive(Clone)]
pub struct DatabaseNotifier {
    db: DbConnection,
}

impl DatabaseNotifier {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// A user's inbox, newest first
    pub async fn for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<notifications::Model>, WorkflowError> {
        Ok(notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id))
            .order_by_desc(notifications::Column::Id)
            .all(self.db.inner())
            .await?)
    }
}

#[async_trait]
impl Notifier for DatabaseNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), WorkflowError> {
        notifications::ActiveModel {
            user_id: Set(notification.user_id),
            event_type: Set(notification.event.as_str().to_string()),
            payload: Set(notification.payload.to_string()),
            read_at: Set(None),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(self.db.inner())
        .await?;

        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), WorkflowError> {
        tracing::info!(
            user_id = %notification.user_id,
            event = notification.event.as_str(),
            payload = %notification.payload,
            "notification"
        );
        Ok(())
    }
}
