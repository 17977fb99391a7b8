//! Workflow public types

use crate::error::WorkflowError;
use crate::workflow::context::WorkflowContext;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Instance lifecycle status
///
/// `InProgress` is the single "active" status. The stored string `pending`
/// is read as an alias of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Completed,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "in_progress" | "pending" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed, rejected or cancelled
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Approval record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Delegated => "delegated",
            Self::Expired => "expired",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "delegated" => Some(Self::Delegated),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Parse a caller-supplied decision, accepting any letter case
    ///
    /// Only `approved` and `rejected` are decisions.
    pub fn parse_decision(value: &str) -> Result<Self, WorkflowError> {
        match Self::from_str(&value.trim().to_ascii_lowercase()) {
            Some(status @ (Self::Approved | Self::Rejected)) => Ok(status),
            _ => Err(WorkflowError::invalid_decision(value)),
        }
    }

    /// Whether the record takes part in step evaluation
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Rejected)
    }
}

/// How many approvers must approve before a step is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    #[default]
    All,
    Any,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Evaluate a step against the statuses of its live records
    pub fn is_satisfied(&self, statuses: &[ApprovalStatus]) -> bool {
        match self {
            Self::All => {
                !statuses.is_empty() && statuses.iter().all(|s| *s == ApprovalStatus::Approved)
            }
            Self::Any => statuses.iter().any(|s| *s == ApprovalStatus::Approved),
        }
    }
}

/// What happens when an approver rejects a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RejectionAction {
    #[default]
    Stop,
    Restart,
    Escalate,
}

impl RejectionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Escalate => "escalate",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }
}

/// A persisted workflow instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInstance {
    pub id: i64,
    pub workflow_id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub current_step: i32,
    /// Bumped on every restart and escalation; approvals from older rounds are superseded
    pub round: i32,
    pub status: InstanceStatus,
    pub context: WorkflowContext,
    /// Optimistic lock, bumped on every write
    pub revision: i32,
    pub started_by: String,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl WorkflowInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fail with AlreadyTerminal unless the instance is still active
    pub fn ensure_active(&self) -> Result<(), WorkflowError> {
        if self.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                instance_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// A persisted approval record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub id: i64,
    pub workflow_instance_id: i64,
    pub step_number: i32,
    pub step_name: String,
    pub round: i32,
    pub approver_id: String,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
    pub delegated_to: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Request to start a workflow
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartWorkflow {
    pub workflow_id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub initiator: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Free-form caller data copied into notifications
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// An approver's decision
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalSubmission {
    pub instance_id: i64,
    pub approver_id: String,
    pub decision: ApprovalStatus,
    #[serde(default)]
    pub comments: Option<String>,
}

/// What a submission led to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Step still waits for other approvers
    PendingApprovals,
    /// Step satisfied and the next step was activated
    Advanced,
    /// Last step satisfied
    Completed,
    /// Rejected under STOP (or escalation fallback)
    Rejected,
    /// Rejected under RESTART, back at step 0
    Restarted,
    /// Rejected under ESCALATE, escalation approvers activated
    Escalated,
    /// Decision recorded, advance failed and can be re-driven with `resume`
    PendingAdvancement,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApprovals => "pending_approvals",
            Self::Advanced => "advanced",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Restarted => "restarted",
            Self::Escalated => "escalated",
            Self::PendingAdvancement => "pending_advancement",
        }
    }
}

/// Result of `submit_approval`
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub instance_id: i64,
    pub approval_id: i64,
    pub outcome: SubmitOutcome,
    pub status: InstanceStatus,
    pub current_step: i32,
}

/// Snapshot returned by `get_instance_status`
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatusView {
    pub instance: WorkflowInstance,
    pub workflow_name: String,
    pub total_steps: usize,
    pub current_step_name: Option<String>,
    /// Live approvals of the current step and round
    pub approvals: Vec<Approval>,
    pub step_satisfied: bool,
}
