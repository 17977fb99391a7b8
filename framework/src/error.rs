//! Workflow-wide error types
//!
//! Every engine operation returns [`WorkflowError`]. Validation failures are
//! raised before any write happens; conflicts carry the state that caused
//! them so callers can reconcile without re-reading.

use crate::workflow::types::{ApprovalStatus, InstanceStatus};
use thiserror::Error;

/// Engine error type
///
/// # Example
///
/// ```rust,ignore
/// use ppm::WorkflowError;
///
/// match engine.submit_approval(submission).await {
///     Err(WorkflowError::AlreadyDecided { existing, .. }) => {
///         println!("already {}", existing.as_str());
///     }
///     Err(e) => return Err(e),
///     Ok(outcome) => println!("{:?}", outcome),
/// }
/// ```
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// Definition, instance, or approval record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier used for the lookup
        id: String,
    },

    /// Definition has no steps or a broken step sequence
    #[error("Invalid workflow definition: {reason}")]
    InvalidDefinition {
        /// What is wrong with the definition
        reason: String,
    },

    /// Decision value outside {approved, rejected}
    #[error("Invalid decision '{value}'")]
    InvalidDecision {
        /// The rejected value
        value: String,
    },

    /// Approval record already left the pending state
    #[error("Approval {approval_id} was already decided ({})", existing.as_str())]
    AlreadyDecided {
        /// The approval record
        approval_id: i64,
        /// The decision that stands
        existing: ApprovalStatus,
    },

    /// Instance already reached a terminal status
    #[error("Workflow instance {instance_id} is already {}", status.as_str())]
    AlreadyTerminal {
        /// The instance
        instance_id: i64,
        /// Its terminal status
        status: InstanceStatus,
    },

    /// Optimistic write kept losing to concurrent writers
    #[error("Workflow instance {instance_id} was modified concurrently")]
    Conflict {
        /// The contended instance
        instance_id: i64,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Anything else
    #[error("Internal error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl WorkflowError {
    /// Create a NotFound error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an InvalidDefinition error
    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Create an InvalidDecision error
    pub fn invalid_decision(value: impl Into<String>) -> Self {
        Self::InvalidDecision {
            value: value.into(),
        }
    }

    /// Create a Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidDefinition { .. } => "invalid_definition",
            Self::InvalidDecision { .. } => "invalid_decision",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::Conflict { .. } => "conflict",
            Self::Database(_) => "database",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status code the HTTP layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidDefinition { .. } => 422,
            Self::InvalidDecision { .. } => 400,
            Self::AlreadyDecided { .. } => 409,
            Self::AlreadyTerminal { .. } => 409,
            Self::Conflict { .. } => 409,
            Self::Database(_) => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// True for the 409 family
    pub fn is_conflict(&self) -> bool {
        self.status_code() == 409
    }

    /// Structured payload for callers
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        match self {
            Self::AlreadyDecided {
                approval_id,
                existing,
            } => {
                body["approval_id"] = serde_json::json!(approval_id);
                body["current_status"] = serde_json::json!(existing.as_str());
            }
            Self::AlreadyTerminal {
                instance_id,
                status,
            } => {
                body["instance_id"] = serde_json::json!(instance_id);
                body["current_status"] = serde_json::json!(status.as_str());
            }
            Self::Conflict { instance_id } => {
                body["instance_id"] = serde_json::json!(instance_id);
            }
            _ => {}
        }

        body
    }
}

// Implement From<DbErr> for automatic error conversion with ?
impl From<sea_orm::DbErr> for WorkflowError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", e))
    }
}

impl From<validator::ValidationErrors> for WorkflowError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, _)| field.to_string())
            .collect();
        fields.sort();

        if fields.is_empty() {
            Self::invalid_definition(errors.to_string())
        } else {
            Self::invalid_definition(format!("invalid fields: {}", fields.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn conflicts_report_current_state() {
        let err = WorkflowError::AlreadyDecided {
            approval_id: 7,
            existing: ApprovalStatus::Approved,
        };

        assert_eq!(err.status_code(), 409);
        assert!(err.is_conflict());
        let json = err.to_json();
        assert_eq!(json["error"], "already_decided");
        assert_eq!(json["current_status"], "approved");
        assert_eq!(json["approval_id"], 7);
    }

    #[test]
    fn terminal_error_names_status() {
        let err = WorkflowError::AlreadyTerminal {
            instance_id: 3,
            status: InstanceStatus::Completed,
        };

        assert_eq!(err.to_string(), "Workflow instance 3 is already completed");
        assert_eq!(err.to_json()["current_status"], "completed");
    }

    #[test]
    fn validation_failures_are_not_conflicts() {
        assert_eq!(WorkflowError::not_found("Workflow instance", 1).status_code(), 404);
        assert_eq!(WorkflowError::invalid_decision("maybe").status_code(), 400);
        assert_eq!(WorkflowError::invalid_definition("no steps").kind(), "invalid_definition");
        assert!(!WorkflowError::database("down").is_conflict());
    }
}
