//! Multi-step approval workflows
//!
//! A [`WorkflowDefinition`] lists ordered steps, each with its approvers, an
//! ALL/ANY approval rule and a rejection policy (stop, restart, escalate).
//! The [`WorkflowEngine`] runs instances of a definition against an entity
//! such as a change request, creating approval records step by step until
//! the instance is completed, rejected or cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use ppm::workflow::{
//!     ApprovalStatus, ApprovalSubmission, NewStepDefinition, NewWorkflowDefinition, RejectionAction,
//! };
//!
//! let definition = engine.create_definition(NewWorkflowDefinition {
//!     name: "Change request".into(),
//!     created_by: "admin".into(),
//!     steps: vec![
//!         NewStepDefinition::new(0, "PMO review", ["pmo-lead"]),
//!         NewStepDefinition::new(1, "Sponsor sign-off", ["sponsor"])
//!             .on_reject(RejectionAction::Escalate)
//!             .escalate_to(["cfo"]),
//!     ],
//!     ..Default::default()
//! }).await?;
//!
//! let outcome = engine.submit_approval(ApprovalSubmission {
//!     instance_id: 1,
//!     approver_id: "pmo-lead".into(),
//!     decision: ApprovalStatus::Approved,
//!     comments: None,
//! }).await?;
//! ```

pub mod config;
pub mod context;
pub mod definition;
pub mod engine;
pub mod entities;
pub mod rejection;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{WorkflowConfig, WorkflowConfigBuilder};
pub use context::{EscalationEvent, RestartEvent, WorkflowContext};
pub use definition::{NewStepDefinition, NewWorkflowDefinition, StepDefinition, WorkflowDefinition};
pub use engine::WorkflowEngine;
pub use rejection::RejectionPlan;
pub use store::{
    ApprovalUpdate, InstancePatch, NewApproval, NewInstance, SeaOrmWorkflowStore, WorkflowStore,
};
pub use types::{
    Approval, ApprovalOutcome, ApprovalStatus, ApprovalSubmission, ApprovalType, InstanceStatus,
    InstanceStatusView, RejectionAction, StartWorkflow, SubmitOutcome, WorkflowInstance,
};
