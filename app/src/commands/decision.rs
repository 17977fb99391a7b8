use console::style;
use ppm::{ApprovalStatus, ApprovalSubmission, SubmitOutcome, WorkflowEngine, WorkflowError};

use super::{info, print_json};

/// Record a decision for the approver's pending approval
pub async fn run(
    engine: &WorkflowEngine,
    instance_id: i64,
    approver_id: String,
    decision: &str,
    comments: Option<String>,
) -> Result<(), WorkflowError> {
    let decision = ApprovalStatus::parse_decision(decision)?;
    let outcome = engine
        .submit_approval(ApprovalSubmission {
            instance_id,
            approver_id,
            decision,
            comments,
        })
        .await?;

    let label = match outcome.outcome {
        SubmitOutcome::PendingAdvancement => style(outcome.outcome.as_str()).yellow(),
        SubmitOutcome::Rejected => style(outcome.outcome.as_str()).red(),
        _ => style(outcome.outcome.as_str()).green(),
    };
    info(format!(
        "Instance {} {} (step {}, {})",
        instance_id,
        label,
        outcome.current_step,
        outcome.status.as_str()
    ));
    if outcome.outcome == SubmitOutcome::PendingAdvancement {
        info(style(format!("Run `ppm workflow:resume {}` to finish", instance_id)).dim());
    }
    print_json(&outcome)
}

pub async fn delegate(
    engine: &WorkflowEngine,
    instance_id: i64,
    approver_id: &str,
    delegate_to: &str,
    comments: Option<String>,
) -> Result<(), WorkflowError> {
    let approval = engine
        .delegate_approval(instance_id, approver_id, delegate_to, comments)
        .await?;
    info(format!(
        "Step {} of instance {} delegated to {}",
        approval.step_name,
        instance_id,
        style(delegate_to).green()
    ));
    print_json(&approval)
}
