//! Rejection policy
//!
//! The plan is a pure function of the rejecting step's configuration and of
//! whether that step is already escalated in the current round.

use crate::audit::AuditAction;
use crate::error::WorkflowError;
use crate::notifications::{Notification, NotificationEvent};
use crate::workflow::definition::StepDefinition;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::store::InstancePatch;
use crate::workflow::types::{InstanceStatus, RejectionAction, SubmitOutcome, WorkflowInstance};
use chrono::Utc;

/// What a rejection does to the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionPlan {
    /// Terminate as REJECTED. `fallback` is set when ESCALATE could not escalate.
    Stop { fallback: bool },
    /// Back to step 0 with fresh approvals
    Restart,
    /// Same step, new approvals for these users
    Escalate { approvers: Vec<String> },
}

impl RejectionPlan {
    /// Choose the plan for a rejection at `step`
    ///
    /// `escalation_approvers` are the step's escalation users merged with
    /// whatever its escalation roles resolved to.
    pub fn for_step(
        step: &StepDefinition,
        already_escalated: bool,
        escalation_approvers: Vec<String>,
    ) -> Self {
        match step.rejection_action {
            RejectionAction::Stop => Self::Stop { fallback: false },
            RejectionAction::Restart => Self::Restart,
            RejectionAction::Escalate if already_escalated || escalation_approvers.is_empty() => {
                Self::Stop { fallback: true }
            }
            RejectionAction::Escalate => Self::Escalate {
                approvers: escalation_approvers,
            },
        }
    }
}

/// Union of direct and role-resolved escalation approvers, first occurrence wins
pub fn merge_approvers(direct: &[String], resolved: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(direct.len() + resolved.len());
    for user in direct.iter().cloned().chain(resolved) {
        if !user.is_empty() && !merged.contains(&user) {
            merged.push(user);
        }
    }
    merged
}

pub fn cancellation_reason(
    step_number: i32,
    step_name: &str,
    rejected_by: &str,
    comments: Option<&str>,
) -> String {
    match comments.filter(|c| !c.trim().is_empty()) {
        Some(comments) => format!(
            "Rejected at step {} ({}) by {}: {}",
            step_number, step_name, rejected_by, comments
        ),
        None => format!(
            "Rejected at step {} ({}) by {}",
            step_number, step_name, rejected_by
        ),
    }
}

impl WorkflowEngine {
    /// Apply the rejection policy of `step_number`
    ///
    /// `round` is the round the rejection was made in. A rejection whose step
    /// or round has already been superseded changes nothing and reports what
    /// the instance settled on.
    pub async fn handle_rejection(
        &self,
        instance_id: i64,
        step_number: i32,
        round: i32,
        rejected_by: &str,
        comments: Option<String>,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let mut lost_race = false;
        for _ in 0..=self.config.max_advance_retries {
            let instance = self.load_instance(instance_id).await?;
            if lost_race && instance.is_terminal() {
                return Ok(Self::superseded_outcome(&instance, round));
            }
            instance.ensure_active()?;
            if instance.current_step != step_number || instance.round != round {
                tracing::info!(
                    instance_id,
                    step_number,
                    round,
                    current_step = instance.current_step,
                    current_round = instance.round,
                    "rejection superseded, nothing to apply"
                );
                return Ok(Self::superseded_outcome(&instance, round));
            }

            let definition = self.load_definition_for(&instance).await?;
            let step = definition.step(step_number).ok_or_else(|| {
                WorkflowError::internal(format!(
                    "Workflow {} has no step {}",
                    definition.id, step_number
                ))
            })?;

            let already_escalated = instance
                .context
                .escalated_in_round(step_number, instance.round);
            let escalation_approvers = match step.rejection_action {
                RejectionAction::Escalate if !already_escalated => {
                    let organization_id = instance.context.organization_id.as_deref();
                    let resolved = self
                        .resolve_roles(&step.escalation_roles, organization_id)
                        .await;
                    merge_approvers(&step.escalation_approvers, resolved)
                }
                _ => Vec::new(),
            };

            let now = Utc::now().naive_utc();

            match RejectionPlan::for_step(step, already_escalated, escalation_approvers) {
                RejectionPlan::Stop { fallback } => {
                    if fallback {
                        tracing::warn!(
                            instance_id,
                            step_number,
                            already_escalated,
                            "escalation not possible, rejecting workflow"
                        );
                    }

                    let reason = cancellation_reason(
                        step_number,
                        &step.name,
                        rejected_by,
                        comments.as_deref(),
                    );
                    let patch = InstancePatch {
                        status: Some(InstanceStatus::Rejected),
                        cancelled_at: Some(now),
                        cancellation_reason: Some(reason.clone()),
                        ..Default::default()
                    };
                    if !self
                        .store
                        .update_workflow_instance(instance_id, instance.revision, patch)
                        .await?
                    {
                        lost_race = true;
                        continue;
                    }

                    self.expire_quietly(instance_id, None).await;
                    self.notify(Notification::new(
                        instance.context.initiator.clone(),
                        NotificationEvent::WorkflowRejected,
                        serde_json::json!({
                            "instance_id": instance_id,
                            "entity_type": instance.entity_type,
                            "entity_id": instance.entity_id,
                            "step_number": step_number,
                            "rejected_by": rejected_by,
                            "reason": reason,
                        }),
                    ))
                    .await;
                    self.audit(
                        &instance,
                        rejected_by,
                        AuditAction::WorkflowRejected,
                        serde_json::json!({
                            "step_number": step_number,
                            "rejection_action": step.rejection_action.as_str(),
                            "escalation_fallback": fallback,
                            "comments": comments,
                        }),
                    )
                    .await;

                    tracing::info!(instance_id, step_number, rejected_by, "workflow rejected");
                    return Ok(SubmitOutcome::Rejected);
                }

                RejectionPlan::Restart => {
                    let mut context = instance.context.clone();
                    let restart_count = context
                        .record_restart(step_number, rejected_by, comments.clone(), now)
                        .restart_count;
                    let next_round = instance.round + 1;
                    let patch = InstancePatch {
                        current_step: Some(0),
                        round: Some(next_round),
                        context: Some(context),
                        ..Default::default()
                    };
                    if !self
                        .store
                        .update_workflow_instance(instance_id, instance.revision, patch)
                        .await?
                    {
                        lost_race = true;
                        continue;
                    }

                    self.expire_quietly(instance_id, None).await;

                    let restarted = self.load_instance(instance_id).await?;
                    self.notify(Notification::new(
                        restarted.context.initiator.clone(),
                        NotificationEvent::WorkflowRestarted,
                        serde_json::json!({
                            "instance_id": instance_id,
                            "rejected_at_step": step_number,
                            "rejected_by": rejected_by,
                            "restart_count": restart_count,
                        }),
                    ))
                    .await;
                    self.audit(
                        &restarted,
                        rejected_by,
                        AuditAction::WorkflowRestarted,
                        serde_json::json!({
                            "rejected_at_step": step_number,
                            "restart_count": restart_count,
                            "comments": comments,
                        }),
                    )
                    .await;
                    self.activate_step(&restarted, &definition).await?;

                    tracing::info!(instance_id, step_number, restart_count, "workflow restarted");
                    return Ok(SubmitOutcome::Restarted);
                }

                RejectionPlan::Escalate { approvers } => {
                    let mut context = instance.context.clone();
                    let next_round = instance.round + 1;
                    let escalation_count = context
                        .record_escalation(
                            step_number,
                            rejected_by,
                            comments.clone(),
                            approvers.clone(),
                            next_round,
                            now,
                        )
                        .escalation_count;
                    let patch = InstancePatch {
                        round: Some(next_round),
                        context: Some(context),
                        ..Default::default()
                    };
                    if !self
                        .store
                        .update_workflow_instance(instance_id, instance.revision, patch)
                        .await?
                    {
                        lost_race = true;
                        continue;
                    }

                    self.expire_quietly(instance_id, Some(step_number)).await;

                    let escalated = self.load_instance(instance_id).await?;
                    self.audit(
                        &escalated,
                        rejected_by,
                        AuditAction::WorkflowEscalated,
                        serde_json::json!({
                            "escalated_from_step": step_number,
                            "escalation_count": escalation_count,
                            "escalated_to": approvers,
                            "comments": comments,
                        }),
                    )
                    .await;
                    self.activate_step(&escalated, &definition).await?;

                    tracing::info!(
                        instance_id,
                        step_number,
                        escalation_count,
                        "workflow escalated"
                    );
                    return Ok(SubmitOutcome::Escalated);
                }
            }
        }

        Err(WorkflowError::Conflict { instance_id })
    }

    /// What the instance settled on after another writer handled the step
    fn superseded_outcome(instance: &WorkflowInstance, round: i32) -> SubmitOutcome {
        match instance.status {
            InstanceStatus::Completed => SubmitOutcome::Completed,
            InstanceStatus::Rejected | InstanceStatus::Cancelled => SubmitOutcome::Rejected,
            InstanceStatus::InProgress if instance.round == round => SubmitOutcome::Advanced,
            InstanceStatus::InProgress => {
                // only RESTART and ESCALATE open a new round
                let escalated = instance
                    .context
                    .escalation_history
                    .last()
                    .is_some_and(|e| e.round == instance.round);
                if escalated {
                    SubmitOutcome::Escalated
                } else {
                    SubmitOutcome::Restarted
                }
            }
        }
    }

    async fn resolve_roles(&self, roles: &[String], organization_id: Option<&str>) -> Vec<String> {
        let mut users = Vec::new();
        for role in roles {
            match self.roles.resolve_role(role, organization_id).await {
                Ok(resolved) => users.extend(resolved),
                Err(e) => tracing::warn!(role = %role, error = %e, "role resolution failed"),
            }
        }
        users
    }
}
