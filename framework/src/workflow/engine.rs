//! Approval workflow state machine

use crate::audit::{AuditAction, AuditEvent, AuditLogger};
use crate::error::WorkflowError;
use crate::notifications::{Notification, NotificationEvent, Notifier};
use crate::roles::RoleResolver;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{NewWorkflowDefinition, StepDefinition, WorkflowDefinition};
use crate::workflow::store::{
    ApprovalUpdate, InstancePatch, NewApproval, NewInstance, WorkflowStore,
};
use crate::workflow::types::{
    Approval, ApprovalOutcome, ApprovalStatus, ApprovalSubmission, InstanceStatus,
    InstanceStatusView, StartWorkflow, SubmitOutcome, WorkflowInstance,
};
use chrono::{Duration, NaiveDateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const TIMEOUT_COMMENT: &str = "Approval timed out";

/// Result of a single advance attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Moved,
    Completed,
    /// Someone else already moved the instance past `from_step`
    AlreadyMoved,
}

/// The approval workflow engine
///
/// Owns its collaborators; construct one per process (or per request) and
/// share it behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// let engine = WorkflowEngine::new(
///     Arc::new(SeaOrmWorkflowStore::new(db.clone())),
///     Arc::new(DatabaseNotifier::new(db.clone())),
///     Arc::new(DatabaseAuditLogger::new(db.clone())),
///     Arc::new(NoRoleResolver),
///     WorkflowConfig::from_env(),
/// );
///
/// let instance = engine.create_instance(StartWorkflow {
///     workflow_id: 1,
///     entity_type: "change_request".into(),
///     entity_id: "cr-42".into(),
///     initiator: "alice".into(),
///     ..Default::default()
/// }).await?;
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) store: Arc<dyn WorkflowStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogger>,
    pub(crate) roles: Arc<dyn RoleResolver>,
    pub(crate) config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLogger>,
        roles: Arc<dyn RoleResolver>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            roles,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Validate and store a new definition
    pub async fn create_definition(
        &self,
        definition: NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        definition.check()?;

        let created = self.store.insert_definition(&definition).await?;
        tracing::info!(
            workflow_id = created.id,
            name = %created.name,
            steps = created.steps.len(),
            "workflow definition created"
        );
        Ok(created)
    }

    pub async fn get_definition(&self, id: i64) -> Result<WorkflowDefinition, WorkflowError> {
        self.store
            .get_definition(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Workflow definition", id))
    }

    pub async fn list_definitions(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        self.store.list_definitions(organization_id).await
    }

    /// Start a definition against an entity
    ///
    /// The instance begins IN_PROGRESS at step 0 and the step 0 approvers are
    /// asked for their decision.
    pub async fn create_instance(
        &self,
        request: StartWorkflow,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let definition = self.get_definition(request.workflow_id).await?;
        if definition.steps.is_empty() {
            return Err(WorkflowError::invalid_definition(format!(
                "workflow {} has no steps",
                definition.id
            )));
        }
        definition.validate_structure()?;

        let mut context = WorkflowContext::new(
            request.initiator.clone(),
            request
                .organization_id
                .clone()
                .or_else(|| definition.organization_id.clone()),
        );
        context.metadata = request.metadata;

        let instance = self
            .store
            .insert_instance(NewInstance {
                workflow_id: definition.id,
                entity_type: request.entity_type,
                entity_id: request.entity_id,
                context,
                started_by: request.initiator.clone(),
            })
            .await?;

        self.activate_step(&instance, &definition).await?;
        self.audit(
            &instance,
            &request.initiator,
            AuditAction::WorkflowCreated,
            serde_json::json!({
                "workflow_id": definition.id,
                "workflow_name": definition.name,
                "entity_type": instance.entity_type,
                "entity_id": instance.entity_id,
            }),
        )
        .await;

        tracing::info!(
            instance_id = instance.id,
            workflow_id = definition.id,
            entity_type = %instance.entity_type,
            entity_id = %instance.entity_id,
            "workflow instance created"
        );
        Ok(instance)
    }

    /// Record an approver's decision and drive the instance forward
    ///
    /// Once the decision is stored it stands. If the follow-up work fails the
    /// outcome is `PendingAdvancement` and [`resume`](Self::resume) can finish it.
    pub async fn submit_approval(
        &self,
        submission: ApprovalSubmission,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let ApprovalSubmission {
            instance_id,
            approver_id,
            decision,
            comments,
        } = submission;

        if !matches!(decision, ApprovalStatus::Approved | ApprovalStatus::Rejected) {
            return Err(WorkflowError::invalid_decision(decision.as_str()));
        }

        let instance = self.load_instance(instance_id).await?;
        instance.ensure_active()?;
        let step_number = instance.current_step;

        let approval = self.pending_record_for(&instance, &approver_id).await?;
        let decided = self
            .store
            .update_approval(
                approval.id,
                ApprovalUpdate {
                    status: decision,
                    comments: comments.clone(),
                    decided_at: Utc::now().naive_utc(),
                    delegated_to: None,
                },
            )
            .await?;
        if !decided {
            return Err(self.already_decided(&instance, approval.id).await);
        }

        self.audit(
            &instance,
            &approver_id,
            AuditAction::ApprovalDecision,
            serde_json::json!({
                "approval_id": approval.id,
                "step_number": step_number,
                "decision": decision.as_str(),
                "comments": comments,
            }),
        )
        .await;

        let follow_up = match decision {
            ApprovalStatus::Rejected => {
                self.handle_rejection(
                    instance_id,
                    step_number,
                    approval.round,
                    &approver_id,
                    comments,
                )
                .await
            }
            _ => self.evaluate_and_advance(instance_id, &approver_id, step_number).await,
        };

        let outcome = match follow_up {
            Ok(outcome) => outcome,
            // another decision finished the instance first
            Err(WorkflowError::AlreadyTerminal { status, .. }) => match status {
                InstanceStatus::Completed => SubmitOutcome::Completed,
                _ => SubmitOutcome::Rejected,
            },
            Err(e) => {
                tracing::warn!(
                    instance_id,
                    approval_id = approval.id,
                    error = %e,
                    "decision recorded, workflow left pending advancement"
                );
                SubmitOutcome::PendingAdvancement
            }
        };

        let current = self
            .store
            .get_workflow_instance(instance_id)
            .await
            .ok()
            .flatten()
            .unwrap_or(instance);

        Ok(ApprovalOutcome {
            instance_id,
            approval_id: approval.id,
            outcome,
            status: current.status,
            current_step: current.current_step,
        })
    }

    /// Move the instance past its current step unconditionally
    ///
    /// Completes the instance when the current step is the last one.
    pub async fn advance_step(
        &self,
        instance_id: i64,
        actor: &str,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let instance = self.load_instance(instance_id).await?;
        instance.ensure_active()?;

        self.advance_from(instance_id, actor, instance.current_step)
            .await?;
        self.load_instance(instance_id).await
    }

    /// Snapshot of an instance and its current step
    pub async fn get_instance_status(
        &self,
        instance_id: i64,
    ) -> Result<InstanceStatusView, WorkflowError> {
        let instance = self.load_instance(instance_id).await?;
        let definition = self.load_definition_for(&instance).await?;
        let step = definition.step(instance.current_step);

        let approvals = self.current_records(&instance).await?;
        let step_satisfied = match step {
            Some(step) if !instance.is_terminal() => {
                let statuses: Vec<ApprovalStatus> = approvals.iter().map(|a| a.status).collect();
                step.approval_type.is_satisfied(&statuses)
            }
            _ => false,
        };

        Ok(InstanceStatusView {
            workflow_name: definition.name.clone(),
            total_steps: definition.steps.len(),
            current_step_name: step.map(|s| s.name.clone()),
            approvals,
            step_satisfied,
            instance,
        })
    }

    /// Finish whatever an interrupted submission left undone
    ///
    /// Applies a recorded rejection, advances a satisfied step, or re-creates
    /// the approvals of a step whose activation was cut short.
    pub async fn resume(
        &self,
        instance_id: i64,
        actor: &str,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let instance = self.load_instance(instance_id).await?;
        instance.ensure_active()?;
        let definition = self.load_definition_for(&instance).await?;
        let step = self.current_step(&instance, &definition)?;

        let records = self.current_records(&instance).await?;
        if records.is_empty() {
            tracing::info!(instance_id, step = instance.current_step, "re-activating step");
            self.activate_step(&instance, &definition).await?;
            return Ok(SubmitOutcome::PendingApprovals);
        }

        if let Some(rejection) = records
            .iter()
            .find(|a| a.status == ApprovalStatus::Rejected)
        {
            return self
                .handle_rejection(
                    instance_id,
                    instance.current_step,
                    instance.round,
                    &rejection.approver_id,
                    rejection.comments.clone(),
                )
                .await;
        }

        let statuses: Vec<ApprovalStatus> = records.iter().map(|a| a.status).collect();
        if step.approval_type.is_satisfied(&statuses) {
            return self
                .advance_outcome(instance_id, actor, instance.current_step)
                .await;
        }

        // pending approvals may be missing for some approvers
        self.activate_step(&instance, &definition).await?;
        Ok(SubmitOutcome::PendingApprovals)
    }

    /// Hand a pending approval to another user
    ///
    /// Returns the delegate's new pending record.
    pub async fn delegate_approval(
        &self,
        instance_id: i64,
        approver_id: &str,
        delegate_to: &str,
        comments: Option<String>,
    ) -> Result<Approval, WorkflowError> {
        if delegate_to.trim().is_empty() || delegate_to == approver_id {
            return Err(WorkflowError::invalid_decision(format!(
                "delegate to '{}'",
                delegate_to
            )));
        }

        let instance = self.load_instance(instance_id).await?;
        instance.ensure_active()?;
        let approval = self.pending_record_for(&instance, approver_id).await?;

        let holders = self.current_records(&instance).await?;
        if holders.iter().any(|a| a.approver_id == delegate_to) {
            return Err(WorkflowError::invalid_decision(format!(
                "delegate to '{}', who already holds an approval at step {}",
                delegate_to, instance.current_step
            )));
        }
        let delegated = self
            .store
            .update_approval(
                approval.id,
                ApprovalUpdate {
                    status: ApprovalStatus::Delegated,
                    comments: comments.clone(),
                    decided_at: Utc::now().naive_utc(),
                    delegated_to: Some(delegate_to.to_string()),
                },
            )
            .await?;
        if !delegated {
            return Err(self.already_decided(&instance, approval.id).await);
        }

        let created = self
            .store
            .create_approval(NewApproval {
                workflow_instance_id: instance_id,
                step_number: approval.step_number,
                step_name: approval.step_name.clone(),
                round: approval.round,
                approver_id: delegate_to.to_string(),
                expires_at: approval.expires_at,
            })
            .await?;

        self.notify(Notification::new(
            delegate_to,
            NotificationEvent::ApprovalDelegated,
            serde_json::json!({
                "instance_id": instance_id,
                "approval_id": created.id,
                "step_number": created.step_number,
                "step_name": created.step_name,
                "delegated_by": approver_id,
                "comments": comments,
            }),
        ))
        .await;
        self.audit(
            &instance,
            approver_id,
            AuditAction::ApprovalDelegated,
            serde_json::json!({
                "approval_id": approval.id,
                "delegated_to": delegate_to,
                "new_approval_id": created.id,
                "step_number": created.step_number,
            }),
        )
        .await;

        tracing::info!(instance_id, approver_id, delegate_to, "approval delegated");
        Ok(created)
    }

    /// Cancel an active instance
    pub async fn cancel_instance(
        &self,
        instance_id: i64,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Cancelled by {}", actor));

        for _ in 0..=self.config.max_advance_retries {
            let instance = self.load_instance(instance_id).await?;
            instance.ensure_active()?;

            let patch = InstancePatch {
                status: Some(InstanceStatus::Cancelled),
                cancelled_at: Some(Utc::now().naive_utc()),
                cancellation_reason: Some(reason.clone()),
                ..Default::default()
            };
            if !self
                .store
                .update_workflow_instance(instance_id, instance.revision, patch)
                .await?
            {
                continue;
            }

            self.expire_quietly(instance_id, None).await;
            self.notify(Notification::new(
                instance.context.initiator.clone(),
                NotificationEvent::WorkflowCancelled,
                serde_json::json!({
                    "instance_id": instance_id,
                    "cancelled_by": actor,
                    "reason": reason,
                }),
            ))
            .await;
            self.audit(
                &instance,
                actor,
                AuditAction::WorkflowCancelled,
                serde_json::json!({
                    "step_number": instance.current_step,
                    "reason": reason,
                }),
            )
            .await;

            tracing::info!(instance_id, actor, "workflow cancelled");
            return self.load_instance(instance_id).await;
        }

        Err(WorkflowError::Conflict { instance_id })
    }

    /// Pending approvals past their deadline
    pub async fn overdue_approvals(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<Approval>, WorkflowError> {
        self.store.overdue_approvals(now).await
    }

    /// Apply the current step's rejection policy if one of its approvals is overdue
    ///
    /// Returns None when there is nothing to do.
    pub async fn handle_step_timeout(
        &self,
        instance_id: i64,
        actor: &str,
    ) -> Result<Option<SubmitOutcome>, WorkflowError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.is_terminal() {
            return Ok(None);
        }

        let now = Utc::now().naive_utc();
        let overdue: Vec<String> = self
            .current_records(&instance)
            .await?
            .into_iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .filter(|a| a.expires_at.is_some_and(|at| at < now))
            .map(|a| a.approver_id)
            .collect();
        if overdue.is_empty() {
            return Ok(None);
        }

        self.audit(
            &instance,
            actor,
            AuditAction::StepTimedOut,
            serde_json::json!({
                "step_number": instance.current_step,
                "approvers": overdue,
            }),
        )
        .await;
        tracing::info!(instance_id, step = instance.current_step, "approval step timed out");

        let outcome = self
            .handle_rejection(
                instance_id,
                instance.current_step,
                instance.round,
                actor,
                Some(TIMEOUT_COMMENT.to_string()),
            )
            .await?;
        Ok(Some(outcome))
    }

    /// One pass over every overdue approval
    ///
    /// Each instance is handled once; failures are logged and skipped.
    pub async fn sweep_timeouts(
        &self,
        actor: &str,
    ) -> Result<Vec<(i64, SubmitOutcome)>, WorkflowError> {
        let overdue = self.overdue_approvals(Utc::now().naive_utc()).await?;
        let instances: BTreeSet<i64> = overdue.iter().map(|a| a.workflow_instance_id).collect();

        let mut handled = Vec::new();
        for instance_id in instances {
            match self.handle_step_timeout(instance_id, actor).await {
                Ok(Some(outcome)) => handled.push((instance_id, outcome)),
                Ok(None) => {}
                Err(e) => tracing::warn!(instance_id, error = %e, "timeout handling failed"),
            }
        }
        Ok(handled)
    }

    /// Actionable approvals waiting on a user
    ///
    /// Leftovers of finished instances and superseded rounds are skipped.
    pub async fn pending_approvals_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<Approval>, WorkflowError> {
        let pending = self.store.pending_approvals_for_user(user_id).await?;
        let mut instances: HashMap<i64, Option<WorkflowInstance>> = HashMap::new();

        let mut actionable = Vec::with_capacity(pending.len());
        for approval in pending {
            if !instances.contains_key(&approval.workflow_instance_id) {
                let instance = self
                    .store
                    .get_workflow_instance(approval.workflow_instance_id)
                    .await?;
                instances.insert(approval.workflow_instance_id, instance);
            }

            let is_current = instances
                .get(&approval.workflow_instance_id)
                .and_then(Option::as_ref)
                .is_some_and(|i| {
                    !i.is_terminal()
                        && i.current_step == approval.step_number
                        && i.round == approval.round
                });
            if is_current {
                actionable.push(approval);
            }
        }
        Ok(actionable)
    }

    async fn evaluate_and_advance(
        &self,
        instance_id: i64,
        actor: &str,
        step_number: i32,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.is_terminal() || instance.current_step != step_number {
            return Ok(Self::settled_outcome(&instance));
        }

        let definition = self.load_definition_for(&instance).await?;
        let step = self.current_step(&instance, &definition)?;
        let statuses: Vec<ApprovalStatus> = self
            .current_records(&instance)
            .await?
            .iter()
            .map(|a| a.status)
            .collect();

        if !step.approval_type.is_satisfied(&statuses) {
            return Ok(SubmitOutcome::PendingApprovals);
        }

        self.advance_outcome(instance_id, actor, step_number).await
    }

    async fn advance_outcome(
        &self,
        instance_id: i64,
        actor: &str,
        from_step: i32,
    ) -> Result<SubmitOutcome, WorkflowError> {
        match self.advance_from(instance_id, actor, from_step).await? {
            Advance::Moved => Ok(SubmitOutcome::Advanced),
            Advance::Completed => Ok(SubmitOutcome::Completed),
            Advance::AlreadyMoved => {
                let instance = self.load_instance(instance_id).await?;
                Ok(Self::settled_outcome(&instance))
            }
        }
    }

    /// Outcome reported when another caller already moved the instance on
    fn settled_outcome(instance: &WorkflowInstance) -> SubmitOutcome {
        match instance.status {
            InstanceStatus::Completed => SubmitOutcome::Completed,
            InstanceStatus::Rejected | InstanceStatus::Cancelled => SubmitOutcome::Rejected,
            InstanceStatus::InProgress => SubmitOutcome::Advanced,
        }
    }

    /// Advance from `from_step`, guarded by the instance revision
    ///
    /// A second caller racing on the same step observes `AlreadyMoved`.
    async fn advance_from(
        &self,
        instance_id: i64,
        actor: &str,
        from_step: i32,
    ) -> Result<Advance, WorkflowError> {
        for _ in 0..=self.config.max_advance_retries {
            let instance = self.load_instance(instance_id).await?;
            if instance.is_terminal() || instance.current_step != from_step {
                return Ok(Advance::AlreadyMoved);
            }

            let definition = self.load_definition_for(&instance).await?;
            self.current_step(&instance, &definition)?;
            let now = Utc::now().naive_utc();

            if from_step >= definition.last_step_index() {
                let patch = InstancePatch {
                    status: Some(InstanceStatus::Completed),
                    completed_at: Some(now),
                    ..Default::default()
                };
                if !self
                    .store
                    .update_workflow_instance(instance_id, instance.revision, patch)
                    .await?
                {
                    continue;
                }

                self.expire_quietly(instance_id, None).await;
                self.notify(Notification::new(
                    instance.context.initiator.clone(),
                    NotificationEvent::WorkflowCompleted,
                    serde_json::json!({
                        "instance_id": instance_id,
                        "workflow_name": definition.name,
                        "entity_type": instance.entity_type,
                        "entity_id": instance.entity_id,
                    }),
                ))
                .await;
                self.audit(
                    &instance,
                    actor,
                    AuditAction::WorkflowCompleted,
                    serde_json::json!({ "final_step": from_step }),
                )
                .await;

                tracing::info!(instance_id, "workflow completed");
                return Ok(Advance::Completed);
            }

            let to_step = from_step + 1;
            let patch = InstancePatch {
                current_step: Some(to_step),
                ..Default::default()
            };
            if !self
                .store
                .update_workflow_instance(instance_id, instance.revision, patch)
                .await?
            {
                continue;
            }

            self.audit(
                &instance,
                actor,
                AuditAction::WorkflowAdvanced,
                serde_json::json!({ "from_step": from_step, "to_step": to_step }),
            )
            .await;

            // left-over pending records of an ANY step
            self.expire_quietly(instance_id, Some(from_step)).await;

            let advanced = self.load_instance(instance_id).await?;
            self.activate_step(&advanced, &definition).await?;

            tracing::info!(instance_id, from_step, to_step, "workflow advanced");
            return Ok(Advance::Moved);
        }

        Err(WorkflowError::Conflict { instance_id })
    }

    /// Make sure every assignee of the current step holds a live record
    ///
    /// Creates only the missing records, so running it twice is harmless.
    /// Escalated steps are assigned to the escalation approvers of the round.
    pub(crate) async fn activate_step(
        &self,
        instance: &WorkflowInstance,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<Approval>, WorkflowError> {
        let step = self.current_step(instance, definition)?;

        let escalation = instance
            .context
            .escalation_history
            .iter()
            .rev()
            .find(|e| e.escalated_from_step == step.step_order && e.round == instance.round);
        let (assignees, step_name, event) = match escalation {
            Some(e) => (
                e.escalated_to.clone(),
                format!("{}{}", step.name, self.config.escalated_suffix),
                NotificationEvent::ApprovalEscalated,
            ),
            None => (
                step.approvers.clone(),
                step.name.clone(),
                NotificationEvent::ApprovalRequested,
            ),
        };

        // delegated records count: the delegate holds the live one
        let assigned: Vec<String> = self
            .store
            .get_approvals_for_instance(instance.id, Some(step.step_order))
            .await?
            .into_iter()
            .filter(|a| a.round == instance.round && a.status != ApprovalStatus::Expired)
            .map(|a| a.approver_id)
            .collect();
        let expires_at = self.deadline(step);

        let mut created = Vec::new();
        for approver in assignees {
            if assigned.contains(&approver) {
                continue;
            }

            let approval = self
                .store
                .create_approval(NewApproval {
                    workflow_instance_id: instance.id,
                    step_number: step.step_order,
                    step_name: step_name.clone(),
                    round: instance.round,
                    approver_id: approver,
                    expires_at,
                })
                .await?;
            created.push(approval);
        }

        for approval in &created {
            self.notify(Notification::new(
                approval.approver_id.clone(),
                event,
                serde_json::json!({
                    "instance_id": instance.id,
                    "approval_id": approval.id,
                    "entity_type": instance.entity_type,
                    "entity_id": instance.entity_id,
                    "step_number": approval.step_number,
                    "step_name": approval.step_name,
                    "expires_at": approval.expires_at,
                    "metadata": instance.context.metadata,
                }),
            ))
            .await;
        }

        Ok(created)
    }

    /// Records of the current step and round that still count
    async fn current_records(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Vec<Approval>, WorkflowError> {
        Ok(self
            .store
            .get_approvals_for_instance(instance.id, Some(instance.current_step))
            .await?
            .into_iter()
            .filter(|a| a.round == instance.round && a.status.is_live())
            .collect())
    }

    /// The approver's pending record at the current step
    ///
    /// Fails with AlreadyDecided when the approver already acted in this round.
    async fn pending_record_for(
        &self,
        instance: &WorkflowInstance,
        approver_id: &str,
    ) -> Result<Approval, WorkflowError> {
        let records: Vec<Approval> = self
            .store
            .get_approvals_for_instance(instance.id, Some(instance.current_step))
            .await?
            .into_iter()
            .filter(|a| a.round == instance.round && a.approver_id == approver_id)
            .collect();

        if let Some(pending) = records.iter().find(|a| a.status == ApprovalStatus::Pending) {
            return Ok(pending.clone());
        }

        match records.last() {
            Some(decided) => Err(WorkflowError::AlreadyDecided {
                approval_id: decided.id,
                existing: decided.status,
            }),
            None => Err(WorkflowError::not_found(
                "Approval",
                format!(
                    "instance {} step {} approver {}",
                    instance.id, instance.current_step, approver_id
                ),
            )),
        }
    }

    /// Build AlreadyDecided from the record's current state
    ///
    /// A failed lookup is returned as is; a vanished record is NotFound.
    async fn already_decided(
        &self,
        instance: &WorkflowInstance,
        approval_id: i64,
    ) -> WorkflowError {
        let records = match self
            .store
            .get_approvals_for_instance(instance.id, Some(instance.current_step))
            .await
        {
            Ok(records) => records,
            Err(e) => return e,
        };

        match records.into_iter().find(|a| a.id == approval_id) {
            Some(record) => WorkflowError::AlreadyDecided {
                approval_id,
                existing: record.status,
            },
            None => WorkflowError::not_found("Approval", approval_id),
        }
    }

    fn current_step<'d>(
        &self,
        instance: &WorkflowInstance,
        definition: &'d WorkflowDefinition,
    ) -> Result<&'d StepDefinition, WorkflowError> {
        definition.step(instance.current_step).ok_or_else(|| {
            WorkflowError::internal(format!(
                "Instance {} points at missing step {} of workflow {}",
                instance.id, instance.current_step, definition.id
            ))
        })
    }

    /// Approval deadline for a step, None when unset or out of range
    fn deadline(&self, step: &StepDefinition) -> Option<NaiveDateTime> {
        let hours = step
            .timeout_hours
            .map(i64::from)
            .or(self.config.default_timeout_hours)?;

        let deadline = Duration::try_hours(hours)
            .and_then(|timeout| Utc::now().naive_utc().checked_add_signed(timeout));
        if deadline.is_none() {
            tracing::warn!(
                step = step.step_order,
                hours,
                "approval timeout out of range, no deadline set"
            );
        }
        deadline
    }

    pub(crate) async fn load_instance(
        &self,
        instance_id: i64,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.store
            .get_workflow_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Workflow instance", instance_id))
    }

    pub(crate) async fn load_definition_for(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        self.store
            .get_workflow_for_instance(instance.id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Workflow definition", instance.workflow_id))
    }

    pub(crate) async fn expire_quietly(&self, instance_id: i64, step_number: Option<i32>) {
        match self
            .store
            .expire_pending_approvals(instance_id, step_number)
            .await
        {
            Ok(0) => {}
            Ok(expired) => tracing::debug!(instance_id, ?step_number, expired, "approvals expired"),
            Err(e) => tracing::warn!(instance_id, error = %e, "failed to expire approvals"),
        }
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        let event = notification.event;

        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(
                user_id = %user_id,
                event = event.as_str(),
                error = %e,
                "notification failed"
            );
        }
    }

    pub(crate) async fn audit(
        &self,
        instance: &WorkflowInstance,
        user_id: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) {
        let event = AuditEvent {
            organization_id: instance.context.organization_id.clone(),
            user_id: user_id.to_string(),
            action,
            entity_type: "workflow_instance".to_string(),
            entity_id: instance.id.to_string(),
            details,
        };

        if let Err(e) = self.audit.append_event(event).await {
            tracing::warn!(
                instance_id = instance.id,
                action = action.as_str(),
                error = %e,
                "audit log failed"
            );
        }
    }
}
