//! Workflow persistence
//!
//! The engine only talks to [`WorkflowStore`]. Writes are single-row and
//! conditional: instance updates compare-and-swap on `revision`, approval
//! decisions only apply while the record is still pending.

use crate::database::DbConnection;
use crate::error::WorkflowError;
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{NewWorkflowDefinition, StepDefinition, WorkflowDefinition};
use crate::workflow::entities::{
    workflow_approvals, workflow_definitions, workflow_instances, workflow_steps,
};
use crate::workflow::types::{
    Approval, ApprovalStatus, ApprovalType, InstanceStatus, RejectionAction, WorkflowInstance,
};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;

/// Row data for a new instance
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub workflow_id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub context: WorkflowContext,
    pub started_by: String,
}

/// Row data for a new pending approval
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub workflow_instance_id: i64,
    pub step_number: i32,
    pub step_name: String,
    pub round: i32,
    pub approver_id: String,
    pub expires_at: Option<NaiveDateTime>,
}

/// Fields written when a pending approval leaves the pending state
#[derive(Debug, Clone)]
pub struct ApprovalUpdate {
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub decided_at: NaiveDateTime,
    pub delegated_to: Option<String>,
}

/// Partial instance update; `None` leaves the column alone
#[derive(Debug, Clone, Default)]
pub struct InstancePatch {
    pub current_step: Option<i32>,
    pub round: Option<i32>,
    pub status: Option<InstanceStatus>,
    pub context: Option<WorkflowContext>,
    pub completed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
}

/// Persistence contract of the workflow engine
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_definition(
        &self,
        definition: &NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, WorkflowError>;

    async fn get_definition(&self, id: i64) -> Result<Option<WorkflowDefinition>, WorkflowError>;

    /// All definitions, optionally limited to one organization
    async fn list_definitions(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, WorkflowError>;

    async fn insert_instance(&self, instance: NewInstance)
        -> Result<WorkflowInstance, WorkflowError>;

    async fn get_workflow_instance(
        &self,
        id: i64,
    ) -> Result<Option<WorkflowInstance>, WorkflowError>;

    /// Definition owning the instance
    async fn get_workflow_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError>;

    /// Apply `patch` only if the row is still at `expected_revision`
    ///
    /// Returns false when another writer got there first.
    async fn update_workflow_instance(
        &self,
        id: i64,
        expected_revision: i32,
        patch: InstancePatch,
    ) -> Result<bool, WorkflowError>;

    /// Approvals of an instance in creation order, optionally for one step
    async fn get_approvals_for_instance(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<Vec<Approval>, WorkflowError>;

    async fn create_approval(&self, approval: NewApproval) -> Result<Approval, WorkflowError>;

    /// Decide a pending approval
    ///
    /// Returns false when the record is no longer pending.
    async fn update_approval(&self, id: i64, update: ApprovalUpdate)
        -> Result<bool, WorkflowError>;

    /// Mark pending approvals EXPIRED, for one step or the whole instance
    async fn expire_pending_approvals(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<u64, WorkflowError>;

    async fn pending_approvals_for_user(
        &self,
        approver_id: &str,
    ) -> Result<Vec<Approval>, WorkflowError>;

    /// Pending approvals whose deadline is before `now`
    async fn overdue_approvals(&self, now: NaiveDateTime) -> Result<Vec<Approval>, WorkflowError>;
}

/// [`WorkflowStore`] backed by the SeaORM entities
#[derive(Clone)]
pub struct SeaOrmWorkflowStore {
    db: DbConnection,
}

impl SeaOrmWorkflowStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    async fn load_steps(
        &self,
        workflow_ids: Vec<i64>,
    ) -> Result<HashMap<i64, Vec<StepDefinition>>, WorkflowError> {
        let models = workflow_steps::Entity::find()
            .filter(workflow_steps::Column::WorkflowId.is_in(workflow_ids))
            .order_by_asc(workflow_steps::Column::StepOrder)
            .all(self.db.inner())
            .await?;

        let mut steps: HashMap<i64, Vec<StepDefinition>> = HashMap::new();
        for model in models {
            let workflow_id = model.workflow_id;
            steps
                .entry(workflow_id)
                .or_default()
                .push(step_from_model(model)?);
        }
        Ok(steps)
    }
}

#[async_trait]
impl WorkflowStore for SeaOrmWorkflowStore {
    async fn insert_definition(
        &self,
        definition: &NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        let now = Utc::now().naive_utc();
        let txn = self.db.inner().begin().await?;

        let inserted = workflow_definitions::ActiveModel {
            name: Set(definition.name.clone()),
            description: Set(definition.description.clone()),
            organization_id: Set(definition.organization_id.clone()),
            created_by: Set(definition.created_by.clone()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut steps = Vec::with_capacity(definition.steps.len());
        for step in &definition.steps {
            workflow_steps::ActiveModel {
                workflow_id: Set(inserted.id),
                step_order: Set(step.step_order),
                name: Set(step.name.clone()),
                approvers: Set(serde_json::to_string(&step.approvers)?),
                approval_type: Set(step.approval_type.as_str().to_string()),
                rejection_action: Set(step.rejection_action.as_str().to_string()),
                escalation_approvers: Set(serde_json::to_string(&step.escalation_approvers)?),
                escalation_roles: Set(serde_json::to_string(&step.escalation_roles)?),
                timeout_hours: Set(step.timeout_hours),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            steps.push(StepDefinition {
                step_order: step.step_order,
                name: step.name.clone(),
                approvers: step.approvers.clone(),
                approval_type: step.approval_type,
                rejection_action: step.rejection_action,
                escalation_approvers: step.escalation_approvers.clone(),
                escalation_roles: step.escalation_roles.clone(),
                timeout_hours: step.timeout_hours,
            });
        }

        txn.commit().await?;

        steps.sort_by_key(|s| s.step_order);
        Ok(definition_from_model(inserted, steps))
    }

    async fn get_definition(&self, id: i64) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        let Some(model) = workflow_definitions::Entity::find_by_id(id)
            .one(self.db.inner())
            .await?
        else {
            return Ok(None);
        };

        let mut steps = self.load_steps(vec![model.id]).await?;
        let steps = steps.remove(&model.id).unwrap_or_default();
        Ok(Some(definition_from_model(model, steps)))
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        let mut query =
            workflow_definitions::Entity::find().order_by_asc(workflow_definitions::Column::Id);
        if let Some(org) = organization_id {
            query = query.filter(workflow_definitions::Column::OrganizationId.eq(org));
        }
        let models = query.all(self.db.inner()).await?;

        let mut steps = self.load_steps(models.iter().map(|m| m.id).collect()).await?;
        Ok(models
            .into_iter()
            .map(|model| {
                let own = steps.remove(&model.id).unwrap_or_default();
                definition_from_model(model, own)
            })
            .collect())
    }

    async fn insert_instance(
        &self,
        instance: NewInstance,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let now = Utc::now().naive_utc();

        let inserted = workflow_instances::ActiveModel {
            workflow_id: Set(instance.workflow_id),
            entity_type: Set(instance.entity_type),
            entity_id: Set(instance.entity_id),
            current_step: Set(0),
            round: Set(0),
            status: Set(InstanceStatus::InProgress.as_str().to_string()),
            context: Set(instance.context.to_json()?),
            revision: Set(0),
            started_by: Set(instance.started_by),
            started_at: Set(now),
            completed_at: Set(None),
            cancelled_at: Set(None),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.inner())
        .await?;

        instance_from_model(inserted)
    }

    async fn get_workflow_instance(
        &self,
        id: i64,
    ) -> Result<Option<WorkflowInstance>, WorkflowError> {
        workflow_instances::Entity::find_by_id(id)
            .one(self.db.inner())
            .await?
            .map(instance_from_model)
            .transpose()
    }

    async fn get_workflow_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        let Some(instance) = workflow_instances::Entity::find_by_id(instance_id)
            .one(self.db.inner())
            .await?
        else {
            return Ok(None);
        };

        self.get_definition(instance.workflow_id).await
    }

    async fn update_workflow_instance(
        &self,
        id: i64,
        expected_revision: i32,
        patch: InstancePatch,
    ) -> Result<bool, WorkflowError> {
        use workflow_instances::Column;

        let now = Utc::now().naive_utc();
        let mut update = workflow_instances::Entity::update_many()
            .col_expr(Column::Revision, Expr::value(expected_revision + 1))
            .col_expr(Column::UpdatedAt, Expr::value(now));

        if let Some(step) = patch.current_step {
            update = update.col_expr(Column::CurrentStep, Expr::value(step));
        }
        if let Some(round) = patch.round {
            update = update.col_expr(Column::Round, Expr::value(round));
        }
        if let Some(status) = patch.status {
            update = update.col_expr(Column::Status, Expr::value(status.as_str()));
        }
        if let Some(context) = &patch.context {
            update = update.col_expr(Column::Context, Expr::value(context.to_json()?));
        }
        if let Some(at) = patch.completed_at {
            update = update.col_expr(Column::CompletedAt, Expr::value(Some(at)));
        }
        if let Some(at) = patch.cancelled_at {
            update = update.col_expr(Column::CancelledAt, Expr::value(Some(at)));
        }
        if let Some(reason) = patch.cancellation_reason {
            update = update.col_expr(Column::CancellationReason, Expr::value(Some(reason)));
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Revision.eq(expected_revision))
            .exec(self.db.inner())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn get_approvals_for_instance(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<Vec<Approval>, WorkflowError> {
        let mut query = workflow_approvals::Entity::find()
            .filter(workflow_approvals::Column::WorkflowInstanceId.eq(instance_id));
        if let Some(step) = step_number {
            query = query.filter(workflow_approvals::Column::StepNumber.eq(step));
        }

        query
            .order_by_asc(workflow_approvals::Column::Id)
            .all(self.db.inner())
            .await?
            .into_iter()
            .map(approval_from_model)
            .collect()
    }

    async fn create_approval(&self, approval: NewApproval) -> Result<Approval, WorkflowError> {
        let now = Utc::now().naive_utc();

        let inserted = workflow_approvals::ActiveModel {
            workflow_instance_id: Set(approval.workflow_instance_id),
            step_number: Set(approval.step_number),
            step_name: Set(approval.step_name),
            round: Set(approval.round),
            approver_id: Set(approval.approver_id),
            status: Set(ApprovalStatus::Pending.as_str().to_string()),
            comments: Set(None),
            decided_at: Set(None),
            delegated_to: Set(None),
            expires_at: Set(approval.expires_at),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.inner())
        .await?;

        approval_from_model(inserted)
    }

    async fn update_approval(
        &self,
        id: i64,
        update: ApprovalUpdate,
    ) -> Result<bool, WorkflowError> {
        use workflow_approvals::Column;

        let result = workflow_approvals::Entity::update_many()
            .col_expr(Column::Status, Expr::value(update.status.as_str()))
            .col_expr(Column::Comments, Expr::value(update.comments))
            .col_expr(Column::DecidedAt, Expr::value(Some(update.decided_at)))
            .col_expr(Column::DelegatedTo, Expr::value(update.delegated_to))
            .col_expr(Column::UpdatedAt, Expr::value(update.decided_at))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ApprovalStatus::Pending.as_str()))
            .exec(self.db.inner())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn expire_pending_approvals(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<u64, WorkflowError> {
        use workflow_approvals::Column;

        let mut update = workflow_approvals::Entity::update_many()
            .col_expr(Column::Status, Expr::value(ApprovalStatus::Expired.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(Column::WorkflowInstanceId.eq(instance_id))
            .filter(Column::Status.eq(ApprovalStatus::Pending.as_str()));
        if let Some(step) = step_number {
            update = update.filter(Column::StepNumber.eq(step));
        }

        Ok(update.exec(self.db.inner()).await?.rows_affected)
    }

    async fn pending_approvals_for_user(
        &self,
        approver_id: &str,
    ) -> Result<Vec<Approval>, WorkflowError> {
        workflow_approvals::Entity::find()
            .filter(workflow_approvals::Column::ApproverId.eq(approver_id))
            .filter(workflow_approvals::Column::Status.eq(ApprovalStatus::Pending.as_str()))
            .order_by_asc(workflow_approvals::Column::CreatedAt)
            .order_by_asc(workflow_approvals::Column::Id)
            .all(self.db.inner())
            .await?
            .into_iter()
            .map(approval_from_model)
            .collect()
    }

    async fn overdue_approvals(&self, now: NaiveDateTime) -> Result<Vec<Approval>, WorkflowError> {
        workflow_approvals::Entity::find()
            .filter(workflow_approvals::Column::Status.eq(ApprovalStatus::Pending.as_str()))
            .filter(workflow_approvals::Column::ExpiresAt.is_not_null())
            .filter(workflow_approvals::Column::ExpiresAt.lt(now))
            .order_by_asc(workflow_approvals::Column::ExpiresAt)
            .all(self.db.inner())
            .await?
            .into_iter()
            .map(approval_from_model)
            .collect()
    }
}

fn definition_from_model(
    model: workflow_definitions::Model,
    steps: Vec<StepDefinition>,
) -> WorkflowDefinition {
    WorkflowDefinition {
        id: model.id,
        name: model.name,
        description: model.description,
        organization_id: model.organization_id,
        created_by: model.created_by,
        is_active: model.is_active,
        steps,
        created_at: model.created_at,
    }
}

fn step_from_model(model: workflow_steps::Model) -> Result<StepDefinition, WorkflowError> {
    let approval_type = ApprovalType::from_str(&model.approval_type).ok_or_else(|| {
        WorkflowError::internal(format!("Invalid approval type '{}'", model.approval_type))
    })?;
    let rejection_action = RejectionAction::from_str(&model.rejection_action).ok_or_else(|| {
        WorkflowError::internal(format!(
            "Invalid rejection action '{}'",
            model.rejection_action
        ))
    })?;

    Ok(StepDefinition {
        step_order: model.step_order,
        name: model.name,
        approvers: decode_list(&model.approvers)?,
        approval_type,
        rejection_action,
        escalation_approvers: decode_list(&model.escalation_approvers)?,
        escalation_roles: decode_list(&model.escalation_roles)?,
        timeout_hours: model.timeout_hours,
    })
}

fn instance_from_model(model: workflow_instances::Model) -> Result<WorkflowInstance, WorkflowError> {
    let status = InstanceStatus::from_str(&model.status).ok_or_else(|| {
        WorkflowError::internal(format!("Invalid instance status '{}'", model.status))
    })?;

    Ok(WorkflowInstance {
        id: model.id,
        workflow_id: model.workflow_id,
        entity_type: model.entity_type,
        entity_id: model.entity_id,
        current_step: model.current_step,
        round: model.round,
        status,
        context: WorkflowContext::from_json(&model.context)?,
        revision: model.revision,
        started_by: model.started_by,
        started_at: model.started_at,
        completed_at: model.completed_at,
        cancelled_at: model.cancelled_at,
        cancellation_reason: model.cancellation_reason,
        updated_at: model.updated_at,
    })
}

fn approval_from_model(model: workflow_approvals::Model) -> Result<Approval, WorkflowError> {
    let status = ApprovalStatus::from_str(&model.status).ok_or_else(|| {
        WorkflowError::internal(format!("Invalid approval status '{}'", model.status))
    })?;

    Ok(Approval {
        id: model.id,
        workflow_instance_id: model.workflow_instance_id,
        step_number: model.step_number,
        step_name: model.step_name,
        round: model.round,
        approver_id: model.approver_id,
        status,
        comments: model.comments,
        decided_at: model.decided_at,
        delegated_to: model.delegated_to,
        expires_at: model.expires_at,
        created_at: model.created_at,
    })
}

fn decode_list(raw: &str) -> Result<Vec<String>, WorkflowError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}
