use super::*;
use crate::audit::{AuditAction, AuditEvent, AuditLogger};
use crate::database::TestDatabase;
use crate::error::WorkflowError;
use crate::migrations::Migrator;
use crate::notifications::{Notification, NotificationEvent, Notifier};
use crate::roles::{NoRoleResolver, RoleResolver, StaticRoleResolver};
use crate::workflow::entities::workflow_instances;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use pretty_assertions::assert_eq;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn events_for(&self, user_id: &str) -> Vec<NotificationEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.event)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), WorkflowError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().unwrap().iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditLogger for RecordingAudit {
    async fn append_event(&self, event: AuditEvent) -> Result<(), WorkflowError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), WorkflowError> {
        Err(WorkflowError::internal("mail server down"))
    }
}

#[async_trait]
impl AuditLogger for FailingNotifier {
    async fn append_event(&self, _event: AuditEvent) -> Result<(), WorkflowError> {
        Err(WorkflowError::database("audit table locked"))
    }
}

/// Store wrapper that can fail approval inserts, lose revision races or
/// lose a decision and then the connection
struct TestStore {
    inner: SeaOrmWorkflowStore,
    fail_create_approval: AtomicBool,
    lost_races: AtomicU32,
    lose_decision: AtomicBool,
    fail_approval_reads: AtomicBool,
}

impl TestStore {
    fn new(inner: SeaOrmWorkflowStore) -> Self {
        Self {
            inner,
            fail_create_approval: AtomicBool::new(false),
            lost_races: AtomicU32::new(0),
            lose_decision: AtomicBool::new(false),
            fail_approval_reads: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WorkflowStore for TestStore {
    async fn insert_definition(
        &self,
        definition: &NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        self.inner.insert_definition(definition).await
    }

    async fn get_definition(&self, id: i64) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        self.inner.get_definition(id).await
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        self.inner.list_definitions(organization_id).await
    }

    async fn insert_instance(
        &self,
        instance: NewInstance,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.inner.insert_instance(instance).await
    }

    async fn get_workflow_instance(
        &self,
        id: i64,
    ) -> Result<Option<WorkflowInstance>, WorkflowError> {
        self.inner.get_workflow_instance(id).await
    }

    async fn get_workflow_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<Option<WorkflowDefinition>, WorkflowError> {
        self.inner.get_workflow_for_instance(instance_id).await
    }

    async fn update_workflow_instance(
        &self,
        id: i64,
        expected_revision: i32,
        patch: InstancePatch,
    ) -> Result<bool, WorkflowError> {
        let lose = self
            .lost_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            // a competing writer bumps the revision first
            if let Some(current) = self.inner.get_workflow_instance(id).await? {
                self.inner
                    .update_workflow_instance(id, current.revision, InstancePatch::default())
                    .await?;
            }
        }
        self.inner
            .update_workflow_instance(id, expected_revision, patch)
            .await
    }

    async fn get_approvals_for_instance(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<Vec<Approval>, WorkflowError> {
        if self.fail_approval_reads.load(Ordering::SeqCst) {
            return Err(WorkflowError::database("connection reset"));
        }
        self.inner
            .get_approvals_for_instance(instance_id, step_number)
            .await
    }

    async fn create_approval(&self, approval: NewApproval) -> Result<Approval, WorkflowError> {
        if self.fail_create_approval.load(Ordering::SeqCst) {
            return Err(WorkflowError::database("connection reset"));
        }
        self.inner.create_approval(approval).await
    }

    async fn update_approval(
        &self,
        id: i64,
        update: ApprovalUpdate,
    ) -> Result<bool, WorkflowError> {
        if self.lose_decision.load(Ordering::SeqCst) {
            self.fail_approval_reads.store(true, Ordering::SeqCst);
            return Ok(false);
        }
        self.inner.update_approval(id, update).await
    }

    async fn expire_pending_approvals(
        &self,
        instance_id: i64,
        step_number: Option<i32>,
    ) -> Result<u64, WorkflowError> {
        self.inner
            .expire_pending_approvals(instance_id, step_number)
            .await
    }

    async fn pending_approvals_for_user(
        &self,
        approver_id: &str,
    ) -> Result<Vec<Approval>, WorkflowError> {
        self.inner.pending_approvals_for_user(approver_id).await
    }

    async fn overdue_approvals(&self, now: NaiveDateTime) -> Result<Vec<Approval>, WorkflowError> {
        self.inner.overdue_approvals(now).await
    }
}

struct Harness {
    db: TestDatabase,
    store: Arc<TestStore>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<RecordingAudit>,
    engine: WorkflowEngine,
}

async fn harness() -> Harness {
    harness_with(WorkflowConfig::default(), Arc::new(NoRoleResolver)).await
}

async fn harness_with(config: WorkflowConfig, roles: Arc<dyn RoleResolver>) -> Harness {
    let db = TestDatabase::fresh::<Migrator>().await.unwrap();
    let store = Arc::new(TestStore::new(SeaOrmWorkflowStore::new(db.connection())));
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAudit::default());
    let engine = WorkflowEngine::new(
        store.clone(),
        notifier.clone(),
        audit.clone(),
        roles,
        config,
    );

    Harness {
        db,
        store,
        notifier,
        audit,
        engine,
    }
}

impl Harness {
    async fn define(&self, steps: Vec<NewStepDefinition>) -> WorkflowDefinition {
        self.engine
            .create_definition(NewWorkflowDefinition {
                name: "Change request".into(),
                created_by: "admin".into(),
                organization_id: Some("acme".into()),
                steps,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn start(&self, definition: &WorkflowDefinition) -> WorkflowInstance {
        self.engine
            .create_instance(StartWorkflow {
                workflow_id: definition.id,
                entity_type: "change_request".into(),
                entity_id: "cr-1".into(),
                initiator: "alice".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn decide(
        &self,
        instance_id: i64,
        approver: &str,
        decision: ApprovalStatus,
        comments: Option<&str>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        self.engine
            .submit_approval(ApprovalSubmission {
                instance_id,
                approver_id: approver.into(),
                decision,
                comments: comments.map(String::from),
            })
            .await
    }

    async fn approve(&self, instance_id: i64, approver: &str) -> ApprovalOutcome {
        self.decide(instance_id, approver, ApprovalStatus::Approved, None)
            .await
            .unwrap()
    }

    async fn reject(&self, instance_id: i64, approver: &str, comments: &str) -> ApprovalOutcome {
        self.decide(instance_id, approver, ApprovalStatus::Rejected, Some(comments))
            .await
            .unwrap()
    }

    async fn instance(&self, instance_id: i64) -> WorkflowInstance {
        self.store
            .get_workflow_instance(instance_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn approvals(&self, instance_id: i64) -> Vec<Approval> {
        self.store
            .get_approvals_for_instance(instance_id, None)
            .await
            .unwrap()
    }

    /// Approvers holding a pending record, sorted
    async fn pending(&self, instance_id: i64) -> Vec<(i32, String)> {
        let mut pending: Vec<(i32, String)> = self
            .approvals(instance_id)
            .await
            .into_iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .map(|a| (a.step_number, a.approver_id))
            .collect();
        pending.sort();
        pending
    }
}

fn pending_at(step: i32, approvers: &[&str]) -> Vec<(i32, String)> {
    approvers.iter().map(|a| (step, a.to_string())).collect()
}

#[tokio::test]
async fn create_instance_requests_step_zero_approvals() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["pmo-a", "pmo-b"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;

    let instance = h.start(&definition).await;

    assert_eq!(instance.current_step, 0);
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(instance.context.initiator, "alice");
    assert_eq!(instance.context.organization_id.as_deref(), Some("acme"));
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["pmo-a", "pmo-b"]));
    assert_eq!(
        h.notifier.events_for("pmo-a"),
        vec![NotificationEvent::ApprovalRequested]
    );
    assert!(h.notifier.events_for("sponsor").is_empty());
    assert_eq!(h.audit.actions(), vec![AuditAction::WorkflowCreated]);
}

#[tokio::test]
async fn create_instance_for_unknown_definition_is_not_found() {
    let h = harness().await;

    let err = h
        .engine
        .create_instance(StartWorkflow {
            workflow_id: 404,
            entity_type: "project".into(),
            entity_id: "p-1".into(),
            initiator: "alice".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn invalid_definitions_are_refused_before_any_write() {
    let h = harness().await;

    let err = h
        .engine
        .create_definition(NewWorkflowDefinition {
            name: "Empty".into(),
            created_by: "admin".into(),
            steps: vec![],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_definition");

    let err = h
        .engine
        .create_definition(NewWorkflowDefinition {
            name: "Gap".into(),
            created_by: "admin".into(),
            steps: vec![
                NewStepDefinition::new(0, "PMO", ["pmo"]),
                NewStepDefinition::new(2, "CFO", ["cfo"]),
            ],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);

    assert!(h.engine.list_definitions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn all_step_completes_after_every_approver_approves() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a", "b"])]).await;
    let instance = h.start(&definition).await;

    let first = h.approve(instance.id, "a").await;
    assert_eq!(first.outcome, SubmitOutcome::PendingApprovals);
    assert_eq!(first.status, InstanceStatus::InProgress);
    assert!(h.instance(instance.id).await.completed_at.is_none());

    let second = h.approve(instance.id, "b").await;
    assert_eq!(second.outcome, SubmitOutcome::Completed);
    assert_eq!(second.status, InstanceStatus::Completed);

    let completed = h.instance(instance.id).await;
    assert_eq!(completed.status, InstanceStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert!(completed.cancelled_at.is_none());
    assert_eq!(
        h.notifier.events_for("alice"),
        vec![NotificationEvent::WorkflowCompleted]
    );
}

#[tokio::test]
async fn any_step_advances_on_first_approval() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b", "c"]).approval_type(ApprovalType::Any),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.approve(instance.id, "b").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Advanced);
    assert_eq!(outcome.current_step, 1);
    assert_eq!(h.pending(instance.id).await, pending_at(1, &["sponsor"]));

    // siblings of the satisfied step can no longer act
    let err = h
        .decide(instance.id, "a", ApprovalStatus::Approved, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn advancing_walks_steps_one_at_a_time() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["b"]),
            NewStepDefinition::new(2, "CFO", ["c"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let mut seen = vec![instance.current_step];
    for _ in 0..2 {
        let advanced = h.engine.advance_step(instance.id, "admin").await.unwrap();
        seen.push(advanced.current_step);
    }
    assert_eq!(seen, vec![0, 1, 2]);

    let completed = h.engine.advance_step(instance.id, "admin").await.unwrap();
    assert_eq!(completed.status, InstanceStatus::Completed);
    assert_eq!(completed.current_step, 2);

    let actions = h.audit.actions();
    assert_eq!(
        actions
            .iter()
            .filter(|a| **a == AuditAction::WorkflowAdvanced)
            .count(),
        2
    );
    assert_eq!(actions.last(), Some(&AuditAction::WorkflowCompleted));
}

#[tokio::test]
async fn second_decision_on_same_record_is_already_decided() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a", "b"])]).await;
    let instance = h.start(&definition).await;

    h.decide(instance.id, "a", ApprovalStatus::Approved, Some("looks good"))
        .await
        .unwrap();
    let before = h.approvals(instance.id).await;

    let err = h
        .decide(instance.id, "a", ApprovalStatus::Approved, Some("again"))
        .await
        .unwrap_err();
    match &err {
        WorkflowError::AlreadyDecided { existing, .. } => {
            assert_eq!(*existing, ApprovalStatus::Approved)
        }
        other => panic!("expected AlreadyDecided, got {:?}", other),
    }
    assert_eq!(err.to_json()["current_status"], "approved");

    let err = h
        .decide(instance.id, "a", ApprovalStatus::Rejected, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_decided");

    assert_eq!(h.approvals(instance.id).await, before);
}

#[tokio::test]
async fn non_decisions_and_strangers_are_refused() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;
    let instance = h.start(&definition).await;

    let err = h
        .decide(instance.id, "a", ApprovalStatus::Expired, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_decision");

    let err = h
        .decide(instance.id, "mallory", ApprovalStatus::Approved, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = h
        .decide(9999, "a", ApprovalStatus::Approved, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    assert_eq!(h.pending(instance.id).await, pending_at(0, &["a"]));
}

#[tokio::test]
async fn concurrent_final_approvals_advance_once() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let (first, second) = tokio::join!(h.approve(instance.id, "a"), h.approve(instance.id, "b"));
    let advanced = [first.outcome, second.outcome]
        .iter()
        .filter(|o| **o == SubmitOutcome::Advanced)
        .count();
    assert!(advanced >= 1);

    let current = h.instance(instance.id).await;
    assert_eq!(current.current_step, 1);
    assert_eq!(h.pending(instance.id).await, pending_at(1, &["sponsor"]));
}

#[tokio::test]
async fn lost_revision_race_is_retried() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.store.lost_races.store(2, Ordering::SeqCst);

    let outcome = h.approve(instance.id, "a").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Advanced);
    let current = h.instance(instance.id).await;
    assert_eq!(current.current_step, 1);
    // two competing writes plus the advance itself
    assert_eq!(current.revision, 3);
}

#[tokio::test]
async fn exhausted_retries_leave_decision_pending_advancement() {
    let config = WorkflowConfig::builder().max_advance_retries(0).build();
    let h = harness_with(config, Arc::new(NoRoleResolver)).await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.store.lost_races.store(1, Ordering::SeqCst);

    let outcome = h.approve(instance.id, "a").await;
    assert_eq!(outcome.outcome, SubmitOutcome::PendingAdvancement);
    assert_eq!(outcome.current_step, 0);
    assert_eq!(h.approvals(instance.id).await[0].status, ApprovalStatus::Approved);

    let resumed = h.engine.resume(instance.id, "ops").await.unwrap();
    assert_eq!(resumed, SubmitOutcome::Advanced);
    assert_eq!(h.pending(instance.id).await, pending_at(1, &["sponsor"]));
}

#[tokio::test]
async fn failed_step_activation_is_resumable() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["s1", "s2"]),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.store.fail_create_approval.store(true, Ordering::SeqCst);

    let outcome = h.approve(instance.id, "a").await;
    assert_eq!(outcome.outcome, SubmitOutcome::PendingAdvancement);
    assert_eq!(outcome.current_step, 1);
    assert!(h.pending(instance.id).await.is_empty());

    h.store.fail_create_approval.store(false, Ordering::SeqCst);
    let resumed = h.engine.resume(instance.id, "ops").await.unwrap();
    assert_eq!(resumed, SubmitOutcome::PendingApprovals);
    assert_eq!(h.pending(instance.id).await, pending_at(1, &["s1", "s2"]));

    // a second resume creates nothing new
    h.engine.resume(instance.id, "ops").await.unwrap();
    assert_eq!(h.approvals(instance.id).await.len(), 3);

    h.approve(instance.id, "s1").await;
    assert_eq!(h.approve(instance.id, "s2").await.outcome, SubmitOutcome::Completed);
}

#[tokio::test]
async fn advance_is_audited_even_when_activation_fails() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.store.fail_create_approval.store(true, Ordering::SeqCst);

    let outcome = h.approve(instance.id, "a").await;
    assert_eq!(outcome.outcome, SubmitOutcome::PendingAdvancement);

    let advanced = |actions: Vec<AuditAction>| {
        actions
            .into_iter()
            .filter(|a| *a == AuditAction::WorkflowAdvanced)
            .count()
    };
    assert_eq!(advanced(h.audit.actions()), 1);

    h.store.fail_create_approval.store(false, Ordering::SeqCst);
    h.engine.resume(instance.id, "ops").await.unwrap();
    assert_eq!(advanced(h.audit.actions()), 1);
}

#[tokio::test]
async fn lost_decision_reports_the_failed_lookup() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;
    let instance = h.start(&definition).await;
    h.store.lose_decision.store(true, Ordering::SeqCst);

    let err = h
        .decide(instance.id, "a", ApprovalStatus::Approved, None)
        .await
        .unwrap_err();

    // no made-up decision state
    assert_eq!(err.kind(), "database");
}

#[tokio::test]
async fn out_of_range_timeouts_leave_approvals_without_deadline() {
    let config = WorkflowConfig::builder()
        .default_timeout_hours(i64::MAX)
        .build();
    let h = harness_with(config, Arc::new(NoRoleResolver)).await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;

    let instance = h.start(&definition).await;

    let approvals = h.approvals(instance.id).await;
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].expires_at, None);
}

#[tokio::test]
async fn collaborator_failures_do_not_fail_the_workflow() {
    let db = TestDatabase::fresh::<Migrator>().await.unwrap();
    let engine = WorkflowEngine::new(
        Arc::new(SeaOrmWorkflowStore::new(db.connection())),
        Arc::new(FailingNotifier),
        Arc::new(FailingNotifier),
        Arc::new(NoRoleResolver),
        WorkflowConfig::default(),
    );

    let definition = engine
        .create_definition(NewWorkflowDefinition {
            name: "Quick".into(),
            created_by: "admin".into(),
            steps: vec![NewStepDefinition::new(0, "PMO", ["a"])],
            ..Default::default()
        })
        .await
        .unwrap();
    let instance = engine
        .create_instance(StartWorkflow {
            workflow_id: definition.id,
            entity_type: "project".into(),
            entity_id: "p-7".into(),
            initiator: "alice".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = engine
        .submit_approval(ApprovalSubmission {
            instance_id: instance.id,
            approver_id: "a".into(),
            decision: ApprovalStatus::Approved,
            comments: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.outcome, SubmitOutcome::Completed);
}

#[tokio::test]
async fn stop_rejects_the_instance() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.reject(instance.id, "a", "scope unclear").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Rejected);
    let rejected = h.instance(instance.id).await;
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert!(rejected.cancelled_at.is_some());
    assert!(rejected.completed_at.is_none());
    let reason = rejected.cancellation_reason.unwrap();
    assert!(reason.contains("step 0"));
    assert!(reason.contains("a"));
    assert!(reason.contains("scope unclear"));

    assert!(h
        .approvals(instance.id)
        .await
        .iter()
        .all(|a| a.step_number == 0));
    assert!(h.pending(instance.id).await.is_empty());
    assert_eq!(
        h.notifier.events_for("alice"),
        vec![NotificationEvent::WorkflowRejected]
    );
}

#[tokio::test]
async fn restart_returns_to_step_zero_with_fresh_approvals() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["b"]),
            NewStepDefinition::new(2, "CFO", ["c", "d"]).on_reject(RejectionAction::Restart),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.approve(instance.id, "a").await;
    h.approve(instance.id, "b").await;
    assert_eq!(h.instance(instance.id).await.current_step, 2);

    let outcome = h.reject(instance.id, "c", "numbers are off").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Restarted);
    assert_eq!(outcome.current_step, 0);
    let restarted = h.instance(instance.id).await;
    assert_eq!(restarted.status, InstanceStatus::InProgress);
    assert_eq!(restarted.round, 1);
    assert_eq!(restarted.context.restart_history.len(), 1);
    let entry = &restarted.context.restart_history[0];
    assert_eq!(entry.rejected_at_step, 2);
    assert_eq!(entry.rejected_by, "c");
    assert_eq!(entry.restart_count, 1);

    let approvals = h.approvals(instance.id).await;
    assert!(approvals
        .iter()
        .filter(|a| a.round == 0)
        .all(|a| a.status != ApprovalStatus::Pending));
    assert_eq!(
        approvals
            .iter()
            .find(|a| a.approver_id == "d")
            .map(|a| a.status),
        Some(ApprovalStatus::Expired)
    );
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["a"]));

    // the approver of round 0 decides again in round 1
    h.approve(instance.id, "a").await;
    h.approve(instance.id, "b").await;
    let outcome = h.reject(instance.id, "d", "still off").await;
    assert_eq!(outcome.outcome, SubmitOutcome::Restarted);
    let again = h.instance(instance.id).await;
    assert_eq!(again.context.restart_count(), 2);
    assert_eq!(again.context.restart_history[1].restart_count, 2);
}

#[tokio::test]
async fn concurrent_rejections_restart_once() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"]).on_reject(RejectionAction::Restart)
        ])
        .await;
    let instance = h.start(&definition).await;

    let (first, second) = tokio::join!(
        h.decide(instance.id, "a", ApprovalStatus::Rejected, Some("no")),
        h.decide(instance.id, "b", ApprovalStatus::Rejected, Some("no too")),
    );
    // the later decision may find its record already expired
    for outcome in [first, second].into_iter().flatten() {
        assert_eq!(outcome.outcome, SubmitOutcome::Restarted);
    }

    let restarted = h.instance(instance.id).await;
    assert_eq!(restarted.context.restart_history.len(), 1);
    assert_eq!(restarted.round, 1);
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["a", "b"]));

    // the stale round-0 rejection is a no-op once replayed
    let replayed = h
        .engine
        .handle_rejection(instance.id, 0, 0, "b", None)
        .await
        .unwrap();
    assert_eq!(replayed, SubmitOutcome::Restarted);
    assert_eq!(h.instance(instance.id).await.revision, restarted.revision);
}

#[tokio::test]
async fn escalate_adds_escalation_approvers_at_the_same_step() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"])
                .on_reject(RejectionAction::Escalate)
                .escalate_to(["x", "y"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.reject(instance.id, "a", "need director input").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Escalated);
    let escalated = h.instance(instance.id).await;
    assert_eq!(escalated.current_step, 0);
    assert!(escalated.context.is_escalated);
    assert_eq!(escalated.context.escalation_history.len(), 1);
    assert_eq!(escalated.context.escalation_history[0].escalation_count, 1);
    assert_eq!(escalated.context.escalation_history[0].escalated_from_step, 0);

    assert_eq!(h.pending(instance.id).await, pending_at(0, &["x", "y"]));
    let escalation_records: Vec<Approval> = h
        .approvals(instance.id)
        .await
        .into_iter()
        .filter(|a| a.status == ApprovalStatus::Pending)
        .collect();
    assert!(escalation_records
        .iter()
        .all(|a| a.step_name == "PMO (Escalated)"));
    // b's original record was expired
    assert!(h
        .decide(instance.id, "b", ApprovalStatus::Approved, None)
        .await
        .is_err());
    assert_eq!(
        h.notifier.events_for("x"),
        vec![NotificationEvent::ApprovalEscalated]
    );

    h.approve(instance.id, "x").await;
    let outcome = h.approve(instance.id, "y").await;
    assert_eq!(outcome.outcome, SubmitOutcome::Advanced);
    assert_eq!(h.pending(instance.id).await, pending_at(1, &["sponsor"]));
}

#[tokio::test]
async fn escalation_approver_rejection_is_final() {
    let h = harness().await;
    let definition = h
        .define(vec![NewStepDefinition::new(0, "PMO", ["a"])
            .on_reject(RejectionAction::Escalate)
            .escalate_to(["x"])])
        .await;
    let instance = h.start(&definition).await;
    h.reject(instance.id, "a", "no").await;

    let outcome = h.reject(instance.id, "x", "agreed, no").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Rejected);
    let rejected = h.instance(instance.id).await;
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert_eq!(rejected.context.escalation_history.len(), 1);
}

#[tokio::test]
async fn concurrent_rejections_escalate_once() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"])
                .on_reject(RejectionAction::Escalate)
                .escalate_to(["x", "y"]),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let (first, second) = tokio::join!(
        h.decide(instance.id, "a", ApprovalStatus::Rejected, Some("no")),
        h.decide(instance.id, "b", ApprovalStatus::Rejected, Some("no too")),
    );
    // the later decision may find its record already expired
    for outcome in [first, second].into_iter().flatten() {
        assert_eq!(outcome.outcome, SubmitOutcome::Escalated);
    }

    let escalated = h.instance(instance.id).await;
    assert_eq!(escalated.status, InstanceStatus::InProgress);
    assert_eq!(escalated.round, 1);
    assert_eq!(escalated.context.escalation_history.len(), 1);
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["x", "y"]));
}

#[tokio::test]
async fn rejection_from_a_superseded_round_changes_nothing() {
    let h = harness().await;
    let definition = h
        .define(vec![NewStepDefinition::new(0, "PMO", ["a", "b"])
            .on_reject(RejectionAction::Escalate)
            .escalate_to(["x", "y"])])
        .await;
    let instance = h.start(&definition).await;
    h.reject(instance.id, "a", "no").await;
    let escalated = h.instance(instance.id).await;

    // b decided in round 0 but its follow-up runs after a's escalation
    let outcome = h
        .engine
        .handle_rejection(instance.id, 0, 0, "b", Some("no too".into()))
        .await
        .unwrap();

    assert_eq!(outcome, SubmitOutcome::Escalated);
    let after = h.instance(instance.id).await;
    assert_eq!(after.status, InstanceStatus::InProgress);
    assert_eq!(after.revision, escalated.revision);
    assert_eq!(after.cancellation_reason, None);
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["x", "y"]));
}

#[tokio::test]
async fn escalate_without_escalation_approvers_falls_back_to_stop() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]).on_reject(RejectionAction::Escalate),
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.reject(instance.id, "a", "no budget").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Rejected);
    let rejected = h.instance(instance.id).await;
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert!(rejected.context.escalation_history.is_empty());
    assert!(!rejected.context.is_escalated);
    assert_eq!(h.approvals(instance.id).await.len(), 1);
}

#[tokio::test]
async fn escalation_roles_resolve_through_the_role_resolver() {
    let roles = StaticRoleResolver::new()
        .with_role("finance", ["global-cfo"])
        .with_org_role("acme", "finance", ["dana"]);
    let h = harness_with(WorkflowConfig::default(), Arc::new(roles)).await;
    let definition = h
        .define(vec![NewStepDefinition::new(0, "PMO", ["a"])
            .on_reject(RejectionAction::Escalate)
            .escalate_to_roles(["finance", "nobody"])])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.reject(instance.id, "a", "over budget").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Escalated);
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["dana"]));
}

#[tokio::test]
async fn unresolvable_escalation_roles_fall_back_to_stop() {
    let h = harness().await;
    let definition = h
        .define(vec![NewStepDefinition::new(0, "PMO", ["a"])
            .on_reject(RejectionAction::Escalate)
            .escalate_to_roles(["finance"])])
        .await;
    let instance = h.start(&definition).await;

    let outcome = h.reject(instance.id, "a", "no").await;

    assert_eq!(outcome.outcome, SubmitOutcome::Rejected);
}

#[tokio::test]
async fn restart_after_escalation_clears_the_flag() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"])
                .on_reject(RejectionAction::Escalate)
                .escalate_to(["x"]),
            NewStepDefinition::new(1, "Sponsor", ["s"]).on_reject(RejectionAction::Restart),
        ])
        .await;
    let instance = h.start(&definition).await;
    h.reject(instance.id, "a", "no").await;
    h.approve(instance.id, "x").await;

    h.reject(instance.id, "s", "start over").await;

    let restarted = h.instance(instance.id).await;
    assert!(!restarted.context.is_escalated);
    assert_eq!(restarted.round, 2);
    // step 0 goes back to its normal approvers
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["a"]));
}

#[tokio::test]
async fn terminal_instances_accept_no_further_changes() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;
    let instance = h.start(&definition).await;
    h.approve(instance.id, "a").await;

    let completed = h.instance(instance.id).await;
    let approvals = h.approvals(instance.id).await;

    let err = h
        .decide(instance.id, "a", ApprovalStatus::Rejected, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_terminal");
    assert_eq!(err.to_json()["current_status"], "completed");

    let err = h.engine.advance_step(instance.id, "admin").await.unwrap_err();
    assert_eq!(err.kind(), "already_terminal");
    let err = h
        .engine
        .cancel_instance(instance.id, "admin", None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(h
        .engine
        .handle_rejection(instance.id, 0, completed.round, "admin", None)
        .await
        .is_err());

    let after = h.instance(instance.id).await;
    assert_eq!(after.status, completed.status);
    assert_eq!(after.completed_at, completed.completed_at);
    assert_eq!(after.revision, completed.revision);
    assert_eq!(h.approvals(instance.id).await, approvals);
}

#[tokio::test]
async fn cancel_expires_outstanding_approvals() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a", "b"])]).await;
    let instance = h.start(&definition).await;

    let cancelled = h
        .engine
        .cancel_instance(instance.id, "alice", Some("project dropped".into()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, InstanceStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("project dropped"));
    assert!(cancelled.cancelled_at.is_some());
    assert!(h.pending(instance.id).await.is_empty());
    assert!(h.engine.pending_approvals_for("a").await.unwrap().is_empty());
    assert_eq!(h.audit.actions().last(), Some(&AuditAction::WorkflowCancelled));
}

#[tokio::test]
async fn legacy_pending_status_counts_as_active() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;
    let instance = h.start(&definition).await;

    workflow_instances::Entity::update_many()
        .col_expr(workflow_instances::Column::Status, Expr::value("pending"))
        .filter(workflow_instances::Column::Id.eq(instance.id))
        .exec(h.db.connection().inner())
        .await
        .unwrap();
    assert_eq!(h.instance(instance.id).await.status, InstanceStatus::InProgress);

    assert_eq!(h.approve(instance.id, "a").await.outcome, SubmitOutcome::Completed);
}

#[tokio::test]
async fn delegation_hands_the_decision_to_someone_else() {
    let h = harness().await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a", "b"])]).await;
    let instance = h.start(&definition).await;

    let delegated = h
        .engine
        .delegate_approval(instance.id, "a", "deputy", Some("on leave".into()))
        .await
        .unwrap();
    assert_eq!(delegated.approver_id, "deputy");
    assert_eq!(delegated.status, ApprovalStatus::Pending);
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["b", "deputy"]));
    assert_eq!(
        h.notifier.events_for("deputy"),
        vec![NotificationEvent::ApprovalDelegated]
    );

    let original = h
        .approvals(instance.id)
        .await
        .into_iter()
        .find(|a| a.approver_id == "a")
        .unwrap();
    assert_eq!(original.status, ApprovalStatus::Delegated);
    assert_eq!(original.delegated_to.as_deref(), Some("deputy"));

    let err = h
        .engine
        .delegate_approval(instance.id, "a", "someone", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_decided");
    let err = h
        .engine
        .delegate_approval(instance.id, "b", "deputy", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_decision");

    // resume must not hand a's slot back to a
    h.engine.resume(instance.id, "ops").await.unwrap();
    assert_eq!(h.pending(instance.id).await, pending_at(0, &["b", "deputy"]));

    h.approve(instance.id, "b").await;
    assert_eq!(h.approve(instance.id, "deputy").await.outcome, SubmitOutcome::Completed);
}

#[tokio::test]
async fn timed_out_steps_apply_their_rejection_policy() {
    // a negative default deadline makes every new approval overdue
    let config = WorkflowConfig::builder().default_timeout_hours(-1).build();
    let h = harness_with(config, Arc::new(NoRoleResolver)).await;
    let definition = h.define(vec![NewStepDefinition::new(0, "PMO", ["a"])]).await;
    let instance = h.start(&definition).await;

    let overdue = h.engine.overdue_approvals(Utc::now().naive_utc()).await.unwrap();
    assert_eq!(overdue.len(), 1);

    let handled = h.engine.sweep_timeouts("scheduler").await.unwrap();
    assert_eq!(handled, vec![(instance.id, SubmitOutcome::Rejected)]);

    let rejected = h.instance(instance.id).await;
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert!(rejected
        .cancellation_reason
        .unwrap()
        .contains("Approval timed out"));
    assert!(h.audit.actions().contains(&AuditAction::StepTimedOut));

    assert_eq!(
        h.engine
            .handle_step_timeout(instance.id, "scheduler")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn approvals_before_their_deadline_do_not_time_out() {
    let h = harness().await;
    let definition = h
        .define(vec![NewStepDefinition::new(0, "PMO", ["a"]).timeout_hours(72)])
        .await;
    let instance = h.start(&definition).await;

    let approval = &h.approvals(instance.id).await[0];
    let deadline = approval.expires_at.unwrap();
    assert!(deadline > Utc::now().naive_utc() + chrono::Duration::hours(71));

    assert_eq!(
        h.engine
            .handle_step_timeout(instance.id, "scheduler")
            .await
            .unwrap(),
        None
    );
    assert!(h.engine.sweep_timeouts("scheduler").await.unwrap().is_empty());
}

#[tokio::test]
async fn inbox_lists_only_actionable_approvals() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a"]),
            NewStepDefinition::new(1, "Sponsor", ["a", "b"]),
        ])
        .await;
    let first = h.start(&definition).await;
    let second = h.start(&definition).await;
    h.approve(first.id, "a").await;

    let inbox = h.engine.pending_approvals_for("a").await.unwrap();
    let mut slots: Vec<(i64, i32)> = inbox
        .iter()
        .map(|a| (a.workflow_instance_id, a.step_number))
        .collect();
    slots.sort();
    assert_eq!(slots, vec![(first.id, 1), (second.id, 0)]);
}

#[tokio::test]
async fn status_view_reports_current_step() {
    let h = harness().await;
    let definition = h
        .define(vec![
            NewStepDefinition::new(0, "PMO", ["a", "b"]).approval_type(ApprovalType::Any),
            NewStepDefinition::new(1, "Sponsor", ["s"]),
        ])
        .await;
    let instance = h.start(&definition).await;

    let view = h.engine.get_instance_status(instance.id).await.unwrap();
    assert_eq!(view.workflow_name, "Change request");
    assert_eq!(view.total_steps, 2);
    assert_eq!(view.current_step_name.as_deref(), Some("PMO"));
    assert_eq!(view.approvals.len(), 2);
    assert!(!view.step_satisfied);

    h.approve(instance.id, "a").await;
    let view = h.engine.get_instance_status(instance.id).await.unwrap();
    assert_eq!(view.current_step_name.as_deref(), Some("Sponsor"));
    assert_eq!(view.approvals.len(), 1);

    let err = h.engine.get_instance_status(404).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}
