use console::style;
use ppm::{StartWorkflow, WorkflowEngine, WorkflowError};
use serde::Serialize;

use super::{info, print_json};

pub async fn start(
    engine: &WorkflowEngine,
    workflow_id: i64,
    entity_type: String,
    entity_id: String,
    initiator: String,
    organization_id: Option<String>,
    metadata: Option<&str>,
) -> Result<(), WorkflowError> {
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            WorkflowError::internal(format!("metadata must be a JSON object: {}", e))
        })?,
        None => serde_json::Map::new(),
    };

    let instance = engine
        .create_instance(StartWorkflow {
            workflow_id,
            entity_type,
            entity_id,
            initiator,
            organization_id,
            metadata,
        })
        .await?;
    info(format!(
        "Started instance {} for {} {}",
        style(instance.id).green(),
        instance.entity_type,
        instance.entity_id
    ));
    print_json(&instance)
}

pub async fn cancel(
    engine: &WorkflowEngine,
    instance_id: i64,
    actor: &str,
    reason: Option<String>,
) -> Result<(), WorkflowError> {
    let instance = engine.cancel_instance(instance_id, actor, reason).await?;
    info(format!("Instance {} {}", instance_id, style("cancelled").red()));
    print_json(&instance)
}

pub async fn resume(
    engine: &WorkflowEngine,
    instance_id: i64,
    actor: &str,
) -> Result<(), WorkflowError> {
    let outcome = engine.resume(instance_id, actor).await?;
    info(format!("Instance {} {}", instance_id, style(outcome.as_str()).green()));
    print_json(&serde_json::json!({
        "instance_id": instance_id,
        "outcome": outcome,
    }))
}

pub async fn status(engine: &WorkflowEngine, instance_id: i64) -> Result<(), WorkflowError> {
    let view = engine.get_instance_status(instance_id).await?;
    info(format!(
        "{} is {} at step {}/{}{}",
        style(&view.workflow_name).bold(),
        view.instance.status.as_str(),
        view.instance.current_step + 1,
        view.total_steps,
        view.current_step_name
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default()
    ));
    print_json(&view)
}

#[derive(Serialize)]
struct SweepResult {
    instance_id: i64,
    outcome: ppm::SubmitOutcome,
}

pub async fn sweep(engine: &WorkflowEngine, actor: &str) -> Result<(), WorkflowError> {
    let handled: Vec<SweepResult> = engine
        .sweep_timeouts(actor)
        .await?
        .into_iter()
        .map(|(instance_id, outcome)| SweepResult {
            instance_id,
            outcome,
        })
        .collect();

    if handled.is_empty() {
        info(style("No timed out approvals").dim());
    } else {
        info(format!("Handled {} timed out instance(s)", handled.len()));
    }
    print_json(&handled)
}
