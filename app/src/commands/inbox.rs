use ppm::{DatabaseAuditLogger, DatabaseNotifier, DbConnection, WorkflowEngine, WorkflowError};
use serde_json::{json, Value};

use super::{info, print_json};

/// Stored JSON text back to a value, raw text if it does not parse
fn decode(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn run(
    engine: &WorkflowEngine,
    db: &DbConnection,
    user_id: &str,
) -> Result<(), WorkflowError> {
    let approvals = engine.pending_approvals_for(user_id).await?;
    let notifications: Vec<Value> = DatabaseNotifier::new(db.clone())
        .for_user(user_id)
        .await?
        .into_iter()
        .filter(|n| n.read_at.is_none())
        .map(|n| {
            json!({
                "id": n.id,
                "event": n.event_type,
                "payload": decode(&n.payload),
                "created_at": n.created_at,
            })
        })
        .collect();

    info(format!(
        "{} pending approval(s), {} unread notification(s) for {}",
        approvals.len(),
        notifications.len(),
        user_id
    ));
    print_json(&json!({
        "approvals": approvals,
        "notifications": notifications,
    }))
}

pub async fn history(db: &DbConnection, instance_id: i64) -> Result<(), WorkflowError> {
    let events: Vec<Value> = DatabaseAuditLogger::new(db.clone())
        .events_for("workflow_instance", &instance_id.to_string())
        .await?
        .into_iter()
        .map(|e| {
            json!({
                "action": e.action,
                "user_id": e.user_id,
                "details": decode(&e.details),
                "created_at": e.created_at,
            })
        })
        .collect();

    info(format!("{} audit event(s) for instance {}", events.len(), instance_id));
    print_json(&events)
}
