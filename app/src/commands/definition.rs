use console::style;
use ppm::{NewWorkflowDefinition, WorkflowEngine, WorkflowError};
use std::path::Path;

use super::{info, print_json};

pub async fn create(engine: &WorkflowEngine, path: &Path) -> Result<(), WorkflowError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        WorkflowError::invalid_definition(format!("cannot read {}: {}", path.display(), e))
    })?;
    let new: NewWorkflowDefinition = serde_json::from_str(&raw)
        .map_err(|e| WorkflowError::invalid_definition(e.to_string()))?;

    let definition = engine.create_definition(new).await?;
    info(format!(
        "Created workflow {} ({} steps)",
        style(&definition.name).green(),
        definition.steps.len()
    ));
    print_json(&definition)
}

pub async fn list(engine: &WorkflowEngine, org: Option<&str>) -> Result<(), WorkflowError> {
    let definitions = engine.list_definitions(org).await?;
    if definitions.is_empty() {
        info(style("No workflow definitions").dim());
    }
    print_json(&definitions)
}
