//! Workflow definitions (templates)

use crate::error::WorkflowError;
use crate::workflow::types::{ApprovalType, RejectionAction};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

/// One ordered step of a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_order: i32,
    pub name: String,
    pub approvers: Vec<String>,
    pub approval_type: ApprovalType,
    pub rejection_action: RejectionAction,
    pub escalation_approvers: Vec<String>,
    pub escalation_roles: Vec<String>,
    pub timeout_hours: Option<i32>,
}

/// A stored definition with its steps sorted by `step_order`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowDefinition {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub organization_id: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub steps: Vec<StepDefinition>,
    pub created_at: NaiveDateTime,
}

impl WorkflowDefinition {
    pub fn step(&self, step_order: i32) -> Option<&StepDefinition> {
        usize::try_from(step_order)
            .ok()
            .and_then(|index| self.steps.get(index))
    }

    pub fn last_step_index(&self) -> i32 {
        self.steps.len() as i32 - 1
    }

    /// Check the step sequence of a loaded definition
    pub fn validate_structure(&self) -> Result<(), WorkflowError> {
        validate_steps(self.steps.iter().map(|s| (s.step_order, s.approvers.as_slice())))
    }
}

/// Input for creating a definition
///
/// # Example
///
/// ```rust,ignore
/// let definition = engine.create_definition(NewWorkflowDefinition {
///     name: "Change request".into(),
///     created_by: "admin".into(),
///     steps: vec![NewStepDefinition::new(0, "PMO review", ["pmo-lead"])],
///     ..Default::default()
/// }).await?;
/// ```
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewWorkflowDefinition {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[validate(length(min = 1))]
    pub created_by: String,
    #[validate(length(min = 1), nested)]
    pub steps: Vec<NewStepDefinition>,
}

impl NewWorkflowDefinition {
    /// Field validation plus step sequence rules
    pub fn check(&self) -> Result<(), WorkflowError> {
        self.validate()?;
        validate_steps(self.steps.iter().map(|s| (s.step_order, s.approvers.as_slice())))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewStepDefinition {
    #[validate(range(min = 0))]
    pub step_order: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub approval_type: ApprovalType,
    #[serde(default)]
    pub rejection_action: RejectionAction,
    #[serde(default)]
    pub escalation_approvers: Vec<String>,
    #[serde(default)]
    pub escalation_roles: Vec<String>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub timeout_hours: Option<i32>,
}

impl NewStepDefinition {
    pub fn new<I, S>(step_order: i32, name: impl Into<String>, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            step_order,
            name: name.into(),
            approvers: approvers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn approval_type(mut self, approval_type: ApprovalType) -> Self {
        self.approval_type = approval_type;
        self
    }

    pub fn on_reject(mut self, action: RejectionAction) -> Self {
        self.rejection_action = action;
        self
    }

    pub fn escalate_to<I, S>(mut self, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.escalation_approvers = approvers.into_iter().map(Into::into).collect();
        self
    }

    pub fn escalate_to_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.escalation_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout_hours(mut self, hours: i32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }
}

/// Steps must be numbered 0..n without gaps, each with distinct approvers
fn validate_steps<'a, I>(steps: I) -> Result<(), WorkflowError>
where
    I: Iterator<Item = (i32, &'a [String])>,
{
    let mut orders = Vec::new();

    for (order, approvers) in steps {
        if approvers.is_empty() {
            return Err(WorkflowError::invalid_definition(format!(
                "step {} has no approvers",
                order
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = approvers.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(WorkflowError::invalid_definition(format!(
                "step {} lists approver '{}' twice",
                order, dup
            )));
        }

        orders.push(order);
    }

    if orders.is_empty() {
        return Err(WorkflowError::invalid_definition("workflow has no steps"));
    }

    orders.sort_unstable();
    for (expected, order) in orders.iter().enumerate() {
        if *order != expected as i32 {
            return Err(WorkflowError::invalid_definition(format!(
                "step_order must be a gap-free sequence starting at 0, found {:?}",
                orders
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(steps: Vec<NewStepDefinition>) -> NewWorkflowDefinition {
        NewWorkflowDefinition {
            name: "Change request".into(),
            created_by: "admin".into(),
            steps,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_contiguous_steps_in_any_input_order() {
        let def = definition(vec![
            NewStepDefinition::new(1, "Sponsor", ["sponsor"]),
            NewStepDefinition::new(0, "PMO", ["pmo"]),
        ]);

        assert!(def.check().is_ok());
    }

    #[test]
    fn rejects_empty_definitions() {
        let err = definition(vec![]).check().unwrap_err();
        assert_eq!(err.kind(), "invalid_definition");
    }

    #[test]
    fn rejects_gaps_and_duplicates_in_step_order() {
        let gap = definition(vec![
            NewStepDefinition::new(0, "PMO", ["pmo"]),
            NewStepDefinition::new(2, "Sponsor", ["sponsor"]),
        ]);
        assert!(gap.check().unwrap_err().to_string().contains("gap-free"));

        let dup = definition(vec![
            NewStepDefinition::new(0, "PMO", ["pmo"]),
            NewStepDefinition::new(0, "Sponsor", ["sponsor"]),
        ]);
        assert!(dup.check().is_err());
    }

    #[test]
    fn rejects_steps_without_distinct_approvers() {
        let none = definition(vec![NewStepDefinition::new(0, "PMO", Vec::<String>::new())]);
        assert!(none.check().is_err());

        let twice = definition(vec![NewStepDefinition::new(0, "PMO", ["pmo", "pmo"])]);
        assert!(twice.check().unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn rejects_non_positive_timeouts() {
        let def = definition(vec![NewStepDefinition::new(0, "PMO", ["pmo"]).timeout_hours(0)]);
        assert!(def.check().is_err());
    }
}
