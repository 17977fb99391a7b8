//! Structured instance context
//!
//! Origin of the instance plus the restart and escalation history. Stored as
//! JSON text in `workflow_instances.context`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One RESTART rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartEvent {
    pub rejected_at_step: i32,
    pub rejected_by: String,
    pub comments: Option<String>,
    /// 1 for the first restart, +1 for each one after
    pub restart_count: u32,
    pub restarted_at: NaiveDateTime,
}

/// One ESCALATE rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub escalated_from_step: i32,
    pub rejected_by: String,
    pub comments: Option<String>,
    /// 1 for the first escalation, +1 for each one after
    pub escalation_count: u32,
    pub escalated_to: Vec<String>,
    /// Round the escalation approvals were created in
    pub round: i32,
    pub escalated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub initiator: String,
    #[serde(default)]
    pub is_escalated: bool,
    #[serde(default)]
    pub restart_history: Vec<RestartEvent>,
    #[serde(default)]
    pub escalation_history: Vec<EscalationEvent>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowContext {
    pub fn new(initiator: impl Into<String>, organization_id: Option<String>) -> Self {
        Self {
            initiator: initiator.into(),
            organization_id,
            ..Default::default()
        }
    }

    /// Parse the stored JSON text
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_history
            .last()
            .map(|e| e.restart_count)
            .unwrap_or(0)
    }

    pub fn escalation_count(&self) -> u32 {
        self.escalation_history
            .last()
            .map(|e| e.escalation_count)
            .unwrap_or(0)
    }

    /// Append a restart entry, numbering it after the previous one
    pub fn record_restart(
        &mut self,
        rejected_at_step: i32,
        rejected_by: &str,
        comments: Option<String>,
        at: NaiveDateTime,
    ) -> &RestartEvent {
        let restart_count = self.restart_count() + 1;
        self.restart_history.push(RestartEvent {
            rejected_at_step,
            rejected_by: rejected_by.to_string(),
            comments,
            restart_count,
            restarted_at: at,
        });
        // a restart returns the instance to its normal approvers
        self.is_escalated = false;
        &self.restart_history[self.restart_history.len() - 1]
    }

    /// Append an escalation entry and flag the instance as escalated
    pub fn record_escalation(
        &mut self,
        escalated_from_step: i32,
        rejected_by: &str,
        comments: Option<String>,
        escalated_to: Vec<String>,
        round: i32,
        at: NaiveDateTime,
    ) -> &EscalationEvent {
        let escalation_count = self.escalation_count() + 1;
        self.escalation_history.push(EscalationEvent {
            escalated_from_step,
            rejected_by: rejected_by.to_string(),
            comments,
            escalation_count,
            escalated_to,
            round,
            escalated_at: at,
        });
        self.is_escalated = true;
        &self.escalation_history[self.escalation_history.len() - 1]
    }

    /// True when `step` was escalated and its escalation approvals are still current
    pub fn escalated_in_round(&self, step: i32, round: i32) -> bool {
        self.escalation_history
            .iter()
            .any(|e| e.escalated_from_step == step && e.round == round)
    }
}
