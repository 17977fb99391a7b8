//! Workflow engine configuration

use crate::config::env;

/// Workflow engine configuration
///
/// # Environment Variables
///
/// - `WORKFLOW_DEFAULT_TIMEOUT_HOURS` - Deadline for approvals of steps without `timeout_hours` (default: none)
/// - `WORKFLOW_ESCALATED_SUFFIX` - Appended to the step name of escalation approvals (default: " (Escalated)")
/// - `WORKFLOW_MAX_ADVANCE_RETRIES` - Re-read attempts after a stale revision (default: 3)
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Approval deadline in hours when the step has none
    pub default_timeout_hours: Option<i64>,
    /// Step name suffix for escalation approvals
    pub escalated_suffix: String,
    /// How often a write retries after losing the revision check
    pub max_advance_retries: u32,
}

impl WorkflowConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        let default_timeout_hours = env("WORKFLOW_DEFAULT_TIMEOUT_HOURS", 0i64);

        Self {
            default_timeout_hours: (default_timeout_hours > 0).then_some(default_timeout_hours),
            escalated_suffix: env("WORKFLOW_ESCALATED_SUFFIX", " (Escalated)".to_string()),
            max_advance_retries: env("WORKFLOW_MAX_ADVANCE_RETRIES", 3u32),
        }
    }

    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder::default()
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_timeout_hours: None,
            escalated_suffix: " (Escalated)".to_string(),
            max_advance_retries: 3,
        }
    }
}

/// Builder for WorkflowConfig
#[derive(Default)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn default_timeout_hours(mut self, hours: i64) -> Self {
        self.config.default_timeout_hours = Some(hours);
        self
    }

    pub fn escalated_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.escalated_suffix = suffix.into();
        self
    }

    pub fn max_advance_retries(mut self, retries: u32) -> Self {
        self.config.max_advance_retries = retries;
        self
    }

    pub fn build(self) -> WorkflowConfig {
        self.config
    }
}
