//! Role to user resolution for escalation
//!
//! Escalation steps may name roles instead of (or next to) users. The engine
//! resolves them through an injected [`RoleResolver`].

use crate::error::WorkflowError;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// User ids holding `role`, optionally within one organization
    async fn resolve_role(
        &self,
        role: &str,
        organization_id: Option<&str>,
    ) -> Result<Vec<String>, WorkflowError>;
}

/// Resolves every role to nobody
#[derive(Debug, Clone, Default)]
pub struct NoRoleResolver;

#[async_trait]
impl RoleResolver for NoRoleResolver {
    async fn resolve_role(
        &self,
        _role: &str,
        _organization_id: Option<&str>,
    ) -> Result<Vec<String>, WorkflowError> {
        Ok(Vec::new())
    }
}

/// In-memory role map
///
/// Keys are either `role` (any organization) or `org:role`. Organization
/// entries win over global ones.
///
/// # Example
///
/// ```rust
/// use ppm::StaticRoleResolver;
///
/// let roles = StaticRoleResolver::new()
///     .with_role("cfo", ["dana"])
///     .with_org_role("acme", "cfo", ["erin"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticRoleResolver {
    roles: HashMap<String, Vec<String>>,
}

impl StaticRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role<I, S>(mut self, role: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(role.to_string(), users.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_org_role<I, S>(self, organization_id: &str, role: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_role(&format!("{}:{}", organization_id, role), users)
    }

    /// Load from a JSON object of key to user list
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        let roles: HashMap<String, Vec<String>> = serde_json::from_str(raw)?;
        Ok(Self { roles })
    }
}

#[async_trait]
impl RoleResolver for StaticRoleResolver {
    async fn resolve_role(
        &self,
        role: &str,
        organization_id: Option<&str>,
    ) -> Result<Vec<String>, WorkflowError> {
        let scoped = organization_id
            .and_then(|org| self.roles.get(&format!("{}:{}", org, role)));

        Ok(scoped
            .or_else(|| self.roles.get(role))
            .cloned()
            .unwrap_or_default())
    }
}
