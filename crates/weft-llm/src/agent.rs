//! Agent handles
//!
//! Tasks carry an opaque agent handle; the only thing the runtime asks of it
//! is a role string to pass to the provider. A handle is either a bare role
//! or a richer profile carrying a name and capability list.

use serde::{Deserialize, Serialize};

/// An agent description: display name, persona role, and the capabilities it
/// advertises to coordination programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Handle a task holds on its agent: either a plain role string or a full
/// profile. The scheduler only ever reads [`AgentHandle::role`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentHandle {
    Role(String),
    Profile(AgentProfile),
}

impl AgentHandle {
    /// The role string forwarded to the LLM provider.
    pub fn role(&self) -> &str {
        match self {
            AgentHandle::Role(role) => role,
            AgentHandle::Profile(profile) => &profile.role,
        }
    }
}

impl From<&str> for AgentHandle {
    fn from(role: &str) -> Self {
        AgentHandle::Role(role.to_string())
    }
}

impl From<String> for AgentHandle {
    fn from(role: String) -> Self {
        AgentHandle::Role(role)
    }
}

impl From<AgentProfile> for AgentHandle {
    fn from(profile: AgentProfile) -> Self {
        AgentHandle::Profile(profile)
    }
}
