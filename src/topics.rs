/// Topic identifiers and the bearer credential shared by channel and pollers
use serde::{Deserialize, Serialize};
use std::fmt;

/// Roster of agents currently online
pub const CONNECTED_AGENTS: &str = "connected-agents";
/// System operating mode ("hitl", "autopilot", ...)
pub const SYSTEM_MODE: &str = "system-mode";
/// Live conversation activity for the current agent
pub const CONVERSATION_UPDATES: &str = "conversation-updates";

/// Name of a piece of synchronized server state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer token issued by the authentication collaborator
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_serializes_as_plain_string() {
        let topic = Topic::from(SYSTEM_MODE);
        assert_eq!(serde_json::to_string(&topic).unwrap(), "\"system-mode\"");
        assert_eq!(topic.to_string(), "system-mode");
    }

    #[test]
    fn test_credential_is_redacted_in_debug() {
        let credential = Credential::new("secret-token");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
        assert_eq!(credential.bearer(), "Bearer secret-token");
    }
}
