//! Participant identity announced over the realtime channel.

use serde::{Deserialize, Serialize};

use crate::envelope::Role;

/// Agent-side metadata carried on a `client_info` announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_name: Option<String>,
}

/// Who this connection speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: String,
    pub role: Role,
    pub agent: Option<AgentMetadata>,
}

impl Identity {
    /// Customer identity without agent metadata.
    pub fn customer(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            role: Role::Customer,
            agent: None,
        }
    }

    /// Agent identity with optional desk metadata.
    pub fn agent(participant_id: impl Into<String>, metadata: AgentMetadata) -> Self {
        Self {
            participant_id: participant_id.into(),
            role: Role::Agent,
            agent: Some(metadata),
        }
    }

    /// Operator identities do not publish activity heartbeats.
    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.role == Role::Agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_identity_suppresses_heartbeat() {
        let identity = Identity::agent(
            "agent-7",
            AgentMetadata {
                agent_id: Some("7".to_string()),
                agent_code: Some("A7".to_string()),
                agent_name: Some("Dana".to_string()),
            },
        );
        assert!(identity.is_agent());
        assert!(!Identity::customer("cust-1").is_agent());
    }
}
