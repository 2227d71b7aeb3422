// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Public description of an agent, broadcast on the discovery topic on every
/// heartbeat. Consumers keep these in a TTL table; an agent that stops
/// broadcasting disappears from discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Endpoint hint for out-of-band protocols (may be empty for pure
    /// broker-attached agents).
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    /// Authentication requirements, opaque to the mesh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_round_trip() {
        let card = AgentCard {
            name: "summarizer".into(),
            version: "0.3.0".into(),
            description: "Summarises documents".into(),
            url: String::new(),
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: false,
            },
            skills: vec![AgentSkill {
                id: "summarize".into(),
                name: "Summarize".into(),
                description: String::new(),
                metadata: HashMap::new(),
            }],
            auth: None,
        };
        let json = serde_json::to_string(&card).unwrap();
        let back: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, card);
    }

    #[test]
    fn minimal_card_parses() {
        let card: AgentCard = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(card.name, "x");
        assert!(!card.capabilities.streaming);
        assert!(card.skills.is_empty());
    }
}
