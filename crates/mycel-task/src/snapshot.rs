// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{A2AContext, ArtifactRef, ParallelInvocationState, PeerCorrelation};
use crate::usage::TokenUsage;

/// Version of the checkpoint envelope. Bump when a field changes shape so
/// old rows can be migrated online instead of failing deserialisation.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// The full serialisable state of a paused task.
///
/// Exactly what goes into the `paused_task` row (plus the per-entry
/// `peer_sub_task` / `parallel_invocation` rows the store derives from the
/// two maps). Shapes are explicit structs, not opaque bags, so a schema
/// change is a compile error here rather than a runtime surprise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub task_id: String,
    pub a2a_context: A2AContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_invocation_id: Option<String>,
    #[serde(default)]
    pub produced_artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub artifact_signals_to_return: Vec<ArtifactRef>,
    #[serde(default)]
    pub response_buffer: String,
    #[serde(default)]
    pub active_peer_sub_tasks: HashMap<String, PeerCorrelation>,
    #[serde(default)]
    pub parallel_tool_calls: HashMap<String, ParallelInvocationState>,
    #[serde(default)]
    pub flags: HashMap<String, Value>,
    #[serde(default)]
    pub security_context: Value,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

fn default_schema_version() -> u32 {
    CHECKPOINT_SCHEMA_VERSION
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_defaults_when_absent() {
        let json = r#"{"task_id":"t","a2a_context":{"logical_task_id":"t"}}"#;
        let snap: CheckpointSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.schema_version, CHECKPOINT_SCHEMA_VERSION);
        assert!(snap.active_peer_sub_tasks.is_empty());
        assert_eq!(snap.response_buffer, "");
    }

    #[test]
    fn schema_version_is_serialised() {
        let snap = CheckpointSnapshot {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            task_id: "t".into(),
            a2a_context: A2AContext {
                logical_task_id: "t".into(),
                ..Default::default()
            },
            current_invocation_id: None,
            produced_artifacts: vec![],
            artifact_signals_to_return: vec![],
            response_buffer: String::new(),
            active_peer_sub_tasks: HashMap::new(),
            parallel_tool_calls: HashMap::new(),
            flags: HashMap::new(),
            security_context: Value::Null,
            token_usage: TokenUsage::default(),
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["schema_version"], 1);
    }
}
