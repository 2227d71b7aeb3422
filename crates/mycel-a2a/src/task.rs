// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::message::Message;

/// Lifecycle state of a task as seen by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
    Unknown,
}

impl TaskState {
    /// Terminal states end a task; no further updates follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// RFC 3339 wall-clock timestamp.
    pub timestamp: String,
}

impl TaskStatus {
    pub fn new(state: TaskState, message: Option<Message>) -> Self {
        Self {
            state,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// An artifact reference attached to a task result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifact {
    pub name: String,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<TaskArtifact>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Intermediate (or terminal, when `final` is set) progress notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    /// True exactly once per task: on the update that ends it.
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl TaskStatusUpdateEvent {
    pub fn working(
        task_id: impl Into<String>,
        context_id: Option<String>,
        message: Message,
        agent_name: &str,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id,
            status: TaskStatus::new(TaskState::Working, Some(message)),
            is_final: false,
            metadata: agent_metadata(agent_name),
        }
    }

    pub fn terminal(
        task_id: impl Into<String>,
        context_id: Option<String>,
        state: TaskState,
        message: Option<Message>,
        agent_name: &str,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id,
            status: TaskStatus::new(state, message),
            is_final: true,
            metadata: agent_metadata(agent_name),
        }
    }
}

/// Artifact availability notification, published alongside status updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifactUpdateEvent {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub artifact: TaskArtifact,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Every update carries the emitting agent's name so consumers can attribute
/// progress in multi-agent task trees.
pub fn agent_metadata(agent_name: &str) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("agent_name".to_string(), Value::String(agent_name.to_string()));
    m
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::Submitted.is_terminal());
    }

    #[test]
    fn state_serialises_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InputRequired).unwrap(),
            "\"input-required\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    #[test]
    fn final_field_uses_protocol_name() {
        let ev = TaskStatusUpdateEvent::terminal(
            "t1",
            None,
            TaskState::Completed,
            None,
            "tester",
        );
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["final"], true);
        assert_eq!(v["metadata"]["agent_name"], "tester");
    }

    #[test]
    fn working_update_is_not_final() {
        let ev = TaskStatusUpdateEvent::working(
            "t1",
            Some("ctx".into()),
            Message::agent_text("progress"),
            "tester",
        );
        assert!(!ev.is_final);
        assert_eq!(ev.status.state, TaskState::Working);
    }
}
