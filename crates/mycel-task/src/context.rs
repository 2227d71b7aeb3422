// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use mycel_a2a::rpc::RpcId;

use crate::snapshot::CheckpointSnapshot;
use crate::usage::TokenUsage;

/// Immutable per-task routing context, captured when the task request
/// arrives and carried verbatim through checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct A2AContext {
    pub logical_task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Reply topic of whoever submitted the task (gateway or delegating peer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_topic: Option<String>,
    /// Set when the task was delegated to us by another agent: progress goes
    /// to this peer topic instead of a gateway topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc_request_id: Option<RpcId>,
    /// Present when this task is itself a peer sub-task of a parent task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_sub_task_id: Option<String>,
    #[serde(default)]
    pub is_streaming: bool,
    /// Opaque user-profile blob, round-tripped verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<Value>,
}

/// Correlation state for one outstanding peer delegation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerCorrelation {
    pub invocation_id: String,
    pub peer_agent_name: String,
    /// The LLM tool-call id this delegation answers.
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Set when the delegation is part of a fan-out group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group_id: Option<String>,
}

/// Fan-out bookkeeping for one invocation's parallel peer calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParallelInvocationState {
    pub total_expected: u32,
    pub completed_count: u32,
    /// Results in reply-arrival order.
    #[serde(default)]
    pub results: Vec<Value>,
}

/// A produced artifact, referenced by scope and version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub app: String,
    pub user_id: String,
    pub session_id: String,
    pub filename: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

const CANCEL_FLAG: &str = "cancel_requested";

/// All mutable state of one in-flight task.
///
/// Owned by exactly one replica at a time; never shared between tasks. The
/// struct mirrors the checkpoint row set one-to-one so that
/// `to_checkpoint`/`from_checkpoint` are total.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    task_id: String,
    a2a_context: A2AContext,
    invocation_counter: u64,
    current_invocation_id: Option<String>,
    produced_artifacts: Vec<ArtifactRef>,
    artifact_signals_to_return: Vec<ArtifactRef>,
    response_buffer: String,
    active_peer_sub_tasks: HashMap<String, PeerCorrelation>,
    parallel_tool_calls: HashMap<String, ParallelInvocationState>,
    flags: HashMap<String, Value>,
    security_context: Value,
    token_usage: TokenUsage,
    track_token_usage: bool,
}

impl TaskExecutionContext {
    pub fn new(task_id: impl Into<String>, a2a_context: A2AContext) -> Self {
        Self {
            task_id: task_id.into(),
            a2a_context,
            invocation_counter: 0,
            current_invocation_id: None,
            produced_artifacts: Vec::new(),
            artifact_signals_to_return: Vec::new(),
            response_buffer: String::new(),
            active_peer_sub_tasks: HashMap::new(),
            parallel_tool_calls: HashMap::new(),
            flags: HashMap::new(),
            security_context: Value::Null,
            token_usage: TokenUsage::default(),
            track_token_usage: false,
        }
    }

    pub fn with_token_tracking(mut self, enabled: bool) -> Self {
        self.track_token_usage = enabled;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn a2a_context(&self) -> &A2AContext {
        &self.a2a_context
    }

    // ── Invocations ──────────────────────────────────────────────────────────

    /// Start a new LLM turn; invocation ids are monotonic within the task.
    pub fn begin_invocation(&mut self) -> String {
        self.invocation_counter += 1;
        let id = format!("inv-{}", self.invocation_counter);
        self.current_invocation_id = Some(id.clone());
        id
    }

    pub fn current_invocation_id(&self) -> Option<&str> {
        self.current_invocation_id.as_deref()
    }

    // ── Peer sub-tasks ───────────────────────────────────────────────────────

    pub fn add_peer_sub_task(&mut self, sub_task_id: impl Into<String>, corr: PeerCorrelation) {
        let sub_task_id = sub_task_id.into();
        if self
            .active_peer_sub_tasks
            .insert(sub_task_id.clone(), corr)
            .is_some()
        {
            warn!(sub_task_id, "replaced existing peer sub-task correlation");
        }
    }

    /// In-memory pop-if-present; the running-task counterpart of the store's
    /// atomic claim.
    pub fn pop_peer_sub_task(&mut self, sub_task_id: &str) -> Option<PeerCorrelation> {
        self.active_peer_sub_tasks.remove(sub_task_id)
    }

    pub fn active_peer_sub_tasks(&self) -> &HashMap<String, PeerCorrelation> {
        &self.active_peer_sub_tasks
    }

    pub fn has_pending_peers(&self) -> bool {
        !self.active_peer_sub_tasks.is_empty()
    }

    // ── Parallel fan-out ─────────────────────────────────────────────────────

    pub fn begin_parallel_group(&mut self, invocation_id: impl Into<String>, total_expected: u32) {
        self.parallel_tool_calls.insert(
            invocation_id.into(),
            ParallelInvocationState {
                total_expected,
                completed_count: 0,
                results: Vec::new(),
            },
        );
    }

    /// Record one result; returns `(completed, total)` after the update.
    /// The in-memory mirror of the store's row-locked increment.
    pub fn record_parallel_result(
        &mut self,
        invocation_id: &str,
        result: Value,
    ) -> Option<(u32, u32)> {
        let state = self.parallel_tool_calls.get_mut(invocation_id)?;
        state.results.push(result);
        state.completed_count += 1;
        Some((state.completed_count, state.total_expected))
    }

    pub fn parallel_tool_calls(&self) -> &HashMap<String, ParallelInvocationState> {
        &self.parallel_tool_calls
    }

    pub fn take_parallel_group(&mut self, invocation_id: &str) -> Option<ParallelInvocationState> {
        self.parallel_tool_calls.remove(invocation_id)
    }

    // ── Response buffer ──────────────────────────────────────────────────────

    pub fn append_response(&mut self, text: &str) {
        self.response_buffer.push_str(text);
    }

    /// Non-destructive read of the buffered text.
    pub fn response_buffer(&self) -> &str {
        &self.response_buffer
    }

    /// Take the buffered text, leaving the buffer empty.
    pub fn flush_response(&mut self) -> String {
        std::mem::take(&mut self.response_buffer)
    }

    // ── Artifacts ────────────────────────────────────────────────────────────

    pub fn add_produced_artifact(&mut self, artifact: ArtifactRef) {
        self.artifact_signals_to_return.push(artifact.clone());
        self.produced_artifacts.push(artifact);
    }

    pub fn produced_artifacts(&self) -> &[ArtifactRef] {
        &self.produced_artifacts
    }

    /// Artifacts to forward with the next status update.
    pub fn drain_artifact_signals(&mut self) -> Vec<ArtifactRef> {
        std::mem::take(&mut self.artifact_signals_to_return)
    }

    // ── Flags / security / usage ─────────────────────────────────────────────

    pub fn set_flag(&mut self, key: impl Into<String>, value: Value) {
        self.flags.insert(key.into(), value);
    }

    pub fn flag(&self, key: &str) -> Option<&Value> {
        self.flags.get(key)
    }

    pub fn request_cancel(&mut self) {
        self.flags.insert(CANCEL_FLAG.to_string(), Value::Bool(true));
    }

    pub fn cancel_requested(&self) -> bool {
        matches!(self.flags.get(CANCEL_FLAG), Some(Value::Bool(true)))
    }

    pub fn set_security_context(&mut self, ctx: Value) {
        self.security_context = ctx;
    }

    pub fn security_context(&self) -> &Value {
        &self.security_context
    }

    /// Accumulate token usage. A no-op unless tracking was enabled at
    /// construction — no zero-value records are ever emitted.
    pub fn record_token_usage(
        &mut self,
        model: &str,
        source: &str,
        input: u64,
        output: u64,
        cached: u64,
    ) {
        if !self.track_token_usage {
            return;
        }
        self.token_usage.record(model, source, input, output, cached);
    }

    pub fn token_usage(&self) -> &TokenUsage {
        &self.token_usage
    }

    // ── Checkpoint codec ─────────────────────────────────────────────────────

    pub fn to_checkpoint(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            schema_version: crate::snapshot::CHECKPOINT_SCHEMA_VERSION,
            task_id: self.task_id.clone(),
            a2a_context: self.a2a_context.clone(),
            current_invocation_id: self.current_invocation_id.clone(),
            produced_artifacts: self.produced_artifacts.clone(),
            artifact_signals_to_return: self.artifact_signals_to_return.clone(),
            response_buffer: self.response_buffer.clone(),
            active_peer_sub_tasks: self.active_peer_sub_tasks.clone(),
            parallel_tool_calls: self.parallel_tool_calls.clone(),
            flags: self.flags.clone(),
            security_context: self.security_context.clone(),
            token_usage: self.token_usage.clone(),
        }
    }

    pub fn from_checkpoint(snapshot: CheckpointSnapshot, track_token_usage: bool) -> Self {
        // Resume the invocation counter from the persisted id so new turns
        // stay monotonic across replicas.
        let invocation_counter = snapshot
            .current_invocation_id
            .as_deref()
            .and_then(|id| id.strip_prefix("inv-"))
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        Self {
            task_id: snapshot.task_id,
            a2a_context: snapshot.a2a_context,
            invocation_counter,
            current_invocation_id: snapshot.current_invocation_id,
            produced_artifacts: snapshot.produced_artifacts,
            artifact_signals_to_return: snapshot.artifact_signals_to_return,
            response_buffer: snapshot.response_buffer,
            active_peer_sub_tasks: snapshot.active_peer_sub_tasks,
            parallel_tool_calls: snapshot.parallel_tool_calls,
            flags: snapshot.flags,
            security_context: snapshot.security_context,
            token_usage: snapshot.token_usage,
            track_token_usage,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TaskExecutionContext {
        TaskExecutionContext::new(
            "task-1",
            A2AContext {
                logical_task_id: "task-1".into(),
                user_id: Some("u1".into()),
                effective_session_id: Some("s1".into()),
                ..Default::default()
            },
        )
    }

    fn corr(invocation: &str) -> PeerCorrelation {
        PeerCorrelation {
            invocation_id: invocation.into(),
            peer_agent_name: "peer-b".into(),
            tool_call_id: "call-1".into(),
            timeout_seconds: Some(30),
            parallel_group_id: None,
        }
    }

    #[test]
    fn invocation_ids_are_monotonic() {
        let mut c = ctx();
        assert_eq!(c.begin_invocation(), "inv-1");
        assert_eq!(c.begin_invocation(), "inv-2");
        assert_eq!(c.current_invocation_id(), Some("inv-2"));
    }

    #[test]
    fn pop_peer_sub_task_is_pop_if_present() {
        let mut c = ctx();
        c.add_peer_sub_task("sub-1", corr("inv-1"));
        assert!(c.has_pending_peers());
        assert!(c.pop_peer_sub_task("sub-1").is_some());
        assert!(c.pop_peer_sub_task("sub-1").is_none());
        assert!(!c.has_pending_peers());
    }

    #[test]
    fn parallel_results_count_up_to_total() {
        let mut c = ctx();
        c.begin_parallel_group("inv-1", 3);
        assert_eq!(c.record_parallel_result("inv-1", json!("r1")), Some((1, 3)));
        assert_eq!(c.record_parallel_result("inv-1", json!("r2")), Some((2, 3)));
        assert_eq!(c.record_parallel_result("inv-1", json!("r3")), Some((3, 3)));
        let group = c.take_parallel_group("inv-1").unwrap();
        assert_eq!(group.results, vec![json!("r1"), json!("r2"), json!("r3")]);
    }

    #[test]
    fn unknown_parallel_group_returns_none() {
        let mut c = ctx();
        assert_eq!(c.record_parallel_result("nope", json!(1)), None);
    }

    #[test]
    fn response_buffer_discipline() {
        let mut c = ctx();
        c.append_response("Hello");
        c.append_response(" World");
        assert_eq!(c.response_buffer(), "Hello World");
        // Peek does not clear.
        assert_eq!(c.response_buffer(), "Hello World");
        assert_eq!(c.flush_response(), "Hello World");
        assert_eq!(c.response_buffer(), "");
    }

    #[test]
    fn token_usage_is_noop_when_tracking_off() {
        let mut c = ctx();
        c.record_token_usage("m", "agent", 10, 5, 0);
        assert!(c.token_usage().is_empty());

        let mut tracked = ctx().with_token_tracking(true);
        tracked.record_token_usage("m", "agent", 10, 5, 0);
        assert_eq!(tracked.token_usage().totals.input, 10);
    }

    #[test]
    fn cancel_flag() {
        let mut c = ctx();
        assert!(!c.cancel_requested());
        c.request_cancel();
        assert!(c.cancel_requested());
    }

    #[test]
    fn produced_artifacts_also_queue_signals() {
        let mut c = ctx();
        c.add_produced_artifact(ArtifactRef {
            app: "app".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            filename: "out.csv".into(),
            version: 0,
            mime_type: Some("text/csv".into()),
            size_bytes: Some(12),
            metadata: HashMap::new(),
        });
        assert_eq!(c.produced_artifacts().len(), 1);
        let signals = c.drain_artifact_signals();
        assert_eq!(signals.len(), 1);
        assert!(c.drain_artifact_signals().is_empty());
        // Produced list is permanent.
        assert_eq!(c.produced_artifacts().len(), 1);
    }

    #[test]
    fn checkpoint_round_trip_is_identity() {
        let mut c = ctx().with_token_tracking(true);
        c.begin_invocation();
        c.add_peer_sub_task("sub-1", corr("inv-1"));
        c.add_peer_sub_task(
            "sub-2",
            PeerCorrelation {
                parallel_group_id: Some("inv-1".into()),
                ..corr("inv-1")
            },
        );
        c.begin_parallel_group("inv-1", 2);
        c.record_parallel_result("inv-1", json!({"ok": true}));
        c.append_response("partial answer");
        c.set_flag("custom", json!(42));
        c.request_cancel();
        c.set_security_context(json!({"scopes": ["read"]}));
        c.record_token_usage("m1", "agent", 100, 10, 0);
        c.add_produced_artifact(ArtifactRef {
            app: "app".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            filename: "f".into(),
            version: 3,
            mime_type: None,
            size_bytes: None,
            metadata: HashMap::new(),
        });

        let snapshot = c.to_checkpoint();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: CheckpointSnapshot = serde_json::from_str(&json).unwrap();
        let restored = TaskExecutionContext::from_checkpoint(parsed, true);

        assert_eq!(restored.task_id(), c.task_id());
        assert_eq!(restored.a2a_context(), c.a2a_context());
        assert_eq!(restored.current_invocation_id(), c.current_invocation_id());
        assert_eq!(restored.active_peer_sub_tasks(), c.active_peer_sub_tasks());
        assert_eq!(restored.parallel_tool_calls(), c.parallel_tool_calls());
        assert_eq!(restored.response_buffer(), c.response_buffer());
        assert_eq!(restored.produced_artifacts(), c.produced_artifacts());
        assert_eq!(restored.token_usage(), c.token_usage());
        assert_eq!(restored.security_context(), c.security_context());
        assert!(restored.cancel_requested());
        // A second round-trip produces the identical snapshot.
        assert_eq!(restored.to_checkpoint(), snapshot);
    }

    #[test]
    fn restored_invocation_counter_stays_monotonic() {
        let mut c = ctx();
        c.begin_invocation();
        c.begin_invocation();
        let restored =
            TaskExecutionContext::from_checkpoint(c.to_checkpoint(), false);
        let mut restored = restored;
        assert_eq!(restored.begin_invocation(), "inv-3");
    }
}
