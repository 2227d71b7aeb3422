// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! LLM events → addressed A2A protocol messages.
//!
//! One translator per task. Text deltas are buffered and coalesced; nothing
//! else from the adapter stream is forwarded verbatim. Topic selection:
//! status updates go to the delegating peer when one is recorded in the
//! task's context, otherwise to the gateway status topic; errors go to the
//! reply topic.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use mycel_a2a::{
    message::Message,
    rpc::{JsonRpcError, JsonRpcResponse},
    task::{TaskArtifact, TaskArtifactUpdateEvent, TaskState, TaskStatusUpdateEvent},
    topics,
};
use mycel_task::{A2AContext, ArtifactRef};

/// A protocol message ready for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub user_properties: HashMap<String, String>,
}

pub struct EventTranslator {
    namespace: String,
    agent_name: String,
    gateway_id: String,
    /// Coalesce buffered deltas until this many bytes. 0 disables batching:
    /// every delta is forwarded as its own status update.
    batching_threshold: usize,
    buffer: String,
}

impl EventTranslator {
    pub fn new(
        namespace: impl Into<String>,
        agent_name: impl Into<String>,
        gateway_id: impl Into<String>,
        batching_threshold: usize,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            agent_name: agent_name.into(),
            gateway_id: gateway_id.into(),
            batching_threshold,
            buffer: String::new(),
        }
    }

    /// Where status updates for this task go.
    pub fn status_topic(&self, ctx: &A2AContext) -> String {
        match &ctx.status_topic {
            Some(peer_topic) => peer_topic.clone(),
            None => topics::gateway_status_topic(
                &self.namespace,
                &self.gateway_id,
                &ctx.logical_task_id,
            ),
        }
    }

    /// Where errors and the final response go.
    pub fn reply_topic(&self, ctx: &A2AContext) -> String {
        match &ctx.reply_to_topic {
            Some(topic) => topic.clone(),
            None => topics::gateway_response_topic(
                &self.namespace,
                &self.gateway_id,
                &ctx.logical_task_id,
            ),
        }
    }

    /// Non-destructive view of the coalescing buffer.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Ingest a text delta. Returns a status update when the buffer crossed
    /// the batching threshold (or immediately when batching is disabled).
    pub fn on_text_delta(&mut self, ctx: &A2AContext, text: &str) -> Option<OutboundMessage> {
        self.buffer.push_str(text);
        if self.batching_threshold == 0 || self.buffer.len() >= self.batching_threshold {
            return self.flush(ctx);
        }
        None
    }

    /// A non-text event interrupts coalescing: whatever is buffered goes
    /// out before it.
    pub fn on_non_text_event(&mut self, ctx: &A2AContext) -> Option<OutboundMessage> {
        self.flush(ctx)
    }

    /// Emit the buffered text as a working status update, if any.
    pub fn flush(&mut self, ctx: &A2AContext) -> Option<OutboundMessage> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        let event = TaskStatusUpdateEvent::working(
            &ctx.logical_task_id,
            ctx.context_id.clone(),
            Message::agent_text(text),
            &self.agent_name,
        );
        Some(self.wrap_status(ctx, &event, self.status_topic(ctx)))
    }

    /// Terminal update. Flushes buffered text first — the flush and the
    /// terminal event come back in publish order.
    pub fn terminal(
        &mut self,
        ctx: &A2AContext,
        state: TaskState,
        message: Option<Message>,
    ) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        if let Some(flushed) = self.flush(ctx) {
            out.push(flushed);
        }
        let event = TaskStatusUpdateEvent::terminal(
            &ctx.logical_task_id,
            ctx.context_id.clone(),
            state,
            message,
            &self.agent_name,
        );
        // The terminal update is the task's response: reply topic.
        out.push(self.wrap_status(ctx, &event, self.reply_topic(ctx)));
        out
    }

    /// Artifact availability notification on the status topic.
    pub fn artifact_update(&self, ctx: &A2AContext, artifact: &ArtifactRef) -> OutboundMessage {
        let event = TaskArtifactUpdateEvent {
            task_id: ctx.logical_task_id.clone(),
            context_id: ctx.context_id.clone(),
            artifact: TaskArtifact {
                name: artifact.filename.clone(),
                version: artifact.version,
                mime_type: artifact.mime_type.clone(),
                size_bytes: artifact.size_bytes,
                metadata: artifact.metadata.clone(),
            },
            metadata: mycel_a2a::task::agent_metadata(&self.agent_name),
        };
        let response = JsonRpcResponse::result(
            ctx.jsonrpc_request_id.clone(),
            serde_json::to_value(&event).unwrap_or(Value::Null),
        );
        self.to_outbound(ctx, self.status_topic(ctx), &response)
    }

    /// Adapter failure → JSON-RPC error on the reply topic, tagged with the
    /// task id so the gateway can route it without parsing prose.
    pub fn error(&mut self, ctx: &A2AContext, message: &str) -> OutboundMessage {
        debug!(task_id = %ctx.logical_task_id, "translating adapter error");
        // Buffered partial text is dropped: the task is failing.
        self.buffer.clear();
        let response = JsonRpcResponse::error(
            ctx.jsonrpc_request_id.clone(),
            JsonRpcError::internal(message, &ctx.logical_task_id),
        );
        self.to_outbound(ctx, self.reply_topic(ctx), &response)
    }

    fn wrap_status(
        &self,
        ctx: &A2AContext,
        event: &TaskStatusUpdateEvent,
        topic: String,
    ) -> OutboundMessage {
        let response = JsonRpcResponse::result(
            ctx.jsonrpc_request_id.clone(),
            serde_json::to_value(event).unwrap_or(Value::Null),
        );
        self.to_outbound(ctx, topic, &response)
    }

    fn to_outbound(
        &self,
        ctx: &A2AContext,
        topic: String,
        response: &JsonRpcResponse,
    ) -> OutboundMessage {
        let mut user_properties = HashMap::new();
        if let Some(profile) = &ctx.user_profile {
            user_properties.insert("a2aUserConfig".to_string(), profile.to_string());
        }
        OutboundMessage {
            topic,
            payload: serde_json::to_vec(response).unwrap_or_default(),
            user_properties,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> A2AContext {
        A2AContext {
            logical_task_id: "t1".into(),
            context_id: Some("ctx-1".into()),
            ..Default::default()
        }
    }

    fn peer_ctx() -> A2AContext {
        A2AContext {
            status_topic: Some("ns/agent/caller/response".into()),
            reply_to_topic: Some("ns/agent/caller/response".into()),
            ..ctx()
        }
    }

    fn parse(payload: &[u8]) -> Value {
        serde_json::from_slice(payload).unwrap()
    }

    fn translator(threshold: usize) -> EventTranslator {
        EventTranslator::new("ns", "agent-a", "gw1", threshold)
    }

    #[test]
    fn disabled_batching_forwards_every_delta() {
        let mut tr = translator(0);
        let out = tr.on_text_delta(&ctx(), "hello").unwrap();
        assert_eq!(out.topic, "ns/gateway/gw1/task/t1/status");
        let v = parse(&out.payload);
        assert_eq!(v["result"]["final"], false);
        assert_eq!(
            v["result"]["status"]["message"]["parts"][0]["text"],
            "hello"
        );
        assert_eq!(v["result"]["metadata"]["agent_name"], "agent-a");
        assert_eq!(tr.buffered(), "");
    }

    #[test]
    fn batching_coalesces_until_threshold() {
        let mut tr = translator(10);
        assert!(tr.on_text_delta(&ctx(), "Hello").is_none());
        assert_eq!(tr.buffered(), "Hello");
        // Crosses 10 bytes: one combined update.
        let out = tr.on_text_delta(&ctx(), " World").unwrap();
        let v = parse(&out.payload);
        assert_eq!(
            v["result"]["status"]["message"]["parts"][0]["text"],
            "Hello World"
        );
        assert_eq!(tr.buffered(), "");
    }

    #[test]
    fn non_text_event_flushes_buffered_text() {
        let mut tr = translator(1000);
        assert!(tr.on_text_delta(&ctx(), "partial").is_none());
        let out = tr.on_non_text_event(&ctx()).unwrap();
        let v = parse(&out.payload);
        assert_eq!(v["result"]["status"]["message"]["parts"][0]["text"], "partial");
        // Nothing buffered, nothing to flush.
        assert!(tr.on_non_text_event(&ctx()).is_none());
    }

    #[test]
    fn terminal_flushes_then_finalises() {
        let mut tr = translator(1000);
        assert!(tr.on_text_delta(&ctx(), "tail text").is_none());
        let out = tr.terminal(&ctx(), TaskState::Completed, Some(Message::agent_text("done")));
        assert_eq!(out.len(), 2);
        let flushed = parse(&out[0].payload);
        assert_eq!(flushed["result"]["final"], false);
        assert_eq!(
            flushed["result"]["status"]["message"]["parts"][0]["text"],
            "tail text"
        );
        let terminal = parse(&out[1].payload);
        assert_eq!(terminal["result"]["final"], true);
        assert_eq!(terminal["result"]["status"]["state"], "completed");
        assert_eq!(out[1].topic, "ns/gateway/gw1/task/t1/response");
    }

    #[test]
    fn peer_status_topic_wins_when_set() {
        let mut tr = translator(0);
        let out = tr.on_text_delta(&peer_ctx(), "to my caller").unwrap();
        assert_eq!(out.topic, "ns/agent/caller/response");
    }

    #[test]
    fn error_goes_to_reply_topic_with_task_id() {
        let mut tr = translator(0);
        let out = tr.error(&ctx(), "adapter exploded");
        assert_eq!(out.topic, "ns/gateway/gw1/task/t1/response");
        let v = parse(&out.payload);
        assert_eq!(v["error"]["code"], -32603);
        assert_eq!(v["error"]["data"]["taskId"], "t1");
        assert!(v.get("result").is_none());
    }

    #[test]
    fn error_drops_buffered_partial_text() {
        let mut tr = translator(1000);
        assert!(tr.on_text_delta(&ctx(), "half an answer").is_none());
        tr.error(&ctx(), "boom");
        assert_eq!(tr.buffered(), "");
    }

    #[test]
    fn artifact_update_is_addressed_to_status_topic() {
        let tr = translator(0);
        let artifact = ArtifactRef {
            app: "app".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            filename: "report.csv".into(),
            version: 2,
            mime_type: Some("text/csv".into()),
            size_bytes: Some(120),
            metadata: Default::default(),
        };
        let out = tr.artifact_update(&ctx(), &artifact);
        assert_eq!(out.topic, "ns/gateway/gw1/task/t1/status");
        let v = parse(&out.payload);
        assert_eq!(v["result"]["artifact"]["name"], "report.csv");
        assert_eq!(v["result"]["artifact"]["version"], 2);
    }

    #[test]
    fn user_profile_rides_user_properties() {
        let mut tr = translator(0);
        let mut c = ctx();
        c.user_profile = Some(json!({"tier": "gold"}));
        let out = tr.on_text_delta(&c, "x").unwrap();
        assert_eq!(out.user_properties["a2aUserConfig"], "{\"tier\":\"gold\"}");
    }
}
