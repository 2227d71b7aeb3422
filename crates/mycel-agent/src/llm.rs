// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use mycel_tools::ToolSchema;

/// One event in an LLM adapter's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// A streamed text chunk.
    TextDelta(String),
    /// The model requests a tool call.
    FunctionCall {
        call_id: String,
        name: String,
        args: Value,
    },
    /// A tool result echoed back into the stream (adapters that interleave
    /// them; never forwarded as status).
    FunctionResponse {
        call_id: String,
        name: String,
        response: Value,
    },
    /// Raw bytes emitted by the model (logged, not forwarded; artifacts
    /// travel through their own channel).
    InlineData { mime_type: String, bytes: Vec<u8> },
    /// Token accounting for this turn.
    Usage {
        model: String,
        input: u64,
        output: u64,
        cached: u64,
    },
    /// End of the turn.
    Final,
    /// The adapter failed mid-turn.
    Error {
        code: Option<String>,
        message: String,
    },
}

/// One turn's input to the adapter.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation so far, in the adapter's native message JSON. Session
    /// hydration beyond the current task is the adapter's concern.
    pub messages: Vec<Value>,
    pub tools: Vec<ToolSchema>,
}

pub type LlmEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<LlmEvent>> + Send>>;

/// The seam to the model backend. One method: stream a turn's events.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn model_name(&self) -> &str;

    async fn run_turn(&self, request: LlmRequest) -> anyhow::Result<LlmEventStream>;
}

/// Scripted adapter for tests and dry runs: each `run_turn` pops the next
/// pre-baked event list.
pub struct ScriptedAdapter {
    model: String,
    turns: Mutex<VecDeque<Vec<LlmEvent>>>,
    /// Requests seen, for assertions.
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedAdapter {
    pub fn new(turns: Vec<Vec<LlmEvent>>) -> Self {
        Self {
            model: "scripted".to_string(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn run_turn(&self, request: LlmRequest) -> anyhow::Result<LlmEventStream> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![LlmEvent::Final]);
        Ok(Box::pin(tokio_stream::iter(
            events.into_iter().map(Ok).collect::<Vec<_>>(),
        )))
    }
}

/// Development adapter: answers every turn by echoing the last user
/// message. Lets a mesh be wired up and exercised end-to-end before a real
/// model backend is injected.
pub struct EchoAdapter;

#[async_trait]
impl LlmAdapter for EchoAdapter {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn run_turn(&self, request: LlmRequest) -> anyhow::Result<LlmEventStream> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| m["role"] == "user")
            .and_then(|m| m["content"].as_str())
            .unwrap_or("(empty)")
            .to_string();
        Ok(Box::pin(tokio_stream::iter(vec![
            Ok(LlmEvent::TextDelta(format!("echo: {text}"))),
            Ok(LlmEvent::Final),
        ])))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_adapter_replays_turns_in_order() {
        let adapter = ScriptedAdapter::new(vec![
            vec![LlmEvent::TextDelta("first".into()), LlmEvent::Final],
            vec![LlmEvent::Final],
        ]);

        let mut stream = adapter
            .run_turn(LlmRequest {
                messages: vec![],
                tools: vec![],
            })
            .await
            .unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            LlmEvent::TextDelta("first".into())
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Final);
        assert!(stream.next().await.is_none());

        // Second turn is the second script.
        let mut stream = adapter
            .run_turn(LlmRequest {
                messages: vec![],
                tools: vec![],
            })
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Final);

        // Exhausted scripts just end the turn.
        let mut stream = adapter
            .run_turn(LlmRequest {
                messages: vec![],
                tools: vec![],
            })
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Final);

        assert_eq!(adapter.recorded_requests().len(), 3);
    }
}
