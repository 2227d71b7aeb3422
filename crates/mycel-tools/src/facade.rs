// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Signals a tool emits while running.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSignal {
    /// Human-readable progress text for the frontend.
    Status(String),
    /// Structured data part forwarded with the next status update.
    Signal(Value),
}

/// The context handed to a tool.
///
/// The same facade works in-process and inside the sandbox child: only the
/// transport behind `status_tx` differs (agent publisher vs. NDJSON pipe).
/// Status delivery is best-effort by contract — a tool must keep working
/// when no publisher is attached (unit tests, dry runs), so the send
/// methods return `false` instead of failing.
pub struct ToolContextFacade {
    session_id: String,
    user_id: String,
    app_name: String,
    tool_config: HashMap<String, Value>,
    a2a_context: Option<Value>,
    state: Mutex<HashMap<String, Value>>,
    status_tx: Option<mpsc::UnboundedSender<StatusSignal>>,
}

impl ToolContextFacade {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            app_name: app_name.into(),
            tool_config: HashMap::new(),
            a2a_context: None,
            state: Mutex::new(HashMap::new()),
            status_tx: None,
        }
    }

    pub fn with_tool_config(mut self, config: HashMap<String, Value>) -> Self {
        self.tool_config = config;
        self
    }

    pub fn with_a2a_context(mut self, ctx: Value) -> Self {
        self.a2a_context = Some(ctx);
        self
    }

    pub fn with_status_sender(mut self, tx: mpsc::UnboundedSender<StatusSignal>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn a2a_context(&self) -> Option<&Value> {
        self.a2a_context.as_ref()
    }

    /// Send a progress message to the frontend. Returns `false` when no
    /// publisher is reachable — non-fatal by contract.
    pub fn send_status(&self, message: impl Into<String>) -> bool {
        match &self.status_tx {
            Some(tx) => tx.send(StatusSignal::Status(message.into())).is_ok(),
            None => {
                debug!("send_status with no publisher attached");
                false
            }
        }
    }

    /// Send a structured data part. Same delivery contract as `send_status`.
    pub fn send_signal(&self, data: Value) -> bool {
        match &self.status_tx {
            Some(tx) => tx.send(StatusSignal::Signal(data)).is_ok(),
            None => false,
        }
    }

    /// Look up a tool-config value, with a default.
    pub fn get_config(&self, key: &str, default: Value) -> Value {
        self.tool_config.get(key).cloned().unwrap_or(default)
    }

    /// Shared state across invocations within one task.
    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.state.lock().unwrap().get(key).cloned()
    }

    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        self.state.lock().unwrap().insert(key.into(), value);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_accessors() {
        let facade = ToolContextFacade::new("app", "user-1", "sess-1");
        assert_eq!(facade.app_name(), "app");
        assert_eq!(facade.user_id(), "user-1");
        assert_eq!(facade.session_id(), "sess-1");
        assert!(facade.a2a_context().is_none());
    }

    #[test]
    fn send_status_without_publisher_is_false_not_fatal() {
        let facade = ToolContextFacade::new("app", "u", "s");
        assert!(!facade.send_status("working..."));
        assert!(!facade.send_signal(json!({"k": 1})));
    }

    #[tokio::test]
    async fn send_status_reaches_publisher() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let facade = ToolContextFacade::new("app", "u", "s").with_status_sender(tx);
        assert!(facade.send_status("step 1"));
        assert!(facade.send_signal(json!({"progress": 0.5})));
        assert_eq!(rx.recv().await, Some(StatusSignal::Status("step 1".into())));
        assert_eq!(
            rx.recv().await,
            Some(StatusSignal::Signal(json!({"progress": 0.5})))
        );
    }

    #[tokio::test]
    async fn send_status_after_receiver_drop_is_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let facade = ToolContextFacade::new("app", "u", "s").with_status_sender(tx);
        assert!(!facade.send_status("lost"));
    }

    #[test]
    fn config_lookup_with_default() {
        let mut config = HashMap::new();
        config.insert("max_items".to_string(), json!(25));
        let facade = ToolContextFacade::new("app", "u", "s").with_tool_config(config);
        assert_eq!(facade.get_config("max_items", json!(100)), json!(25));
        assert_eq!(facade.get_config("missing", json!(100)), json!(100));
    }

    #[test]
    fn state_round_trips() {
        let facade = ToolContextFacade::new("app", "u", "s");
        assert!(facade.state_get("counter").is_none());
        facade.state_set("counter", json!(3));
        assert_eq!(facade.state_get("counter"), Some(json!(3)));
    }
}
