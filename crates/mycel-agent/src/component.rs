// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use mycel_a2a::{
    broker::{BrokerClient, BrokerMessage},
    message::{text_from_parts, Message, Part},
    rpc::{
        JsonRpcRequest, JsonRpcResponse, METHOD_MESSAGE_SEND, METHOD_MESSAGE_STREAM,
        METHOD_TASKS_CANCEL,
    },
    task::{TaskState, TaskStatusUpdateEvent},
    topics, AgentCard, ProtocolError,
};
use mycel_blob::{
    ArtifactStore, ScopedArtifactService, AGENT_DEFAULTS_SESSION_ID, AGENT_DEFAULTS_USER_ID,
};
use mycel_config::Config;
use mycel_peer::{PeerCall, PeerCoordinator, ResumeAction, ResumedDelegation, TimeoutSweeper};
use mycel_sandbox::{cleanup_stale_work_dirs, SandboxRequest, SandboxRunner};
use mycel_store::CheckpointStore;
use mycel_task::{A2AContext, ArtifactRef, TaskExecutionContext};
use mycel_tools::{
    DataDisposition, StatusSignal, ToolContextFacade, ToolLocation, ToolRegistry, ToolResult,
    ToolRuntime,
};

use crate::llm::{LlmAdapter, LlmEvent, LlmRequest};
use crate::registry::AgentRegistry;
use crate::timers::PeriodicTask;
use crate::translator::{EventTranslator, OutboundMessage};

/// Default deadline for a peer delegation when the model does not specify
/// one.
const DEFAULT_PEER_TIMEOUT_SECS: u64 = 120;

/// Agents discovered on the mesh drop out after missing heartbeats for
/// three intervals.
const DISCOVERY_TTL_FACTOR: u32 = 3;

/// Tool names with this prefix delegate to the named peer agent instead of
/// running locally.
const PEER_TOOL_PREFIX: &str = "peer_";

/// The agent component: owns broker subscriptions, the LLM ↔ tool loop,
/// peer coordination and the periodic timers. One instance per agent
/// process; all state for in-flight tasks lives in their
/// [`TaskExecutionContext`]s.
pub struct AgentComponent {
    config: Arc<Config>,
    broker: Arc<dyn BrokerClient>,
    store: Arc<CheckpointStore>,
    coordinator: Arc<PeerCoordinator>,
    llm: Arc<dyn LlmAdapter>,
    tools: Arc<ToolRegistry>,
    runtime: Arc<ToolRuntime>,
    sandbox: Arc<SandboxRunner>,
    artifacts: ArtifactStore,
    agents: Arc<AgentRegistry>,
    /// Cancel signals for tasks currently running in this process.
    running: Mutex<HashMap<String, watch::Sender<bool>>>,
}

/// Handle to a started agent; shutting it down cancels every timer, stops
/// the sweeper and ends the broker loop.
pub struct AgentHandle {
    stop: watch::Sender<bool>,
    main: tokio::task::JoinHandle<()>,
    timers: Vec<PeriodicTask>,
    sweeper: TimeoutSweeper,
}

impl AgentHandle {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for timer in self.timers {
            timer.shutdown().await;
        }
        self.sweeper.shutdown().await;
        let _ = self.main.await;
    }
}

impl AgentComponent {
    pub fn new(
        config: Arc<Config>,
        broker: Arc<dyn BrokerClient>,
        store: Arc<CheckpointStore>,
        llm: Arc<dyn LlmAdapter>,
        tools: Arc<ToolRegistry>,
        artifacts: ArtifactStore,
    ) -> Arc<Self> {
        let coordinator = Arc::new(PeerCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            config.namespace.clone(),
            config.agent.name.clone(),
        ));
        let runtime = Arc::new(ToolRuntime::new(Arc::clone(&tools)));
        let sandbox = Arc::new(SandboxRunner::new(config.sandbox.clone()));
        let ttl = Duration::from_secs(config.agent.discovery_interval_secs)
            * DISCOVERY_TTL_FACTOR;
        Arc::new(Self {
            config,
            broker,
            store,
            coordinator,
            llm,
            tools,
            runtime,
            sandbox,
            artifacts,
            agents: Arc::new(AgentRegistry::new(ttl)),
            running: Mutex::new(HashMap::new()),
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.config.agent.name
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    fn gateway_id(&self) -> String {
        self.config
            .gateway_id
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    fn card(&self) -> AgentCard {
        AgentCard {
            name: self.config.agent.name.clone(),
            version: self.config.agent.version.clone(),
            description: self.config.agent.description.clone(),
            url: String::new(),
            capabilities: mycel_a2a::card::AgentCapabilities {
                streaming: true,
                push_notifications: false,
            },
            skills: self
                .tools
                .schemas()
                .into_iter()
                .map(|schema| mycel_a2a::card::AgentSkill {
                    id: schema.name.clone(),
                    name: schema.name,
                    description: schema.description,
                    metadata: HashMap::new(),
                })
                .collect(),
            auth: None,
        }
    }

    /// Subscribe, upload default artifacts, start the timers, and spawn the
    /// broker loop. Returns the handle used for shutdown.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<AgentHandle> {
        self.upload_default_artifacts().await?;

        let namespace = &self.config.namespace;
        let agent_name = &self.config.agent.name;
        let mut request_rx = self
            .broker
            .subscribe(&topics::agent_request_topic(namespace, agent_name))
            .await
            .map_err(|e| anyhow::anyhow!("subscribing requests: {e}"))?;
        let mut response_rx = self
            .broker
            .subscribe(&topics::agent_response_topic(namespace, agent_name))
            .await
            .map_err(|e| anyhow::anyhow!("subscribing responses: {e}"))?;
        let mut discovery_rx = self
            .broker
            .subscribe(&topics::discovery_topic(namespace))
            .await
            .map_err(|e| anyhow::anyhow!("subscribing discovery: {e}"))?;

        let (resume_tx, mut resume_rx) = mpsc::unbounded_channel::<ResumedDelegation>();
        let sweeper = TimeoutSweeper::spawn(
            Arc::clone(&self.coordinator),
            Duration::from_secs(self.config.agent.sweep_interval_secs),
            resume_tx,
        );

        // ── Periodic timers ──────────────────────────────────────────────────
        let mut timers = Vec::new();
        {
            let component = Arc::clone(self);
            timers.push(PeriodicTask::spawn(
                "discovery-heartbeat",
                Duration::from_secs(self.config.agent.discovery_interval_secs),
                move || {
                    let component = Arc::clone(&component);
                    async move { component.publish_card().await }
                },
            ));
        }
        {
            let registry = Arc::clone(&self.agents);
            timers.push(PeriodicTask::spawn(
                "registry-eviction",
                Duration::from_secs(self.config.agent.discovery_interval_secs),
                move || {
                    let registry = Arc::clone(&registry);
                    async move {
                        registry.evict_expired();
                    }
                },
            ));
        }
        {
            let work_base = self.config.sandbox.work_base_dir.clone();
            timers.push(PeriodicTask::spawn(
                "stale-workdir-sweep",
                Duration::from_secs(600),
                move || {
                    let work_base = work_base.clone();
                    async move {
                        let removed = tokio::task::spawn_blocking(move || {
                            cleanup_stale_work_dirs(
                                std::path::Path::new(&work_base),
                                Duration::from_secs(3600),
                            )
                        })
                        .await
                        .unwrap_or(0);
                        if removed > 0 {
                            info!(removed, "removed stale sandbox work dirs");
                        }
                    }
                },
            ));
        }

        // Announce ourselves immediately rather than waiting a full interval.
        self.publish_card().await;

        // ── Main loop ────────────────────────────────────────────────────────
        let (stop, mut stopped) = watch::channel(false);
        let component = Arc::clone(self);
        let main = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = request_rx.recv() => component.handle_request(msg).await,
                    Some(msg) = response_rx.recv() => component.handle_response(msg).await,
                    Some(msg) = discovery_rx.recv() => component.handle_discovery(msg),
                    Some(resumed) = resume_rx.recv() => component.spawn_resume(resumed),
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            info!(agent = %component.agent_name(), "agent loop stopping");
                            return;
                        }
                    }
                }
            }
        });

        info!(agent = %self.agent_name(), "agent started");
        Ok(AgentHandle {
            stop,
            main,
            timers,
            sweeper,
        })
    }

    async fn publish_card(&self) {
        let topic = topics::discovery_topic(&self.config.namespace);
        match serde_json::to_vec(&self.card()) {
            Ok(payload) => {
                if let Err(e) = self.broker.publish(BrokerMessage::new(topic, payload)).await {
                    warn!(error = %e, "card broadcast failed");
                }
            }
            Err(e) => error!(error = %e, "card encode failed"),
        }
    }

    /// Upload the configured default artifacts once under the reserved
    /// defaults scope. Existing defaults are not re-uploaded.
    async fn upload_default_artifacts(&self) -> anyhow::Result<()> {
        for entry in &self.config.agent.default_artifacts {
            let filename = entry
                .filename
                .clone()
                .or_else(|| {
                    std::path::Path::new(&entry.path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                })
                .context("default artifact without a usable filename")?;

            let existing = self
                .artifacts
                .list_versions(
                    self.agent_name(),
                    AGENT_DEFAULTS_USER_ID,
                    AGENT_DEFAULTS_SESSION_ID,
                    &filename,
                )
                .await
                .map_err(|e| anyhow::anyhow!("listing default artifact versions: {e}"))?;
            if !existing.is_empty() {
                debug!(filename, "default artifact already present");
                continue;
            }

            let bytes = tokio::fs::read(&entry.path)
                .await
                .with_context(|| format!("reading default artifact {}", entry.path))?;
            let mime = entry.mime_type.clone().unwrap_or_else(|| {
                mime_guess::from_path(&entry.path)
                    .first_raw()
                    .unwrap_or("application/octet-stream")
                    .to_string()
            });
            let mut metadata = HashMap::new();
            if let Some(description) = &entry.description {
                metadata.insert("description".to_string(), json!(description));
            }
            self.artifacts
                .save(
                    self.agent_name(),
                    AGENT_DEFAULTS_USER_ID,
                    AGENT_DEFAULTS_SESSION_ID,
                    &filename,
                    bytes,
                    &mime,
                    metadata,
                )
                .await
                .map_err(|e| anyhow::anyhow!("uploading default artifact {filename}: {e}"))?;
            info!(filename, "default artifact uploaded");
        }
        Ok(())
    }

    // ── Inbound request handling ─────────────────────────────────────────────

    async fn handle_request(self: &Arc<Self>, msg: BrokerMessage) {
        let request = match JsonRpcRequest::parse(&msg.payload) {
            Ok(request) => request,
            Err(ProtocolError::Malformed(reason)) => {
                // Malformed traffic is dropped, never escalated: a hostile
                // sender must not be able to take the agent down.
                warn!(topic = %msg.topic, reason, "dropping malformed request");
                return;
            }
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "dropping request");
                return;
            }
        };

        match request.method.as_str() {
            METHOD_MESSAGE_SEND | METHOD_MESSAGE_STREAM => {
                self.handle_task_request(request).await;
            }
            METHOD_TASKS_CANCEL => self.handle_cancel(request).await,
            other => {
                warn!(method = other, "dropping request with unsupported method");
            }
        }
    }

    async fn handle_task_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let params = request.params.unwrap_or(Value::Null);
        let Ok(message) = serde_json::from_value::<Message>(params["message"].clone()) else {
            warn!("dropping task request without a parseable message");
            return;
        };
        let metadata = &params["metadata"];

        let task_id = message
            .task_id
            .clone()
            .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4().simple()));
        let ctx = A2AContext {
            logical_task_id: task_id.clone(),
            context_id: message.context_id.clone(),
            effective_session_id: metadata["sessionId"]
                .as_str()
                .map(str::to_string)
                .or_else(|| message.context_id.clone()),
            user_id: metadata["userId"].as_str().map(str::to_string),
            reply_to_topic: metadata["replyToTopic"].as_str().map(str::to_string),
            status_topic: metadata["statusTopic"].as_str().map(str::to_string),
            jsonrpc_request_id: request.id.clone(),
            parent_sub_task_id: metadata["parentTaskId"].as_str().map(str::to_string),
            is_streaming: request.method == METHOD_MESSAGE_STREAM,
            user_profile: metadata.get("userProfile").filter(|v| !v.is_null()).cloned(),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running
            .lock()
            .unwrap()
            .insert(task_id.clone(), cancel_tx);

        info!(task_id, streaming = ctx.is_streaming, "task accepted");
        let component = Arc::clone(self);
        tokio::spawn(async move {
            component.run_task(ctx, message, cancel_rx).await;
        });
    }

    async fn handle_cancel(self: &Arc<Self>, request: JsonRpcRequest) {
        let Some(task_id) = request
            .params
            .as_ref()
            .and_then(|p| p["id"].as_str())
            .map(str::to_string)
        else {
            warn!("dropping cancel without a task id");
            return;
        };
        info!(task_id, "cancel requested");

        // Running here: flag the loop. Paused anywhere: fan the cancel out to
        // recorded peers and purge the checkpoint.
        let signalled = {
            let running = self.running.lock().unwrap();
            running
                .get(&task_id)
                .map(|tx| tx.send(true).is_ok())
                .unwrap_or(false)
        };
        if !signalled {
            if let Err(e) = self.coordinator.cancel_task(&task_id).await {
                warn!(task_id, error = %e, "cancel fan-out failed");
            }
        }
    }

    // ── Inbound response handling ────────────────────────────────────────────

    async fn handle_response(self: &Arc<Self>, msg: BrokerMessage) {
        let response = match JsonRpcResponse::parse(&msg.payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "dropping malformed response");
                return;
            }
        };

        // Delegations carry the sub-task id as the request id; updates also
        // carry it as their task_id.
        let sub_task_id_from_id = match &response.id {
            Some(mycel_a2a::rpc::RpcId::String(id)) => Some(id.clone()),
            _ => None,
        };

        if let Some(error) = response.error {
            let Some(sub_task_id) = sub_task_id_from_id else {
                warn!("peer error response without correlation id dropped");
                return;
            };
            let value = ToolResult::error(
                format!("peer failed: {}", error.message),
                mycel_tools::error_codes::SYSTEM_ERROR,
            )
            .serialize_result();
            self.process_peer_terminal(&sub_task_id, value).await;
            return;
        }

        let result = response.result.unwrap_or(Value::Null);
        if let Ok(update) = serde_json::from_value::<TaskStatusUpdateEvent>(result.clone()) {
            let sub_task_id = update.task_id.clone();
            if !update.is_final {
                if let Err(e) = self.coordinator.handle_intermediate_status(&sub_task_id).await {
                    warn!(sub_task_id, error = %e, "intermediate status handling failed");
                }
                return;
            }
            let text = update
                .status
                .message
                .as_ref()
                .map(|m| text_from_parts(&m.parts))
                .unwrap_or_default();
            let value = match update.status.state {
                TaskState::Completed => ToolResult::ok(text).serialize_result(),
                TaskState::Canceled => ToolResult::error(
                    "peer task was canceled",
                    mycel_tools::error_codes::SYSTEM_ERROR,
                )
                .serialize_result(),
                _ => ToolResult::error(
                    if text.is_empty() { "peer task failed".to_string() } else { text },
                    mycel_tools::error_codes::SYSTEM_ERROR,
                )
                .serialize_result(),
            };
            self.process_peer_terminal(&sub_task_id, value).await;
            return;
        }

        // Artifact updates and other notifications need no coordination.
        debug!(topic = %msg.topic, "ignoring non-status peer notification");
    }

    async fn process_peer_terminal(self: &Arc<Self>, sub_task_id: &str, value: Value) {
        match self.coordinator.handle_peer_response(sub_task_id, value).await {
            Ok(ResumeAction::Resume(resumed)) => self.spawn_resume(resumed),
            Ok(ResumeAction::Pending {
                logical_task_id,
                completed,
                total,
            }) => {
                debug!(task_id = %logical_task_id, completed, total, "fan-in pending");
            }
            Ok(ResumeAction::Drop) => {
                debug!(sub_task_id, "late or duplicate peer reply dropped");
            }
            Err(e) => error!(sub_task_id, error = %e, "peer response handling failed"),
        }
    }

    fn handle_discovery(&self, msg: BrokerMessage) {
        match serde_json::from_slice::<AgentCard>(&msg.payload) {
            Ok(card) => {
                // Our own heartbeat also arrives here; skip it.
                if card.name != self.config.agent.name {
                    self.agents.observe(card);
                }
            }
            Err(e) => debug!(error = %e, "unparseable agent card dropped"),
        }
    }

    // ── Task execution ───────────────────────────────────────────────────────

    fn spawn_resume(self: &Arc<Self>, resumed: ResumedDelegation) {
        let component = Arc::clone(self);
        tokio::spawn(async move {
            component.resume_task(resumed).await;
        });
    }

    async fn run_task(
        self: &Arc<Self>,
        a2a: A2AContext,
        message: Message,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let task_id = a2a.logical_task_id.clone();
        let mut ctx = TaskExecutionContext::new(&task_id, a2a)
            .with_token_tracking(self.config.agent.track_token_usage);
        let scoped = self.scoped_artifacts(&ctx);

        // Inline file parts become artifacts so tools can address them by
        // name.
        if let Err(e) = self.ingest_file_parts(&message, &scoped).await {
            warn!(task_id, error = %e, "uploading inbound file parts failed");
        }

        let sanitized = mycel_a2a::message::strip_large_file_bytes(
            &message,
            self.config.sandbox.inline_stripping_threshold_bytes,
        );
        debug!(task_id, "task log entry: {}", text_from_parts(&sanitized.parts));

        let history = vec![json!({
            "role": "user",
            "content": text_from_parts(&message.parts),
        })];
        self.drive_task(&mut ctx, history, cancel_rx).await;
    }

    async fn resume_task(self: &Arc<Self>, resumed: ResumedDelegation) {
        let snapshot = {
            let store = Arc::clone(&self.store);
            let task_id = resumed.logical_task_id.clone();
            tokio::task::spawn_blocking(move || store.restore_task(&task_id)).await
        };
        let snapshot = match snapshot {
            Ok(Ok(Some(snapshot))) => snapshot,
            Ok(Ok(None)) => {
                warn!(task_id = %resumed.logical_task_id, "no checkpoint to resume, dropping results");
                return;
            }
            Ok(Err(e)) => {
                error!(task_id = %resumed.logical_task_id, error = %e, "checkpoint restore failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "restore join failed");
                return;
            }
        };

        let mut ctx = TaskExecutionContext::from_checkpoint(
            snapshot,
            self.config.agent.track_token_usage,
        );
        info!(task_id = %ctx.task_id(), results = resumed.results.len(), "resuming task from checkpoint");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running
            .lock()
            .unwrap()
            .insert(ctx.task_id().to_string(), cancel_tx);

        // Feed the peer results back into the conversation as tool results.
        let history: Vec<Value> = resumed
            .results
            .iter()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.tool_call_id,
                    "name": format!("{PEER_TOOL_PREFIX}{}", r.peer_agent_name),
                    "content": r.result,
                })
            })
            .collect();
        self.drive_task(&mut ctx, history, cancel_rx).await;
    }

    /// The LLM ↔ tool loop. Runs turns until the model stops calling tools,
    /// a peer delegation pauses the task, an error fails it, or a cancel
    /// ends it.
    async fn drive_task(
        self: &Arc<Self>,
        ctx: &mut TaskExecutionContext,
        mut history: Vec<Value>,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let mut translator = self.translator();
        let scoped = self.scoped_artifacts(ctx);

        loop {
            if *cancel_rx.borrow() || ctx.cancel_requested() {
                ctx.request_cancel();
                self.finish_cancelled(ctx, &mut translator).await;
                return;
            }

            ctx.begin_invocation();
            let request = LlmRequest {
                messages: history.clone(),
                tools: self.tools.schemas(),
            };
            let mut stream = match self.llm.run_turn(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.finish_failed(ctx, &mut translator, &format!("model call failed: {e}"))
                        .await;
                    return;
                }
            };

            let mut calls: Vec<(String, String, Value)> = Vec::new();
            let mut turn_error: Option<String> = None;
            while let Some(event) = stream.next().await {
                if *cancel_rx.borrow() {
                    ctx.request_cancel();
                    break;
                }
                match event {
                    Ok(LlmEvent::TextDelta(text)) => {
                        ctx.append_response(&text);
                        if let Some(out) = translator.on_text_delta(ctx.a2a_context(), &text) {
                            self.publish_outbound(out).await;
                        }
                    }
                    Ok(LlmEvent::FunctionCall { call_id, name, args }) => {
                        if let Some(out) = translator.on_non_text_event(ctx.a2a_context()) {
                            self.publish_outbound(out).await;
                        }
                        calls.push((call_id, name, args));
                    }
                    Ok(LlmEvent::FunctionResponse { .. }) => {
                        // Never forwarded as a status update.
                    }
                    Ok(LlmEvent::InlineData { mime_type, bytes }) => {
                        debug!(mime_type, bytes = bytes.len(), "inline data skipped");
                    }
                    Ok(LlmEvent::Usage {
                        model,
                        input,
                        output,
                        cached,
                    }) => {
                        ctx.record_token_usage(&model, "agent", input, output, cached);
                    }
                    Ok(LlmEvent::Final) => break,
                    Ok(LlmEvent::Error { message, .. }) => {
                        turn_error = Some(message);
                        break;
                    }
                    Err(e) => {
                        turn_error = Some(e.to_string());
                        break;
                    }
                }
            }

            if ctx.cancel_requested() {
                self.finish_cancelled(ctx, &mut translator).await;
                return;
            }
            if let Some(message) = turn_error {
                self.finish_failed(ctx, &mut translator, &message).await;
                return;
            }

            if calls.is_empty() {
                self.finish_completed(ctx, &mut translator).await;
                return;
            }

            // ── Tool phase ───────────────────────────────────────────────────
            let mut peer_calls = Vec::new();
            for (call_id, name, args) in calls {
                if let Some(peer) = name.strip_prefix(PEER_TOOL_PREFIX) {
                    peer_calls.push((call_id, peer.to_string(), args));
                } else {
                    let result = self.run_local_tool(ctx, &scoped, &name, args).await;
                    history.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "name": name,
                        "content": result.serialize_result(),
                    }));
                }
            }

            // Artifacts produced by this turn's tools ride out now, ahead of
            // any pause or the next model turn.
            for artifact in ctx.drain_artifact_signals() {
                let update = translator.artifact_update(ctx.a2a_context(), &artifact);
                self.publish_outbound(update).await;
            }

            if peer_calls.is_empty() {
                continue;
            }

            // ── Peer delegation: pause here ──────────────────────────────────
            let dispatch = self.dispatch_peers(ctx, peer_calls).await;
            match dispatch {
                Ok(()) => {
                    // The task is paused; some replica resumes it on reply.
                    self.running.lock().unwrap().remove(ctx.task_id());
                    info!(task_id = %ctx.task_id(), "task paused awaiting peers");
                    return;
                }
                Err(result) => {
                    // Delegation failed; let the model react to the error.
                    history.push(json!({
                        "role": "tool",
                        "tool_call_id": "peer-dispatch",
                        "name": "peer_delegation",
                        "content": result.serialize_result(),
                    }));
                }
            }
        }
    }

    async fn dispatch_peers(
        &self,
        ctx: &mut TaskExecutionContext,
        peer_calls: Vec<(String, String, Value)>,
    ) -> Result<(), ToolResult> {
        let to_call = |call_id: String, peer: String, args: Value| {
            let text = args["task_description"]
                .as_str()
                .or_else(|| args["message"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| args.to_string());
            PeerCall {
                peer_agent_name: peer,
                message: Message::user(vec![Part::text(text)]),
                tool_call_id: call_id,
                timeout_seconds: Some(
                    args["timeout_seconds"].as_u64().unwrap_or(DEFAULT_PEER_TIMEOUT_SECS),
                ),
            }
        };

        if peer_calls.len() == 1 {
            let (call_id, peer, args) = peer_calls.into_iter().next().expect("one call");
            self.coordinator
                .delegate_to_peer(ctx, to_call(call_id, peer, args))
                .await
                .map(|_| ())
                .map_err(|e| e.to_tool_result())
        } else {
            let calls = peer_calls
                .into_iter()
                .map(|(call_id, peer, args)| to_call(call_id, peer, args))
                .collect();
            self.coordinator
                .dispatch_parallel(ctx, calls)
                .await
                .map(|_| ())
                .map_err(|e| e.to_tool_result())
        }
    }

    /// Run one non-peer tool call, streaming its statuses as working
    /// updates and persisting artifact-destined outputs. Produced artifacts
    /// are queued on the context; the caller forwards them with the next
    /// status boundary.
    async fn run_local_tool(
        &self,
        ctx: &mut TaskExecutionContext,
        scoped: &ScopedArtifactService,
        name: &str,
        args: Value,
    ) -> ToolResult {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusSignal>();
        // Statuses stream live from whatever thread the tool runs on; they
        // get their own unbatched translator over the same routing context.
        let status_translator = {
            let mut t = self.translator_unbatched();
            let a2a = ctx.a2a_context().clone();
            let broker = Arc::clone(&self.broker);
            tokio::spawn(async move {
                while let Some(signal) = status_rx.recv().await {
                    let out = match signal {
                        StatusSignal::Status(text) => t.on_text_delta(&a2a, &text),
                        StatusSignal::Signal(data) => t.on_text_delta(&a2a, &data.to_string()),
                    };
                    if let Some(out) = out {
                        let mut msg = BrokerMessage::new(out.topic, out.payload);
                        msg.user_properties = out.user_properties;
                        let _ = broker.publish(msg).await;
                    }
                }
            })
        };

        let spec = self.tools.get(name);
        let mut result = match spec {
            Some(spec) if spec.location == ToolLocation::Sandbox => {
                let request = SandboxRequest {
                    task_id: ctx.task_id().to_string(),
                    tool_name: name.to_string(),
                    args,
                    tool_config: HashMap::new(),
                    app_name: scoped.app().to_string(),
                    user_id: scoped.user_id().to_string(),
                    session_id: scoped.session_id().to_string(),
                    timeout_seconds: None,
                    status_tx: Some(status_tx),
                };
                self.sandbox.execute(request, &spec, scoped).await
            }
            _ => {
                // Unknown tools fall through to the runtime, which answers
                // with a proper UNKNOWN_TOOL error result.
                let facade = Arc::new(
                    ToolContextFacade::new(scoped.app(), scoped.user_id(), scoped.session_id())
                        .with_status_sender(status_tx)
                        .with_a2a_context(
                            serde_json::to_value(ctx.a2a_context()).unwrap_or(Value::Null),
                        ),
                );
                self.runtime.invoke(name, args, facade, scoped).await
            }
        };
        // Every status sender is gone once the tool finished; wait for the
        // forwarder to drain the tail.
        let _ = status_translator.await;

        // ── Persist artifact-destined outputs ───────────────────────────────
        let mut kept = Vec::new();
        for object in result.data_objects.drain(..) {
            if object.disposition == DataDisposition::Inline {
                kept.push(object);
                continue;
            }
            let bytes = object.content.as_bytes();
            match scoped
                .save_artifact(&object.name, bytes.clone(), &object.mime_type, object.metadata.clone())
                .await
            {
                Ok(version) => {
                    ctx.add_produced_artifact(ArtifactRef {
                        app: scoped.app().to_string(),
                        user_id: scoped.user_id().to_string(),
                        session_id: scoped.session_id().to_string(),
                        filename: object.name.clone(),
                        version,
                        mime_type: Some(object.mime_type.clone()),
                        size_bytes: Some(bytes.len() as u64),
                        metadata: object.metadata.clone(),
                    });
                }
                Err(e) => {
                    warn!(name = %object.name, error = %e, "persisting tool output failed");
                    kept.push(object);
                }
            }
        }
        result.data_objects = kept;
        result
    }

    // ── Terminal paths ───────────────────────────────────────────────────────

    async fn finish_completed(
        &self,
        ctx: &mut TaskExecutionContext,
        translator: &mut EventTranslator,
    ) {
        let text = ctx.flush_response();
        // Any artifacts still queued ride ahead of the terminal update.
        for artifact in ctx.drain_artifact_signals() {
            let update = translator.artifact_update(ctx.a2a_context(), &artifact);
            self.publish_outbound(update).await;
        }
        let message = (!text.is_empty()).then(|| Message::agent_text(text));
        for out in translator.terminal(ctx.a2a_context(), TaskState::Completed, message) {
            self.publish_outbound(out).await;
        }
        self.finalize(ctx).await;
        info!(task_id = %ctx.task_id(), "task completed");
    }

    async fn finish_failed(
        &self,
        ctx: &mut TaskExecutionContext,
        translator: &mut EventTranslator,
        reason: &str,
    ) {
        error!(task_id = %ctx.task_id(), reason, "task failed");
        let out = translator.error(ctx.a2a_context(), reason);
        self.publish_outbound(out).await;
        for out in translator.terminal(
            ctx.a2a_context(),
            TaskState::Failed,
            Some(Message::agent_text(reason)),
        ) {
            self.publish_outbound(out).await;
        }
        self.finalize(ctx).await;
    }

    async fn finish_cancelled(
        &self,
        ctx: &mut TaskExecutionContext,
        translator: &mut EventTranslator,
    ) {
        info!(task_id = %ctx.task_id(), "task cancelled");
        if let Err(e) = self.coordinator.cancel_task(ctx.task_id()).await {
            warn!(task_id = %ctx.task_id(), error = %e, "peer cancel fan-out failed");
        }
        for out in translator.terminal(ctx.a2a_context(), TaskState::Canceled, None) {
            self.publish_outbound(out).await;
        }
        self.running.lock().unwrap().remove(ctx.task_id());
    }

    /// Purge checkpoint rows and drop the running entry after a terminal
    /// status went out.
    async fn finalize(&self, ctx: &TaskExecutionContext) {
        let store = Arc::clone(&self.store);
        let task_id = ctx.task_id().to_string();
        if let Ok(Err(e)) =
            tokio::task::spawn_blocking(move || store.cleanup_task(&task_id)).await
        {
            warn!(task_id = %ctx.task_id(), error = %e, "checkpoint cleanup failed");
        }
        self.running.lock().unwrap().remove(ctx.task_id());
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn translator(&self) -> EventTranslator {
        EventTranslator::new(
            &self.config.namespace,
            &self.config.agent.name,
            self.gateway_id(),
            self.config.agent.stream_batching_threshold_bytes,
        )
    }

    fn translator_unbatched(&self) -> EventTranslator {
        EventTranslator::new(
            &self.config.namespace,
            &self.config.agent.name,
            self.gateway_id(),
            0,
        )
    }

    fn scoped_artifacts(&self, ctx: &TaskExecutionContext) -> ScopedArtifactService {
        let a2a = ctx.a2a_context();
        ScopedArtifactService::new(
            self.artifacts.clone(),
            self.config.agent.name.clone(),
            a2a.user_id.clone().unwrap_or_else(|| "anonymous".to_string()),
            a2a.effective_session_id
                .clone()
                .unwrap_or_else(|| ctx.task_id().to_string()),
        )
    }

    /// Save inbound inline file parts as artifacts so tools can reference
    /// them by filename.
    async fn ingest_file_parts(
        &self,
        message: &Message,
        scoped: &ScopedArtifactService,
    ) -> anyhow::Result<()> {
        for part in &message.parts {
            if let Part::File { file } = part {
                let (Some(name), Some(bytes)) = (&file.name, file.decoded_bytes()) else {
                    continue;
                };
                let mime = file
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                scoped
                    .save_artifact(name, bytes, &mime, HashMap::new())
                    .await
                    .map_err(|e| anyhow::anyhow!("saving inbound file '{name}': {e}"))?;
                debug!(name, "inbound file part stored as artifact");
            }
        }
        Ok(())
    }

    async fn publish_outbound(&self, out: OutboundMessage) {
        let mut msg = BrokerMessage::new(out.topic, out.payload);
        msg.user_properties = out.user_properties;
        if let Err(e) = self.broker.publish(msg).await {
            // The task stays in the paused table for a later replica when a
            // terminal status cannot be delivered.
            error!(error = %e, "publish failed");
        }
    }
}
