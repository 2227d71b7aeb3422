// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use mycel_a2a::{
    broker::{BrokerClient, BrokerMessage},
    message::Message,
    rpc::{JsonRpcRequest, RpcId, METHOD_MESSAGE_SEND, METHOD_TASKS_CANCEL},
    topics,
};
use mycel_store::{now_unix, with_backoff, CheckpointStore, PeerSubTaskEntry};
use mycel_task::{PeerCorrelation, TaskExecutionContext};
use mycel_tools::{error_codes, ToolResult};

use crate::PeerError;

/// One peer call in a fan-out group.
pub struct PeerCall {
    pub peer_agent_name: String,
    pub message: Message,
    pub tool_call_id: String,
    pub timeout_seconds: Option<u64>,
}

/// One completed delegation inside a [`ResumedDelegation`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeerToolResult {
    pub sub_task_id: String,
    pub tool_call_id: String,
    pub peer_agent_name: String,
    pub result: Value,
}

/// The parent task is ready to re-enter its LLM loop with these results.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumedDelegation {
    pub logical_task_id: String,
    pub invocation_id: String,
    /// One entry per completed call; for fan-in groups the order is reply
    /// arrival order.
    pub results: Vec<PeerToolResult>,
}

/// Outcome of processing one inbound peer response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeAction {
    /// All awaited results are in — resume the parent task.
    Resume(ResumedDelegation),
    /// Part of a fan-out group that is still incomplete.
    Pending {
        logical_task_id: String,
        completed: u32,
        total: u32,
    },
    /// Row already claimed (duplicate delivery, or the sweep won) — drop.
    Drop,
}

/// Coordinates peer sub-tasks for one agent.
///
/// Store access runs on the blocking pool; the coordinator itself holds no
/// task state — everything lives in the [`TaskExecutionContext`] while
/// running and in the checkpoint store while paused.
pub struct PeerCoordinator {
    store: Arc<CheckpointStore>,
    broker: Arc<dyn BrokerClient>,
    namespace: String,
    agent_name: String,
}

impl PeerCoordinator {
    pub fn new(
        store: Arc<CheckpointStore>,
        broker: Arc<dyn BrokerClient>,
        namespace: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            namespace: namespace.into(),
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Send one sub-task to a peer.
    ///
    /// Order matters: the correlation is recorded in the context and
    /// checkpointed *before* the request goes out, so a fast reply landing
    /// on any replica always finds a row to claim. A publish failure
    /// aborts the delegation — the row is claimed back and the error
    /// surfaces as a tool error.
    pub async fn delegate_to_peer(
        &self,
        ctx: &mut TaskExecutionContext,
        call: PeerCall,
    ) -> Result<String, PeerError> {
        let invocation_id = ctx
            .current_invocation_id()
            .unwrap_or_default()
            .to_string();
        let sub_task_id = format!("sub-{}", uuid::Uuid::new_v4().simple());
        let correlation = PeerCorrelation {
            invocation_id,
            peer_agent_name: call.peer_agent_name.clone(),
            tool_call_id: call.tool_call_id.clone(),
            timeout_seconds: call.timeout_seconds,
            parallel_group_id: None,
        };
        ctx.add_peer_sub_task(sub_task_id.clone(), correlation);
        self.checkpoint_task(ctx).await?;

        if let Err(e) = self.publish_sub_task(ctx, &sub_task_id, &call).await {
            self.abort_delegation(ctx, &[sub_task_id]).await;
            return Err(e);
        }
        info!(
            sub_task_id,
            peer = %call.peer_agent_name,
            task_id = %ctx.task_id(),
            "delegated sub-task to peer"
        );
        Ok(sub_task_id)
    }

    /// Dispatch N peer calls issued in one LLM turn as a fan-out group.
    ///
    /// All calls share the current invocation id and one parallel-invocation
    /// record with `total_expected = N`. As with single delegation, the
    /// whole group is checkpointed before the first request is published.
    /// A publish failure after partial dispatch cancels the already-sent
    /// peers and fails the group.
    pub async fn dispatch_parallel(
        &self,
        ctx: &mut TaskExecutionContext,
        calls: Vec<PeerCall>,
    ) -> Result<Vec<String>, PeerError> {
        let invocation_id = ctx
            .current_invocation_id()
            .unwrap_or_default()
            .to_string();
        ctx.begin_parallel_group(&invocation_id, calls.len() as u32);

        let mut prepared = Vec::with_capacity(calls.len());
        for call in calls {
            let sub_task_id = format!("sub-{}", uuid::Uuid::new_v4().simple());
            ctx.add_peer_sub_task(
                sub_task_id.clone(),
                PeerCorrelation {
                    invocation_id: invocation_id.clone(),
                    peer_agent_name: call.peer_agent_name.clone(),
                    tool_call_id: call.tool_call_id.clone(),
                    timeout_seconds: call.timeout_seconds,
                    parallel_group_id: Some(invocation_id.clone()),
                },
            );
            prepared.push((sub_task_id, call));
        }
        self.checkpoint_task(ctx).await?;

        let mut sub_task_ids = Vec::with_capacity(prepared.len());
        for (sub_task_id, call) in &prepared {
            if let Err(e) = self.publish_sub_task(ctx, sub_task_id, call).await {
                warn!(task_id = %ctx.task_id(), error = %e, "fan-out publish failed, cancelling group");
                self.cancel_task(ctx.task_id()).await?;
                return Err(e);
            }
            sub_task_ids.push(sub_task_id.clone());
        }
        info!(
            task_id = %ctx.task_id(),
            invocation_id,
            count = sub_task_ids.len(),
            "dispatched parallel fan-out"
        );
        Ok(sub_task_ids)
    }

    /// Undo a delegation whose publish failed: claim the rows back (so the
    /// sweeper never sees them) and drop them from the context.
    async fn abort_delegation(&self, ctx: &mut TaskExecutionContext, sub_task_ids: &[String]) {
        for sub_task_id in sub_task_ids {
            ctx.pop_peer_sub_task(sub_task_id);
            let store = Arc::clone(&self.store);
            let id = sub_task_id.clone();
            let _ = tokio::task::spawn_blocking(move || store.claim_peer_sub_task(&id)).await;
        }
    }

    async fn publish_sub_task(
        &self,
        ctx: &TaskExecutionContext,
        sub_task_id: &str,
        call: &PeerCall,
    ) -> Result<(), PeerError> {
        let mut message = call.message.clone();
        message.task_id = Some(sub_task_id.to_string());
        message.context_id = ctx.a2a_context().context_id.clone();

        let params = json!({
            "message": message,
            "metadata": {
                "replyToTopic": topics::agent_response_topic(&self.namespace, &self.agent_name),
                "statusTopic": topics::agent_response_topic(&self.namespace, &self.agent_name),
                "parentTaskId": ctx.task_id(),
                "userId": ctx.a2a_context().user_id,
                "sessionId": ctx.a2a_context().effective_session_id,
            }
        });
        let request = JsonRpcRequest::new(
            Some(RpcId::String(sub_task_id.to_string())),
            METHOD_MESSAGE_SEND,
            params,
        );
        let payload = serde_json::to_vec(&request)
            .map_err(|e| PeerError::PublishFailed(e.to_string()))?;
        let topic = topics::agent_request_topic(&self.namespace, &call.peer_agent_name);
        self.broker
            .publish(BrokerMessage::new(topic, payload))
            .await
            .map_err(|e| PeerError::PublishFailed(e.to_string()))
    }

    /// Checkpoint the context, retrying transient store errors. On a final
    /// failure the task cannot be safely suspended: all already-dispatched
    /// peers are cancelled and the error propagates so the caller fails the
    /// task.
    pub async fn checkpoint_task(&self, ctx: &TaskExecutionContext) -> Result<(), PeerError> {
        let store = Arc::clone(&self.store);
        let agent_name = self.agent_name.clone();
        let ctx_clone = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            with_backoff(|| store.checkpoint(&ctx_clone, &agent_name))
        })
        .await
        .map_err(|e| PeerError::Join(e.to_string()))?;

        if let Err(e) = result {
            warn!(task_id = %ctx.task_id(), error = %e, "checkpoint failed, cancelling dispatched peers");
            self.cancel_task(ctx.task_id()).await?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Handle a terminal peer response for `sub_task_id`.
    ///
    /// The first claim wins; replies that find no row (redelivery, sweep won
    /// the race) are dropped. Fan-out members record into the parallel
    /// tally and only the last one resumes the parent.
    pub async fn handle_peer_response(
        &self,
        sub_task_id: &str,
        result: Value,
    ) -> Result<ResumeAction, PeerError> {
        let entry = {
            let store = Arc::clone(&self.store);
            let sub_task_id = sub_task_id.to_string();
            tokio::task::spawn_blocking(move || store.claim_peer_sub_task(&sub_task_id))
                .await
                .map_err(|e| PeerError::Join(e.to_string()))??
        };
        let Some(entry) = entry else {
            debug!(sub_task_id, "peer response for already-claimed sub-task, dropping");
            return Ok(ResumeAction::Drop);
        };
        self.fan_in(entry, result).await
    }

    /// A non-terminal status update arrived for a pending sub-task: the
    /// peer is alive, so extend its deadline by the original timeout. The
    /// row is deliberately not claimed.
    pub async fn handle_intermediate_status(&self, sub_task_id: &str) -> Result<(), PeerError> {
        let store = Arc::clone(&self.store);
        let sub_task_id = sub_task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), mycel_store::StoreError> {
            let Some(entry) = store.get_peer_sub_task(&sub_task_id)? else {
                return Ok(());
            };
            if let Some(timeout) = entry.correlation.timeout_seconds {
                let extended =
                    store.reset_timeout_deadline(&sub_task_id, now_unix() + timeout as f64)?;
                if extended {
                    debug!(sub_task_id, timeout, "extended peer deadline on status update");
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| PeerError::Join(e.to_string()))??;
        Ok(())
    }

    /// Run one timeout sweep pass: claim each expired sub-task and resume
    /// its parent with a synthetic timeout error. Rows claimed by a faster
    /// replica in between are skipped.
    pub async fn sweep_once(&self, limit: usize) -> Result<Vec<ResumeAction>, PeerError> {
        let expired = {
            let store = Arc::clone(&self.store);
            let agent_name = self.agent_name.clone();
            tokio::task::spawn_blocking(move || store.sweep_expired_timeouts(&agent_name, limit))
                .await
                .map_err(|e| PeerError::Join(e.to_string()))??
        };

        let mut actions = Vec::new();
        for row in expired {
            let entry = {
                let store = Arc::clone(&self.store);
                let sub_task_id = row.sub_task_id.clone();
                tokio::task::spawn_blocking(move || store.claim_peer_sub_task(&sub_task_id))
                    .await
                    .map_err(|e| PeerError::Join(e.to_string()))??
            };
            let Some(entry) = entry else {
                continue;
            };
            warn!(
                sub_task_id = %entry.sub_task_id,
                peer = %entry.correlation.peer_agent_name,
                task_id = %entry.logical_task_id,
                "peer sub-task timed out"
            );
            let synthetic = ToolResult::error(
                format!(
                    "peer '{}' did not answer within {}s",
                    entry.correlation.peer_agent_name,
                    entry.correlation.timeout_seconds.unwrap_or(0)
                ),
                error_codes::PEER_TIMEOUT,
            )
            .serialize_result();
            actions.push(self.fan_in(entry, synthetic).await?);
        }
        Ok(actions)
    }

    /// Cancel every recorded peer of a task: publish `tasks/cancel` to each
    /// peer's request topic, then best-effort cleanup of the checkpoint
    /// rows.
    pub async fn cancel_task(&self, logical_task_id: &str) -> Result<(), PeerError> {
        let entries = {
            let store = Arc::clone(&self.store);
            let task = logical_task_id.to_string();
            tokio::task::spawn_blocking(move || store.get_peer_sub_tasks_for_task(&task))
                .await
                .map_err(|e| PeerError::Join(e.to_string()))??
        };

        for entry in &entries {
            let request = JsonRpcRequest::new(
                Some(RpcId::String(entry.sub_task_id.clone())),
                METHOD_TASKS_CANCEL,
                json!({ "id": entry.sub_task_id }),
            );
            let topic =
                topics::agent_request_topic(&self.namespace, &entry.correlation.peer_agent_name);
            match serde_json::to_vec(&request) {
                Ok(payload) => {
                    if let Err(e) = self.broker.publish(BrokerMessage::new(topic, payload)).await {
                        warn!(sub_task_id = %entry.sub_task_id, error = %e, "cancel publish failed");
                    }
                }
                Err(e) => warn!(error = %e, "cancel encode failed"),
            }
        }
        info!(task_id = logical_task_id, peers = entries.len(), "cancelled peer sub-tasks");

        let store = Arc::clone(&self.store);
        let task = logical_task_id.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || store.cleanup_task(&task))
            .await
            .map_err(|e| PeerError::Join(e.to_string()))?
        {
            // Best-effort: a later replica's retention pass will finish it.
            warn!(task_id = logical_task_id, error = %e, "checkpoint cleanup failed");
        }
        Ok(())
    }

    /// Shared fan-in step for real replies and synthetic timeout results.
    async fn fan_in(
        &self,
        entry: PeerSubTaskEntry,
        result: Value,
    ) -> Result<ResumeAction, PeerError> {
        let peer_result = PeerToolResult {
            sub_task_id: entry.sub_task_id.clone(),
            tool_call_id: entry.correlation.tool_call_id.clone(),
            peer_agent_name: entry.correlation.peer_agent_name.clone(),
            result: result.clone(),
        };

        let Some(group_id) = entry.correlation.parallel_group_id.clone() else {
            return Ok(ResumeAction::Resume(ResumedDelegation {
                logical_task_id: entry.logical_task_id,
                invocation_id: entry.invocation_id,
                results: vec![peer_result],
            }));
        };

        let stored = json!({
            "sub_task_id": peer_result.sub_task_id,
            "tool_call_id": peer_result.tool_call_id,
            "peer_agent_name": peer_result.peer_agent_name,
            "result": peer_result.result,
        });
        let (completed, total) = {
            let store = Arc::clone(&self.store);
            let task = entry.logical_task_id.clone();
            let group = group_id.clone();
            tokio::task::spawn_blocking(move || {
                store.record_parallel_result(&task, &group, &stored)
            })
            .await
            .map_err(|e| PeerError::Join(e.to_string()))??
        };

        if completed < total || total == 0 {
            return Ok(ResumeAction::Pending {
                logical_task_id: entry.logical_task_id,
                completed,
                total,
            });
        }

        let results = {
            let store = Arc::clone(&self.store);
            let task = entry.logical_task_id.clone();
            let group = group_id.clone();
            tokio::task::spawn_blocking(move || store.get_parallel_results(&task, &group))
                .await
                .map_err(|e| PeerError::Join(e.to_string()))??
        };

        let results = results
            .into_iter()
            .map(|value| PeerToolResult {
                sub_task_id: value["sub_task_id"].as_str().unwrap_or_default().to_string(),
                tool_call_id: value["tool_call_id"].as_str().unwrap_or_default().to_string(),
                peer_agent_name: value["peer_agent_name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                result: value["result"].clone(),
            })
            .collect();

        Ok(ResumeAction::Resume(ResumedDelegation {
            logical_task_id: entry.logical_task_id,
            invocation_id: group_id,
            results,
        }))
    }
}
