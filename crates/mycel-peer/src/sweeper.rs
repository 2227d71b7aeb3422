// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::{PeerCoordinator, ResumeAction, ResumedDelegation};

/// Batch size per sweep pass; keeps one pass short even with many expired
/// rows, the next tick picks up the rest.
const SWEEP_LIMIT: usize = 10;

/// Periodic timeout sweeper.
///
/// Ticks every `interval`, claims expired peer sub-tasks through the
/// coordinator, and forwards the resulting resumptions (synthetic
/// `PEER_TIMEOUT` results) to the agent loop. Cancellable on shutdown.
pub struct TimeoutSweeper {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl TimeoutSweeper {
    pub fn spawn(
        coordinator: Arc<PeerCoordinator>,
        interval: Duration,
        resume_tx: mpsc::UnboundedSender<ResumedDelegation>,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            debug!("timeout sweeper stopping");
                            return;
                        }
                    }
                }
                match coordinator.sweep_once(SWEEP_LIMIT).await {
                    Ok(actions) => {
                        for action in actions {
                            if let ResumeAction::Resume(resumed) = action {
                                if resume_tx.send(resumed).is_err() {
                                    // Agent loop gone; nothing left to resume.
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "timeout sweep failed"),
                }
            }
        });
        Self { stop, handle }
    }

    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mycel_a2a::InMemoryBroker;
    use mycel_store::CheckpointStore;
    use mycel_task::{A2AContext, PeerCorrelation, TaskExecutionContext};

    fn coordinator() -> Arc<PeerCoordinator> {
        Arc::new(PeerCoordinator::new(
            Arc::new(CheckpointStore::open_in_memory().unwrap()),
            Arc::new(InMemoryBroker::new()),
            "ns",
            "agent-a",
        ))
    }

    #[tokio::test]
    async fn sweeper_delivers_timeout_resumption() {
        let coordinator = coordinator();

        // Checkpoint a task with an already-expired sub-task.
        let mut ctx = TaskExecutionContext::new(
            "t1",
            A2AContext {
                logical_task_id: "t1".into(),
                ..Default::default()
            },
        );
        ctx.begin_invocation();
        ctx.add_peer_sub_task(
            "sub-late",
            PeerCorrelation {
                invocation_id: "inv-1".into(),
                peer_agent_name: "peer-b".into(),
                tool_call_id: "call-1".into(),
                timeout_seconds: Some(0),
                parallel_group_id: None,
            },
        );
        coordinator.store().checkpoint(&ctx, "agent-a").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sweeper =
            TimeoutSweeper::spawn(Arc::clone(&coordinator), Duration::from_millis(10), tx);

        let resumed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sweeper did not fire")
            .expect("channel closed");
        assert_eq!(resumed.logical_task_id, "t1");
        assert_eq!(resumed.results.len(), 1);
        assert_eq!(resumed.results[0].result["error_code"], "PEER_TIMEOUT");

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_sweeper() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sweeper = TimeoutSweeper::spawn(coordinator(), Duration::from_millis(10), tx);
        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .expect("shutdown hung");
    }
}
