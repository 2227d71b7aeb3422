// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// A named periodic background task, cancellable on shutdown.
///
/// Every recurring agent duty (discovery heartbeat, timeout sweep, stale
/// workdir sweep, registry eviction) runs as one of these so shutdown can
/// cancel them all deterministically before the worker pool goes away.
pub struct PeriodicTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            debug!(task = name, "periodic task stopping");
                            return;
                        }
                    }
                }
            }
        });
        Self { name, stop, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn("test-ticker", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.shutdown().await;
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");
    }

    #[tokio::test]
    async fn shutdown_is_prompt() {
        let task = PeriodicTask::spawn("idle", Duration::from_secs(3600), || async {});
        assert_eq!(task.name(), "idle");
        tokio::time::timeout(Duration::from_secs(1), task.shutdown())
            .await
            .expect("shutdown hung");
    }
}
