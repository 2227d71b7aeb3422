// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Broker abstraction.
//!
//! The mesh assumes a topic-addressed pub/sub broker with at-least-once
//! delivery and per-message user properties. Production deployments inject
//! their broker client behind [`BrokerClient`]; [`InMemoryBroker`] serves
//! tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
}

/// One delivered message. `user_properties` carries broker-level metadata
/// that must round-trip verbatim (e.g. user-config blobs).
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub user_properties: HashMap<String, String>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            user_properties: HashMap::new(),
        }
    }
}

/// Topic-addressed publish/subscribe with at-least-once delivery.
///
/// `subscribe` takes a topic filter: either an exact topic or a prefix
/// followed by `/>` matching every topic below it (the levels-below wildcard
/// most brokers provide).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    async fn subscribe(
        &self,
        topic_filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<BrokerMessage>, BrokerError>;
}

/// Return true when `filter` matches `topic` under the `/>` wildcard rule.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if let Some(prefix) = filter.strip_suffix("/>") {
        topic.strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    } else {
        filter == topic
    }
}

#[derive(Default)]
struct InMemoryInner {
    subscriptions: Vec<(String, mpsc::UnboundedSender<BrokerMessage>)>,
}

/// In-process broker with the same delivery contract as a real one: every
/// matching subscription receives its own copy, and a publish with no
/// subscribers still succeeds (at-least-once starts at zero receivers).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions — test hook.
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().unwrap().subscriptions.len()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        // Drop subscriptions whose receivers are gone.
        inner
            .subscriptions
            .retain(|(_, tx)| !tx.is_closed());
        let mut delivered = 0usize;
        for (filter, tx) in &inner.subscriptions {
            if topic_matches(filter, &message.topic) {
                let _ = tx.send(message.clone());
                delivered += 1;
            }
        }
        debug!(topic = %message.topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<BrokerMessage>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .push((topic_filter.to_string(), tx));
        Ok(rx)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_matching() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(topic_matches("a/b/>", "a/b/c"));
        assert!(topic_matches("a/b/>", "a/b/c/d"));
        assert!(!topic_matches("a/b/>", "a/b"));
        assert!(!topic_matches("a/b/>", "a/bc/d"));
    }

    #[tokio::test]
    async fn subscriber_receives_matching_publish() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("ns/agent/alpha/request").await.unwrap();
        broker
            .publish(BrokerMessage::new("ns/agent/alpha/request", b"hi".to_vec()))
            .await
            .unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"hi");
    }

    #[tokio::test]
    async fn wildcard_subscription_sees_child_topics() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("ns/gateway/gw1/>").await.unwrap();
        broker
            .publish(BrokerMessage::new(
                "ns/gateway/gw1/task/t1/status",
                b"s".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, b"s");
    }

    #[tokio::test]
    async fn non_matching_topic_not_delivered() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("ns/agent/alpha/request").await.unwrap();
        broker
            .publish(BrokerMessage::new("ns/agent/beta/request", b"x".to_vec()))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_matching_subscriber_gets_a_copy() {
        let broker = InMemoryBroker::new();
        let mut rx1 = broker.subscribe("ns/discovery/agentcards").await.unwrap();
        let mut rx2 = broker.subscribe("ns/discovery/>").await.unwrap();
        broker
            .publish(BrokerMessage::new("ns/discovery/agentcards", b"c".to_vec()))
            .await
            .unwrap();
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let broker = InMemoryBroker::new();
        {
            let _rx = broker.subscribe("ns/x").await.unwrap();
        }
        broker
            .publish(BrokerMessage::new("ns/x", b"y".to_vec()))
            .await
            .unwrap();
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn user_properties_round_trip() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("ns/t").await.unwrap();
        let mut msg = BrokerMessage::new("ns/t", vec![]);
        msg.user_properties
            .insert("a2aUserConfig".into(), "{\"k\":1}".into());
        broker.publish(msg).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.user_properties["a2aUserConfig"], "{\"k\":1}");
    }
}
