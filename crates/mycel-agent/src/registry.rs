// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Discovery: the process-wide table of known agents.
//!
//! Cards arrive on the discovery topic with every heartbeat and expire
//! after a TTL of silence. No globals — the registry is constructed once
//! and passed to whoever needs it; interested components subscribe to
//! added/removed events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use mycel_a2a::AgentCard;

/// Change notification for registry subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added(AgentCard),
    /// Name of the agent whose card expired (or was replaced by a newer
    /// card under comparison — only expiry emits this today).
    Removed(String),
}

struct Inner {
    cards: HashMap<String, (AgentCard, Instant)>,
    listeners: Vec<mpsc::UnboundedSender<RegistryEvent>>,
}

pub struct AgentRegistry {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl AgentRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                cards: HashMap::new(),
                listeners: Vec::new(),
            }),
        }
    }

    /// Record a heartbeat card. First sight of a name notifies `Added`;
    /// repeats just refresh the TTL.
    pub fn observe(&self, card: AgentCard) {
        let mut inner = self.inner.lock().unwrap();
        let is_new = !inner.cards.contains_key(&card.name);
        inner
            .cards
            .insert(card.name.clone(), (card.clone(), Instant::now()));
        if is_new {
            info!(agent = %card.name, "agent discovered");
            notify(&mut inner, RegistryEvent::Added(card));
        } else {
            debug!(agent = %card.name, "heartbeat refreshed");
        }
    }

    pub fn get(&self, name: &str) -> Option<AgentCard> {
        self.inner
            .lock()
            .unwrap()
            .cards
            .get(name)
            .map(|(card, _)| card.clone())
    }

    /// All live cards, name-sorted.
    pub fn list(&self) -> Vec<AgentCard> {
        let inner = self.inner.lock().unwrap();
        let mut cards: Vec<AgentCard> =
            inner.cards.values().map(|(card, _)| card.clone()).collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    /// Drop every card whose heartbeat is older than the TTL. Returns the
    /// evicted names and notifies subscribers.
    pub fn evict_expired(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .cards
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) > ttl)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            inner.cards.remove(name);
            info!(agent = %name, "agent card expired");
            notify(&mut inner, RegistryEvent::Removed(name.clone()));
        }
        expired
    }

    /// Subscribe to added/removed events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().listeners.push(tx);
        rx
    }
}

fn notify(inner: &mut Inner, event: RegistryEvent) {
    inner.listeners.retain(|tx| tx.send(event.clone()).is_ok());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str) -> AgentCard {
        AgentCard {
            name: name.into(),
            version: "1".into(),
            description: String::new(),
            url: String::new(),
            capabilities: Default::default(),
            skills: vec![],
            auth: None,
        }
    }

    #[test]
    fn observe_and_get() {
        let registry = AgentRegistry::new(Duration::from_secs(60));
        registry.observe(card("alpha"));
        assert_eq!(registry.get("alpha").unwrap().name, "alpha");
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn list_is_sorted() {
        let registry = AgentRegistry::new(Duration::from_secs(60));
        registry.observe(card("zeta"));
        registry.observe(card("alpha"));
        let names: Vec<String> = registry.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn added_event_only_on_first_sight() {
        let registry = AgentRegistry::new(Duration::from_secs(60));
        let mut rx = registry.subscribe();
        registry.observe(card("alpha"));
        registry.observe(card("alpha"));
        assert_eq!(rx.recv().await, Some(RegistryEvent::Added(card("alpha"))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn eviction_removes_and_notifies() {
        let registry = AgentRegistry::new(Duration::from_millis(10));
        let mut rx = registry.subscribe();
        registry.observe(card("alpha"));
        let _ = rx.recv().await;

        std::thread::sleep(Duration::from_millis(30));
        let evicted = registry.evict_expired();
        assert_eq!(evicted, vec!["alpha"]);
        assert!(registry.get("alpha").is_none());
        assert_eq!(rx.recv().await, Some(RegistryEvent::Removed("alpha".into())));
    }

    #[test]
    fn heartbeat_refreshes_ttl() {
        let registry = AgentRegistry::new(Duration::from_millis(50));
        registry.observe(card("alpha"));
        std::thread::sleep(Duration::from_millis(30));
        registry.observe(card("alpha"));
        std::thread::sleep(Duration::from_millis(30));
        // 60 ms since first sight but only 30 since last heartbeat.
        assert!(registry.evict_expired().is_empty());
        assert!(registry.get("alpha").is_some());
    }
}
