// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory `BlobStore` — zero dependencies, suitable for tests, demos,
//! and single-process deployments that do not need durable artifacts.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{BlobError, BlobStore, StorageObject};

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    // BTreeMap keeps listings deterministic.
    objects: Arc<Mutex<BTreeMap<String, StorageObject>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects — test hook.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<StorageObject, BlobError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, object: StorageObject) -> Result<(), BlobError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryBlobStore::new();
        store
            .put("a/b", StorageObject::new(b"data".to_vec()))
            .await
            .unwrap();
        let obj = store.get("a/b").await.unwrap();
        assert_eq!(obj.content, b"data");
        assert_eq!(obj.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        for key in ["app/u/s/a/0", "app/u/s/b/0", "app/v/s/a/0"] {
            store.put(key, StorageObject::new(vec![])).await.unwrap();
        }
        let keys = store.list("app/u/").await.unwrap();
        assert_eq!(keys, vec!["app/u/s/a/0", "app/u/s/b/0"]);
    }

    #[tokio::test]
    async fn delete_removes_and_errors_on_repeat() {
        let store = MemoryBlobStore::new();
        store.put("k", StorageObject::new(vec![])).await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.delete("k").await.is_err());
    }
}
