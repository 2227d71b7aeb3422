// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;

use crate::BlobError;

/// One stored object: raw content plus the metadata object stores carry
/// natively.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageObject {
    pub content: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

impl StorageObject {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            content_type: "application/octet-stream".to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// The uniform object-store interface.
///
/// Cloud backends (S3, GCS, Azure) live outside this crate and are injected
/// behind this trait; the in-tree backends cover filesystem deployments and
/// tests. Keys are `/`-separated paths; `list` returns every key under the
/// given prefix.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    async fn get(&self, key: &str) -> Result<StorageObject, BlobError>;

    async fn put(&self, key: &str, object: StorageObject) -> Result<(), BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}
