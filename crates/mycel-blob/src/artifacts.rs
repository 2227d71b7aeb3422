// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Versioned artifacts over the raw blob key space.
//!
//! Layout per artifact:
//!
//! ```text
//! {app}/{user}/{session}/{filename}/{N}        content of version N
//! {app}/{user}/{session}/{filename}/{N}.meta   JSON metadata of version N
//! ```
//!
//! Versions are a dense 0-based sequence per `(app, user, session,
//! filename)`; `latest` resolves to the maximum. Writers within one session
//! are serialised by the task engine, so max+1 allocation is race-free.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BlobError, BlobStore, StorageObject};

/// Version selection parsed from a `filename[:N]` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Exact(u64),
}

/// Parse an artifact filename with an optional `:version` suffix.
///
/// Filenames may themselves contain colons, so only a right-most all-digit
/// suffix counts as a version; anything else leaves the name literal.
pub fn parse_artifact_filename(name: &str) -> (&str, VersionSelector) {
    if let Some((base, suffix)) = name.rsplit_once(':') {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(version) = suffix.parse::<u64>() {
                return (base, VersionSelector::Exact(version));
            }
        }
    }
    (name, VersionSelector::Latest)
}

/// Per-version metadata stored in the `.meta` sibling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMeta {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// A loaded artifact version.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub filename: String,
    pub version: u64,
    pub bytes: Vec<u8>,
    pub meta: ArtifactMeta,
}

#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    fn scope_prefix(app: &str, user_id: &str, session_id: &str) -> String {
        format!("{app}/{user_id}/{session_id}")
    }

    fn content_key(app: &str, user_id: &str, session_id: &str, filename: &str, v: u64) -> String {
        format!("{}/{filename}/{v}", Self::scope_prefix(app, user_id, session_id))
    }

    fn meta_key(app: &str, user_id: &str, session_id: &str, filename: &str, v: u64) -> String {
        format!(
            "{}/{filename}/{v}.meta",
            Self::scope_prefix(app, user_id, session_id)
        )
    }

    /// All existing versions of one artifact, ascending.
    pub async fn list_versions(
        &self,
        app: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
    ) -> Result<Vec<u64>, BlobError> {
        let prefix = format!("{}/{filename}/", Self::scope_prefix(app, user_id, session_id));
        let keys = self.store.list(&prefix).await?;
        let mut versions: Vec<u64> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .filter_map(|rest| rest.parse::<u64>().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Write a new version and return its number (0 for the first write).
    pub async fn save(
        &self,
        app: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<u64, BlobError> {
        let versions = self.list_versions(app, user_id, session_id, filename).await?;
        let version = versions.last().map(|v| v + 1).unwrap_or(0);

        let meta = ArtifactMeta {
            mime_type: mime_type.to_string(),
            size_bytes: bytes.len() as u64,
            metadata,
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| BlobError::Backend(format!("encoding artifact metadata: {e}")))?;

        let content_key = Self::content_key(app, user_id, session_id, filename, version);
        let meta_key = Self::meta_key(app, user_id, session_id, filename, version);

        self.store
            .put(
                &content_key,
                StorageObject::new(bytes).with_content_type(mime_type),
            )
            .await?;
        self.store
            .put(
                &meta_key,
                StorageObject::new(meta_bytes).with_content_type("application/json"),
            )
            .await?;
        Ok(version)
    }

    /// Load one version (or the latest) of an artifact.
    pub async fn load(
        &self,
        app: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        selector: VersionSelector,
    ) -> Result<LoadedArtifact, BlobError> {
        let version = match selector {
            VersionSelector::Exact(v) => v,
            VersionSelector::Latest => self
                .list_versions(app, user_id, session_id, filename)
                .await?
                .last()
                .copied()
                .ok_or_else(|| BlobError::NotFound(filename.to_string()))?,
        };

        let content_key = Self::content_key(app, user_id, session_id, filename, version);
        let object = self.store.get(&content_key).await.map_err(|e| match e {
            BlobError::NotFound(_) => BlobError::NotFound(format!("{filename}:{version}")),
            other => other,
        })?;

        let meta_key = Self::meta_key(app, user_id, session_id, filename, version);
        let meta = match self.store.get(&meta_key).await {
            Ok(obj) => serde_json::from_slice(&obj.content).unwrap_or_default(),
            // A missing .meta sibling is tolerated; content is authoritative.
            Err(BlobError::NotFound(_)) => ArtifactMeta {
                mime_type: object.content_type.clone(),
                size_bytes: object.content.len() as u64,
                metadata: HashMap::new(),
            },
            Err(e) => return Err(e),
        };

        Ok(LoadedArtifact {
            filename: filename.to_string(),
            version,
            bytes: object.content,
            meta,
        })
    }

    /// Distinct artifact filenames within one scope.
    pub async fn list_filenames(
        &self,
        app: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>, BlobError> {
        let prefix = format!("{}/", Self::scope_prefix(app, user_id, session_id));
        let keys = self.store.list(&prefix).await?;
        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.ends_with(".meta"))
            .filter_map(|rest| rest.rsplit_once('/').map(|(name, _)| name.to_string()))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Delete every version (and metadata) of one artifact.
    pub async fn delete(
        &self,
        app: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
    ) -> Result<(), BlobError> {
        let versions = self.list_versions(app, user_id, session_id, filename).await?;
        if versions.is_empty() {
            return Err(BlobError::NotFound(filename.to_string()));
        }
        for version in versions {
            let content_key = Self::content_key(app, user_id, session_id, filename, version);
            let meta_key = Self::meta_key(app, user_id, session_id, filename, version);
            self.store.delete(&content_key).await?;
            // Metadata may be absent; ignore a missing sibling.
            match self.store.delete(&meta_key).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
