// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-task artifact view.
//!
//! A `ScopedArtifactService` wraps an [`ArtifactStore`] and pins every
//! operation to one `(app, user, session)` known at construction. It is a
//! decorator, not a subclass: each override below is a fall-through
//! delegation with one scoping rule added.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::artifacts::LoadedArtifact;
use crate::{ArtifactStore, BlobError, VersionSelector};

/// Reserved user id that agent-default artifacts are stored under. Every
/// user of the agent can read them; nobody can delete them through a scoped
/// service.
pub const AGENT_DEFAULTS_USER_ID: &str = "__agent_defaults__";

/// Defaults are session-independent; they live under this fixed session id.
pub const AGENT_DEFAULTS_SESSION_ID: &str = "__shared__";

#[derive(Clone)]
pub struct ScopedArtifactService {
    artifacts: ArtifactStore,
    app: String,
    user_id: String,
    session_id: String,
}

impl ScopedArtifactService {
    pub fn new(
        artifacts: ArtifactStore,
        app: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            artifacts,
            app: app.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Load an artifact: the user's own copy first, then the shared agent
    /// default of the same name (read-through).
    pub async fn load_artifact(
        &self,
        filename: &str,
        selector: VersionSelector,
    ) -> Result<LoadedArtifact, BlobError> {
        match self
            .artifacts
            .load(&self.app, &self.user_id, &self.session_id, filename, selector)
            .await
        {
            Ok(artifact) => Ok(artifact),
            Err(BlobError::NotFound(_)) => {
                debug!(filename, "user artifact missing, trying agent defaults");
                self.artifacts
                    .load(
                        &self.app,
                        AGENT_DEFAULTS_USER_ID,
                        AGENT_DEFAULTS_SESSION_ID,
                        filename,
                        selector,
                    )
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Save always writes under the real user id, shadowing any default of
    /// the same name for this user from then on.
    pub async fn save_artifact(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<u64, BlobError> {
        self.artifacts
            .save(&self.app, &self.user_id, &self.session_id, filename, bytes, mime_type, metadata)
            .await
    }

    /// Union of the user's artifact names and the shared defaults.
    pub async fn list_artifact_keys(&self) -> Result<Vec<String>, BlobError> {
        let mut names = self
            .artifacts
            .list_filenames(&self.app, &self.user_id, &self.session_id)
            .await?;
        let defaults = self
            .artifacts
            .list_filenames(&self.app, AGENT_DEFAULTS_USER_ID, AGENT_DEFAULTS_SESSION_ID)
            .await?;
        names.extend(defaults);
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Delete the user's copy. Shared defaults cannot be deleted through a
    /// scoped service; asking to is a permission error, not a not-found.
    pub async fn delete_artifact(&self, filename: &str) -> Result<(), BlobError> {
        let own_versions = self
            .artifacts
            .list_versions(&self.app, &self.user_id, &self.session_id, filename)
            .await?;
        if own_versions.is_empty() {
            let default_versions = self
                .artifacts
                .list_versions(
                    &self.app,
                    AGENT_DEFAULTS_USER_ID,
                    AGENT_DEFAULTS_SESSION_ID,
                    filename,
                )
                .await?;
            if !default_versions.is_empty() {
                return Err(BlobError::Permission(format!(
                    "'{filename}' is a shared agent default and cannot be deleted"
                )));
            }
            return Err(BlobError::NotFound(filename.to_string()));
        }
        self.artifacts
            .delete(&self.app, &self.user_id, &self.session_id, filename)
            .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
