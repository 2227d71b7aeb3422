// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Blob storage for the mesh.
//!
//! Three layers, lowest first:
//!  1. [`BlobStore`] — a flat key/value object store (`list/get/put/delete`).
//!  2. [`ArtifactStore`] — versioned artifacts over the raw key space
//!     `{app}/{user}/{session}/{filename}/{N}` with `.meta` siblings.
//!  3. [`ScopedArtifactService`] — the per-task view, pinned to one
//!     `(app, user, session)` and falling through to shared agent defaults.

mod artifacts;
mod error;
mod factory;
mod fs;
mod memory;
mod scoped;
mod store;

pub use artifacts::{
    parse_artifact_filename, ArtifactMeta, ArtifactStore, LoadedArtifact, VersionSelector,
};
pub use error::BlobError;
pub use factory::{blob_store_from_env, ENV_STORAGE_BUCKET, ENV_STORAGE_TYPE};
pub use fs::FilesystemBlobStore;
pub use memory::MemoryBlobStore;
pub use scoped::{ScopedArtifactService, AGENT_DEFAULTS_SESSION_ID, AGENT_DEFAULTS_USER_ID};
pub use store::{BlobStore, StorageObject};
