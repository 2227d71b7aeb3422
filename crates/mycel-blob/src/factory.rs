// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::info;

use crate::{BlobError, BlobStore, FilesystemBlobStore, MemoryBlobStore};

/// Backend selector. Recognised values: `filesystem`, `memory`, and the
/// cloud backends `s3` / `gcs` / `azure` (provided by external adapter
/// crates implementing [`BlobStore`]).
pub const ENV_STORAGE_TYPE: &str = "OBJECT_STORAGE_TYPE";
/// Bucket (cloud) or root directory (filesystem).
pub const ENV_STORAGE_BUCKET: &str = "OBJECT_STORAGE_BUCKET_NAME";

/// Construct a blob store from the environment.
///
/// The cloud backends are deployed as separate adapter processes/crates
/// behind the same trait; selecting one here without that adapter linked is
/// a configuration error, not a silent fallback.
pub fn blob_store_from_env() -> Result<Arc<dyn BlobStore>, BlobError> {
    let backend = std::env::var(ENV_STORAGE_TYPE).unwrap_or_else(|_| "filesystem".to_string());
    match backend.as_str() {
        "filesystem" => {
            let root = std::env::var(ENV_STORAGE_BUCKET)
                .unwrap_or_else(|_| "/var/lib/mycel/artifacts".to_string());
            info!(root = %root, "using filesystem blob store");
            Ok(Arc::new(FilesystemBlobStore::new(root)?))
        }
        "memory" => {
            info!("using in-memory blob store");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        "s3" | "gcs" | "azure" => Err(BlobError::Backend(format!(
            "backend '{backend}' requires the external object-storage adapter; \
             inject it at construction instead of using {ENV_STORAGE_TYPE}"
        ))),
        other => Err(BlobError::Backend(format!(
            "unknown {ENV_STORAGE_TYPE}: {other}"
        ))),
    }
}
