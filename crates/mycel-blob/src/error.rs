// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => BlobError::Permission(e.to_string()),
            _ => BlobError::Backend(e.to_string()),
        }
    }
}
