// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A `sub_task_id` was checkpointed under two different tasks — a bug in
    /// the caller, never retried.
    #[error("checkpoint conflict: {0}")]
    Conflict(String),

    /// Transient database failure (lock contention, dropped connection).
    /// Callers retry with bounded exponential backoff.
    #[error("retriable store error: {0}")]
    Retriable(String),

    /// Anything else — integrity violations, corrupt rows, encode failures.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Retriable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::Retriable(e.to_string())
                }
                _ => StoreError::Fatal(e.to_string()),
            },
            _ => StoreError::Fatal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Fatal(format!("checkpoint payload encoding: {e}"))
    }
}
