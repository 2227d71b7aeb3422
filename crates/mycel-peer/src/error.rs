// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use mycel_store::StoreError;
use mycel_tools::{error_codes, ToolResult};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer publish failed: {0}")]
    PublishFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("coordinator task join failed: {0}")]
    Join(String),
}

impl PeerError {
    /// Surface this failure to the LLM as a tool error, keeping the task
    /// alive so the model can react.
    pub fn to_tool_result(&self) -> ToolResult {
        match self {
            PeerError::PublishFailed(reason) => ToolResult::error(
                format!("peer delegation could not be published: {reason}"),
                error_codes::PEER_PUBLISH_FAILED,
            ),
            other => ToolResult::error(other.to_string(), error_codes::SYSTEM_ERROR),
        }
    }
}
