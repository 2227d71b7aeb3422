// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use mycel_tools::{error_codes, ToolResult};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox timeout after {0}s")]
    Timeout(u64),

    #[error("sandbox process killed: {0}")]
    Killed(String),

    #[error("sandbox resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("unsafe filename: {0}")]
    UnsafeFilename(String),

    #[error("empty filename")]
    EmptyFilename,

    #[error("sandbox setup failed: {0}")]
    Setup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Surface to the LLM as a tool error; sandbox failures never abort the
    /// task.
    pub fn to_tool_result(&self) -> ToolResult {
        match self {
            SandboxError::Timeout(secs) => ToolResult::error(
                format!("tool exceeded the {secs}s sandbox timeout"),
                error_codes::SANDBOX_TIMEOUT,
            ),
            SandboxError::Killed(reason) => ToolResult::error(
                format!("sandboxed tool was killed: {reason}"),
                error_codes::SANDBOX_KILLED,
            ),
            SandboxError::ResourceExceeded(reason) => ToolResult::error(
                format!("sandboxed tool exceeded its resource budget: {reason}"),
                error_codes::SANDBOX_RESOURCE_EXCEEDED,
            ),
            other => ToolResult::error(other.to_string(), error_codes::SYSTEM_ERROR),
        }
    }
}
