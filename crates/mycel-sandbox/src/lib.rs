// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sandboxed tool execution.
//!
//! A tool invocation gets its own work directory (`input/`, `output/`, a
//! 0600 FIFO for status frames), pre-loaded artifacts, a resource-limit
//! profile applied before exec, and optionally full bubblewrap isolation.
//! The child process is the host binary's `tool-runner` entry, resolving
//! the tool in the same registry as in-process execution — one tool
//! contract, two execution environments.

mod command;
mod error;
mod invocation;
mod profiles;
mod runner;
mod stream;
pub mod tool_runner;
mod workdir;

pub use command::{build_bwrap_command, build_direct_command, build_filesystem_mounts};
pub use error::SandboxError;
pub use invocation::{exit_codes, ArtifactDescriptor, ToolRunnerSpec, INVOCATION_SPEC_FILENAME};
pub use profiles::{get_profile, SandboxProfile, SANDBOX_PROFILES};
pub use runner::{SandboxRequest, SandboxRunner};
pub use stream::{consume_status_pipe, StreamBody, StreamMessage, HEARTBEAT_INTERVAL};
pub use workdir::{
    check_disk_space, cleanup_stale_work_dirs, cleanup_work_directory, safe_filename,
    setup_work_directory, STATUS_PIPE_FILENAME,
};
