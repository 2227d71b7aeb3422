// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tool contract.
//!
//! A tool is a named callable exposed to the LLM through a declared schema.
//! The same [`ToolSpec`] runs in-process (here, via [`ToolRuntime`]) or
//! inside the sandbox runner — the contract (artifact pre-load, status
//! streaming through the facade, a [`ToolResult`] back) is identical in
//! both environments.

mod artifact;
pub mod builtin;
mod facade;
mod registry;
mod result;
pub mod runtime;
mod spec;

pub use artifact::Artifact;
pub use facade::{StatusSignal, ToolContextFacade};
pub use registry::{ToolRegistry, ToolSchema};
pub use result::{
    error_codes, DataContent, DataDisposition, DataObject, ToolResult, ToolStatus,
};
pub use runtime::ToolRuntime;
pub use spec::{
    ArtifactParam, ArtifactValue, ToolFuture, ToolHandler, ToolInvocation, ToolLocation, ToolSpec,
};
