// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The A2A (agent-to-agent) protocol model.
//!
//! Everything that crosses the broker is defined here: message parts, task
//! status objects, the JSON-RPC 2.0 envelope, the topic grammar, and the
//! [`BrokerClient`] abstraction the rest of the runtime publishes through.

pub mod broker;
pub mod card;
pub mod message;
pub mod rpc;
pub mod task;
pub mod topics;

pub use broker::{BrokerClient, BrokerMessage, InMemoryBroker};
pub use card::AgentCard;
pub use message::{FileContent, Message, Part, Role};
pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, INTERNAL_ERROR};
pub use task::{
    Task, TaskArtifactUpdateEvent, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

use thiserror::Error;

/// An inbound payload that could not be interpreted as A2A traffic.
///
/// Malformed traffic is logged and dropped by receivers — it must never
/// fail a task or crash an agent (a hostile sender would otherwise have a
/// trivial denial-of-service lever).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed A2A payload: {0}")]
    Malformed(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}
