// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent component.
//!
//! Ties the task engine together: consumes A2A requests from the broker,
//! drives the LLM ↔ tool loop, delegates to peers through the coordinator,
//! translates adapter events into protocol messages, broadcasts its
//! AgentCard, and keeps a TTL view of every other agent on the mesh.

mod component;
mod llm;
mod registry;
mod timers;
mod translator;

pub use component::{AgentComponent, AgentHandle};
pub use llm::{EchoAdapter, LlmAdapter, LlmEvent, LlmEventStream, LlmRequest, ScriptedAdapter};
pub use registry::{AgentRegistry, RegistryEvent};
pub use timers::PeriodicTask;
pub use translator::{EventTranslator, OutboundMessage};
