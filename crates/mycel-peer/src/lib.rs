// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Peer delegation.
//!
//! The coordinator sends sub-tasks to peer agents, claims their responses
//! exactly once through the checkpoint store, fans parallel results back in,
//! sweeps expired timeouts, and propagates cancellation. All ordering races
//! (duplicate replies, reply-vs-sweep, status-vs-terminal) resolve through
//! one primitive: the store's atomic claim.

mod coordinator;
mod error;
mod sweeper;

pub use coordinator::{PeerCall, PeerCoordinator, PeerToolResult, ResumeAction, ResumedDelegation};
pub use error::PeerError;
pub use sweeper::TimeoutSweeper;
