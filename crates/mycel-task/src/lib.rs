// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mutable state of one in-flight task.
//!
//! A [`TaskExecutionContext`] is owned by exactly one agent replica at a
//! time. It is either *running* (held in memory here) or *paused* (fully
//! materialised in the checkpoint store via [`CheckpointSnapshot`]); never
//! both. The snapshot codec is the bridge: `to_checkpoint` /
//! `from_checkpoint` round-trip every field, so any replica can resume.

mod context;
mod snapshot;
mod usage;

pub use context::{
    A2AContext, ArtifactRef, ParallelInvocationState, PeerCorrelation, TaskExecutionContext,
};
pub use snapshot::{CheckpointSnapshot, CHECKPOINT_SCHEMA_VERSION};
pub use usage::{TokenTotals, TokenUsage};
