// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The checkpoint store.
//!
//! Three tables shared by every replica of an agent:
//!
//! * `paused_task` — the serialised [`mycel_task::TaskExecutionContext`].
//! * `peer_sub_task` — one row per outstanding peer delegation; the row's
//!   atomic read-and-delete ("claim") is the at-most-once primitive the
//!   whole coordination scheme rests on.
//! * `parallel_invocation` — fan-out tallies, updated under row lock.
//!
//! The store is synchronous (rusqlite); async callers wrap calls in
//! `spawn_blocking`. SQL stays within the SQLite/PostgreSQL-common subset.

mod error;
mod retry;
mod schema;
mod store;

pub use error::StoreError;
pub use retry::with_backoff;
pub use store::{now_unix, CheckpointStore, ExpiredSubTask, PeerSubTaskEntry};
