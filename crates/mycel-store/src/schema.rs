// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rusqlite::Connection;

use crate::StoreError;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current_version != 0 && current_version != SCHEMA_VERSION {
        return Err(StoreError::Fatal(format!(
            "checkpoint schema version {current_version} is newer than this build ({SCHEMA_VERSION})"
        )));
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS paused_task (
            logical_task_id TEXT PRIMARY KEY,
            agent_name TEXT NOT NULL,
            a2a_context TEXT NOT NULL,
            effective_session_id TEXT,
            user_id TEXT,
            current_invocation_id TEXT,
            produced_artifacts TEXT,
            artifact_signals_to_return TEXT,
            response_buffer TEXT,
            flags TEXT,
            security_context TEXT,
            token_usage TEXT,
            checkpointed_at DOUBLE NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_paused_task_agent ON paused_task(agent_name);

        CREATE TABLE IF NOT EXISTS peer_sub_task (
            sub_task_id TEXT PRIMARY KEY,
            logical_task_id TEXT NOT NULL
                REFERENCES paused_task(logical_task_id) ON DELETE CASCADE,
            invocation_id TEXT NOT NULL,
            correlation_data TEXT NOT NULL,
            timeout_deadline DOUBLE,
            created_at DOUBLE NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_peer_sub_task_task ON peer_sub_task(logical_task_id);
        CREATE INDEX IF NOT EXISTS idx_peer_sub_task_timeout ON peer_sub_task(timeout_deadline);
        CREATE INDEX IF NOT EXISTS idx_peer_sub_task_invocation ON peer_sub_task(invocation_id);

        CREATE TABLE IF NOT EXISTS parallel_invocation (
            logical_task_id TEXT NOT NULL,
            invocation_id TEXT NOT NULL,
            total_expected INT NOT NULL,
            completed_count INT NOT NULL DEFAULT 0,
            results TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (logical_task_id, invocation_id)
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
