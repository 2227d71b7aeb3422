// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, error, info};

use mycel_task::{CheckpointSnapshot, PeerCorrelation, TaskExecutionContext};

use crate::schema::init_schema;
use crate::StoreError;

/// Current unix time as fractional seconds — the timestamp unit of every
/// checkpoint column.
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A peer sub-task row read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSubTaskEntry {
    pub sub_task_id: String,
    pub logical_task_id: String,
    pub invocation_id: String,
    pub correlation: PeerCorrelation,
}

/// One row of a timeout sweep; still has to be claimed individually.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredSubTask {
    pub sub_task_id: String,
    pub logical_task_id: String,
    pub invocation_id: String,
}

/// Shared checkpoint store for all replicas of an agent.
///
/// rusqlite connections are not `Sync`; the mutex serialises access within
/// one process while IMMEDIATE transactions provide the cross-process
/// atomicity (sqlite's write lock stands in for `SELECT … FOR UPDATE`).
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Retriable(format!("opening {}: {e}", path.display())))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_schema(&conn)?;
        info!(path = %path.display(), "checkpoint store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist the full coordination state of a task in one transaction:
    /// the paused-task row, one peer-sub-task row per outstanding delegation
    /// (deadline = now + timeout when declared), and one parallel-invocation
    /// row per fan-out group.
    ///
    /// Re-checkpointing an unchanged context is idempotent apart from
    /// `checkpointed_at`. A `sub_task_id` already recorded under a different
    /// task is a [`StoreError::Conflict`] and rolls the whole write back.
    pub fn checkpoint(
        &self,
        ctx: &TaskExecutionContext,
        agent_name: &str,
    ) -> Result<(), StoreError> {
        let snapshot = ctx.to_checkpoint();
        let now = now_unix();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            r#"
            INSERT INTO paused_task (
                logical_task_id, agent_name, a2a_context, effective_session_id,
                user_id, current_invocation_id, produced_artifacts,
                artifact_signals_to_return, response_buffer, flags,
                security_context, token_usage, checkpointed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(logical_task_id) DO UPDATE SET
                agent_name = ?2,
                a2a_context = ?3,
                effective_session_id = ?4,
                user_id = ?5,
                current_invocation_id = ?6,
                produced_artifacts = ?7,
                artifact_signals_to_return = ?8,
                response_buffer = ?9,
                flags = ?10,
                security_context = ?11,
                token_usage = ?12,
                checkpointed_at = ?13
            "#,
            params![
                snapshot.task_id,
                agent_name,
                serde_json::to_string(&snapshot.a2a_context)?,
                snapshot.a2a_context.effective_session_id,
                snapshot.a2a_context.user_id,
                snapshot.current_invocation_id,
                serde_json::to_string(&snapshot.produced_artifacts)?,
                serde_json::to_string(&snapshot.artifact_signals_to_return)?,
                snapshot.response_buffer,
                serde_json::to_string(&snapshot.flags)?,
                serde_json::to_string(&snapshot.security_context)?,
                serde_json::to_string(&snapshot.token_usage)?,
                now,
            ],
        )?;

        for (sub_task_id, correlation) in &snapshot.active_peer_sub_tasks {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT logical_task_id FROM peer_sub_task WHERE sub_task_id = ?1",
                    [sub_task_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = existing {
                if owner != snapshot.task_id {
                    return Err(StoreError::Conflict(format!(
                        "sub-task {sub_task_id} already recorded for task {owner}, \
                         refused checkpoint for task {}",
                        snapshot.task_id
                    )));
                }
            }
            let timeout_deadline = correlation.timeout_seconds.map(|s| now + s as f64);
            tx.execute(
                r#"
                INSERT INTO peer_sub_task (
                    sub_task_id, logical_task_id, invocation_id,
                    correlation_data, timeout_deadline, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(sub_task_id) DO UPDATE SET
                    invocation_id = ?3,
                    correlation_data = ?4,
                    timeout_deadline = ?5
                "#,
                params![
                    sub_task_id,
                    snapshot.task_id,
                    correlation.invocation_id,
                    serde_json::to_string(correlation)?,
                    timeout_deadline,
                    now,
                ],
            )?;
        }

        for (invocation_id, state) in &snapshot.parallel_tool_calls {
            tx.execute(
                r#"
                INSERT INTO parallel_invocation (
                    logical_task_id, invocation_id, total_expected,
                    completed_count, results
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(logical_task_id, invocation_id) DO UPDATE SET
                    total_expected = ?3,
                    completed_count = ?4,
                    results = ?5
                "#,
                params![
                    snapshot.task_id,
                    invocation_id,
                    state.total_expected,
                    state.completed_count,
                    serde_json::to_string(&state.results)?,
                ],
            )?;
        }

        tx.commit()?;
        info!(
            task_id = %snapshot.task_id,
            peers = snapshot.active_peer_sub_tasks.len(),
            parallel = snapshot.parallel_tool_calls.len(),
            "checkpointed task"
        );
        Ok(())
    }

    /// Atomically claim a peer sub-task: read and delete its row in one
    /// transaction. `None` means another worker already claimed it — the
    /// distributed equivalent of pop-if-present.
    pub fn claim_peer_sub_task(
        &self,
        sub_task_id: &str,
    ) -> Result<Option<PeerSubTaskEntry>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "SELECT logical_task_id, invocation_id, correlation_data
                 FROM peer_sub_task WHERE sub_task_id = ?1",
                [sub_task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((logical_task_id, invocation_id, correlation_json)) = row else {
            return Ok(None);
        };

        tx.execute("DELETE FROM peer_sub_task WHERE sub_task_id = ?1", [sub_task_id])?;
        tx.commit()?;

        let correlation: PeerCorrelation = serde_json::from_str(&correlation_json)?;
        debug!(sub_task_id, task_id = %logical_task_id, "claimed peer sub-task");
        Ok(Some(PeerSubTaskEntry {
            sub_task_id: sub_task_id.to_string(),
            logical_task_id,
            invocation_id,
            correlation,
        }))
    }

    /// Non-destructive read of one peer sub-task. Used by the
    /// intermediate-status path, which must not consume the row.
    pub fn get_peer_sub_task(
        &self,
        sub_task_id: &str,
    ) -> Result<Option<PeerSubTaskEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT logical_task_id, invocation_id, correlation_data
                 FROM peer_sub_task WHERE sub_task_id = ?1",
                [sub_task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((logical_task_id, invocation_id, correlation_json)) => Ok(Some(PeerSubTaskEntry {
                sub_task_id: sub_task_id.to_string(),
                logical_task_id,
                invocation_id,
                correlation: serde_json::from_str(&correlation_json)?,
            })),
        }
    }

    /// Atomic increment-and-append under the write lock. Returns
    /// `(completed, total)` after the update, or `(0, 0)` when no record
    /// exists (logged — indicates a fan-out that was never checkpointed).
    pub fn record_parallel_result(
        &self,
        logical_task_id: &str,
        invocation_id: &str,
        result: &Value,
    ) -> Result<(u32, u32), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "SELECT completed_count, total_expected, results
                 FROM parallel_invocation
                 WHERE logical_task_id = ?1 AND invocation_id = ?2",
                [logical_task_id, invocation_id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((completed, total, results_json)) = row else {
            error!(
                task_id = %logical_task_id,
                invocation_id,
                "no parallel invocation record for result"
            );
            return Ok((0, 0));
        };

        let mut results: Vec<Value> = serde_json::from_str(&results_json)?;
        results.push(result.clone());
        let completed = completed + 1;

        tx.execute(
            "UPDATE parallel_invocation
             SET completed_count = ?1, results = ?2
             WHERE logical_task_id = ?3 AND invocation_id = ?4",
            params![
                completed,
                serde_json::to_string(&results)?,
                logical_task_id,
                invocation_id
            ],
        )?;
        tx.commit()?;
        Ok((completed, total))
    }

    /// Non-destructive read of a fan-out group's accumulated results.
    pub fn get_parallel_results(
        &self,
        logical_task_id: &str,
        invocation_id: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let results_json: Option<String> = conn
            .query_row(
                "SELECT results FROM parallel_invocation
                 WHERE logical_task_id = ?1 AND invocation_id = ?2",
                [logical_task_id, invocation_id],
                |row| row.get(0),
            )
            .optional()?;
        match results_json {
            None => Ok(Vec::new()),
            Some(json) => Ok(serde_json::from_str(&json)?),
        }
    }

    /// Extend a pending sub-task's deadline (a peer sent intermediate
    /// status, so it is alive). Returns false when the row is gone.
    pub fn reset_timeout_deadline(
        &self,
        sub_task_id: &str,
        new_deadline: f64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE peer_sub_task SET timeout_deadline = ?1 WHERE sub_task_id = ?2",
            params![new_deadline, sub_task_id],
        )?;
        Ok(updated > 0)
    }

    /// Read back a paused task for reconstruction.
    ///
    /// The returned snapshot has empty peer/parallel maps: those live in
    /// their own tables and stay under the store's atomic primitives until
    /// the task leaves the paused state.
    pub fn restore_task(
        &self,
        logical_task_id: &str,
    ) -> Result<Option<CheckpointSnapshot>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT a2a_context, current_invocation_id, produced_artifacts,
                       artifact_signals_to_return, response_buffer, flags,
                       security_context, token_usage
                FROM paused_task WHERE logical_task_id = ?1
                "#,
                [logical_task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            a2a_context,
            current_invocation_id,
            produced_artifacts,
            artifact_signals,
            response_buffer,
            flags,
            security_context,
            token_usage,
        )) = row
        else {
            return Ok(None);
        };

        fn parse_or_default<T: serde::de::DeserializeOwned + Default>(
            column: Option<String>,
        ) -> Result<T, StoreError> {
            match column {
                None => Ok(T::default()),
                Some(json) if json.is_empty() => Ok(T::default()),
                Some(json) => Ok(serde_json::from_str(&json)?),
            }
        }

        Ok(Some(CheckpointSnapshot {
            schema_version: mycel_task::CHECKPOINT_SCHEMA_VERSION,
            task_id: logical_task_id.to_string(),
            a2a_context: serde_json::from_str(&a2a_context)?,
            current_invocation_id,
            produced_artifacts: parse_or_default(produced_artifacts)?,
            artifact_signals_to_return: parse_or_default(artifact_signals)?,
            response_buffer: response_buffer.unwrap_or_default(),
            active_peer_sub_tasks: Default::default(),
            parallel_tool_calls: Default::default(),
            flags: parse_or_default(flags)?,
            security_context: parse_or_default(security_context)?,
            token_usage: parse_or_default(token_usage)?,
        }))
    }

    /// Delete every checkpoint row of a task. Deletions are explicit rather
    /// than relying on CASCADE (support varies across deployments).
    /// Idempotent: cleaning an already-clean task is a no-op.
    pub fn cleanup_task(&self, logical_task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM peer_sub_task WHERE logical_task_id = ?1",
            [logical_task_id],
        )?;
        tx.execute(
            "DELETE FROM parallel_invocation WHERE logical_task_id = ?1",
            [logical_task_id],
        )?;
        tx.execute(
            "DELETE FROM paused_task WHERE logical_task_id = ?1",
            [logical_task_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All recorded peer sub-tasks of one task — the cancellation fan-out
    /// needs the peer names without consuming the rows.
    pub fn get_peer_sub_tasks_for_task(
        &self,
        logical_task_id: &str,
    ) -> Result<Vec<PeerSubTaskEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT sub_task_id, invocation_id, correlation_data
             FROM peer_sub_task WHERE logical_task_id = ?1
             ORDER BY created_at",
        )?;
        let entries = stmt
            .query_map([logical_task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        entries
            .into_iter()
            .map(|(sub_task_id, invocation_id, correlation_json)| {
                Ok(PeerSubTaskEntry {
                    sub_task_id,
                    logical_task_id: logical_task_id.to_string(),
                    invocation_id,
                    correlation: serde_json::from_str(&correlation_json)?,
                })
            })
            .collect()
    }

    /// Peer sub-tasks of this agent whose deadline has passed. The sweeper
    /// must still claim each entry — another replica may win the race.
    pub fn sweep_expired_timeouts(
        &self,
        agent_name: &str,
        limit: usize,
    ) -> Result<Vec<ExpiredSubTask>, StoreError> {
        let now = now_unix();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT p.sub_task_id, p.logical_task_id, p.invocation_id
            FROM peer_sub_task p
            JOIN paused_task t ON p.logical_task_id = t.logical_task_id
            WHERE t.agent_name = ?1
              AND p.timeout_deadline IS NOT NULL
              AND p.timeout_deadline < ?2
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![agent_name, now, limit as i64], |row| {
                Ok(ExpiredSubTask {
                    sub_task_id: row.get(0)?,
                    logical_task_id: row.get(1)?,
                    invocation_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count paused tasks for an agent — monitoring hook.
    pub fn count_paused_tasks(&self, agent_name: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM paused_task WHERE agent_name = ?1",
            [agent_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap() as usize
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
