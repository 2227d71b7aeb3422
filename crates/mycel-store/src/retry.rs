// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tracing::warn;

use crate::StoreError;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Run `op`, retrying retriable store errors with exponential backoff
/// (100 ms doubling, capped at 5 s, 3 attempts total). Conflicts and fatal
/// errors propagate immediately.
///
/// Synchronous by design — callers already run store work on the blocking
/// pool, where sleeping is allowed.
pub fn with_backoff<T, F>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS => {
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "retrying store operation");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_first_try() {
        let mut calls = 0;
        let result = with_backoff(|| {
            calls += 1;
            Ok::<_, StoreError>(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_retriable_until_success() {
        let mut calls = 0;
        let result = with_backoff(|| {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Retriable("busy".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_three_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(|| {
            calls += 1;
            Err(StoreError::Retriable("busy".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn conflict_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(|| {
            calls += 1;
            Err(StoreError::Conflict("dup".into()))
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn fatal_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(|| {
            calls += 1;
            Err(StoreError::Fatal("corrupt".into()))
        });
        assert!(matches!(result, Err(StoreError::Fatal(_))));
        assert_eq!(calls, 1);
    }
}
