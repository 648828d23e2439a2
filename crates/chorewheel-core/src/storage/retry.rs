//! Guaranteed-attempt persistence with backoff.
//!
//! The executor's contract is "mutate in memory, then unconditionally
//! attempt persistence"; this wrapper is where the surrounding lifecycle
//! manager retries that attempt. An exhausted retry budget surfaces the
//! failure but never discards the in-memory mutation -- the caller keeps
//! the tree dirty and tries again on the next pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PersistenceError;
use crate::record::RecordTree;
use crate::storage::Persistence;

/// Retry/backoff policy for saves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total save attempts per call (first try included).
    pub max_attempts: u32,
    /// Base backoff between attempts; doubles each retry.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

/// Save `tree`, retrying on a doubling backoff.
pub fn persist_with_retry<P: Persistence + ?Sized>(
    store: &P,
    tree: &RecordTree,
    policy: RetryPolicy,
) -> Result<(), PersistenceError> {
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff_ms;
    let mut last_message = String::new();

    for attempt in 1..=attempts {
        match store.save(tree) {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(attempt, error = %err, "record-tree save failed");
                last_message = err.to_string();
                if attempt < attempts {
                    std::thread::sleep(Duration::from_millis(backoff));
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    Err(PersistenceError::SaveFailed {
        attempts,
        message: last_message,
    })
}
