//! Core error types for chorewheel-core.
//!
//! This module defines the error hierarchy for the lifecycle engine using
//! thiserror. Each variant family maps to one failure class: configuration
//! rejected up front, state transitions the machine does not allow,
//! lock contention, recurrence math failures, and persistence failures.

use std::path::PathBuf;
use thiserror::Error;

use crate::record::ChoreState;

/// Core error type for chorewheel-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors, rejected before any record is touched
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A requested state change the machine does not allow
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    /// The per-pair or per-chore lock is already held.
    /// Retryable; the caller decides whether to retry or reject.
    #[error("Concurrent operation in progress for '{key}'")]
    ConcurrencyConflict { key: String },

    /// Recurrence or streak computation failed
    #[error("Recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    /// Persistence-related errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An unsupported combination of chore settings
    #[error("Unsupported configuration for chore '{chore_id}': {message}")]
    UnsupportedCombination { chore_id: String, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to load the engine configuration file
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save the engine configuration file
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Failed to parse the engine configuration file
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// State-transition errors. Rejected with no mutation.
#[derive(Error, Debug)]
pub enum TransitionError {
    /// The state machine does not allow this transition
    #[error("Invalid transition from {from:?} to {to:?}")]
    NotAllowed { from: ChoreState, to: ChoreState },

    /// The user is not assigned to the chore
    #[error("User '{user_id}' is not assigned to chore '{chore_id}'")]
    NotAssigned { user_id: String, chore_id: String },

    /// A shared-first chore is already claimed by another user
    #[error("Chore '{chore_id}' is already claimed by '{claimed_by}'")]
    ClaimBlocked { chore_id: String, claimed_by: String },

    /// The user already approved this chore in the current period
    #[error("User '{user_id}' already approved chore '{chore_id}' this period")]
    AlreadyApproved { user_id: String, chore_id: String },

    /// No record exists for the pair
    #[error("No record for user '{user_id}' on chore '{chore_id}'")]
    RecordNotFound { user_id: String, chore_id: String },

    /// Disapproval with no outstanding claim or approval to undo
    #[error("Nothing to disapprove for user '{user_id}' on chore '{chore_id}'")]
    NothingToDisapprove { user_id: String, chore_id: String },

    /// The chore is not known to the engine
    #[error("Unknown chore '{chore_id}'")]
    UnknownChore { chore_id: String },
}

/// Recurrence/streak computation errors.
///
/// These never corrupt records: the executor falls back to the
/// non-punitive default (increment the streak) and logs a warning.
#[derive(Error, Debug)]
pub enum RecurrenceError {
    /// A DAILY_MULTI slot string could not be parsed as HH:mm
    #[error("Malformed time slot '{slot}' for chore '{chore_id}'")]
    MalformedSlot { chore_id: String, slot: String },

    /// The replay walked too far without finding an occurrence
    #[error("Recurrence replay exceeded {limit} iterations for chore '{chore_id}'")]
    ReplayOverflow { chore_id: String, limit: u32 },

    /// The chore has no frequency settings that can produce an occurrence
    #[error("Chore '{chore_id}' has no computable schedule: {message}")]
    NoSchedule { chore_id: String, message: String },
}

/// Persistence errors.
///
/// A save failure never discards the in-memory mutation; the lifecycle
/// manager keeps the tree dirty and retries on a backoff.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Save failed after exhausting all retry attempts
    #[error("Save failed after {attempts} attempt(s): {message}")]
    SaveFailed { attempts: u32, message: String },

    /// Load failed
    #[error("Load failed: {0}")]
    LoadFailed(String),

    /// Snapshot file serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
