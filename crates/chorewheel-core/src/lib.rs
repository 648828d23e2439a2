//! # Chorewheel Core Library
//!
//! This library provides the core business logic for the Chorewheel
//! household chore tracker: the per-(user, chore) lifecycle state machine,
//! the reset decision policy, recurrence and streak math, and the
//! lifecycle manager that drives both trigger lanes. Embedders wire up
//! persistence and the collaborator sinks; the engine exposes no network
//! surface of its own.
//!
//! ## Architecture
//!
//! - **Lifecycle Manager**: Owns the record store and routes the approval
//!   lane (claim/approve/disapprove) and the timer lanes (periodic scan,
//!   midnight boundary) through one pure decision policy
//! - **Reset Decision Policy**: A side-effect-free function of an explicit
//!   evaluation context; the only place reset branching lives
//! - **Reset Executor**: The only component that mutates records when a
//!   decision says to reset, reschedule, or auto-approve
//! - **Storage**: JSON snapshot of the full record tree plus TOML-based
//!   engine configuration
//!
//! ## Key Components
//!
//! - [`LifecycleManager`]: Entry point for every lifecycle operation
//! - [`ChoreDefinition`]: Per-chore configuration, validated up front
//! - [`UserChoreRecord`]: Lifecycle state for one (user, chore) pair
//! - [`decide`]: The reset decision policy
//! - [`SnapshotStore`]: File-backed record-tree persistence

pub mod chore;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod locks;
pub mod policy;
pub mod record;
pub mod recurrence;
pub mod runner;
pub mod storage;
pub mod streak;

pub use chore::{
    ApprovalResetType, ChoreDefinition, CompletionCriteria, OverdueHandling, RecurringFrequency,
};
pub use config::EngineConfig;
pub use error::{
    ConfigError, CoreError, PersistenceError, RecurrenceError, Result, TransitionError,
};
pub use events::{
    CompletionEvent, EventType, GamificationSink, MissEvent, NotificationEvent, NotificationSink,
    NullSink, PointsLedger, RecipientRole,
};
pub use executor::{ApplyOutcome, ResetExecutor};
pub use lifecycle::LifecycleManager;
pub use locks::{LockGuard, LockKey, LockRegistry};
pub use policy::{decide, DueRelation, EvaluationContext, ResetDecision, TriggerSource};
pub use record::{ChoreState, RecordStore, RecordTree, UserChoreRecord};
pub use recurrence::RecurrenceCalculator;
pub use runner::EngineRunner;
pub use storage::{MemoryStore, Persistence, RetryPolicy, SnapshotStore};
pub use streak::StreakCalculator;
