//! Collaborator contracts and the events they receive.
//!
//! The engine exposes no network protocol; notifications, the points
//! ledger, and gamification are in-process trait objects. Every lifecycle
//! transition produces a structured event with an `at` timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification event types, fired at most once per transition per period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    DueWindowOpened,
    DueReminder,
    Overdue,
    Missed,
    Reset,
}

/// Who receives a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    /// The assigned family member.
    Member,
    /// The supervising role that claims/approves completions.
    Supervisor,
}

/// A structured notification handed to the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    pub event_type: EventType,
    pub user_id: String,
    pub chore_id: String,
    pub due_date: Option<DateTime<Utc>>,
    pub recipient_role: RecipientRole,
    pub at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        chore_id: impl Into<String>,
        due_date: Option<DateTime<Utc>>,
        recipient_role: RecipientRole,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id: user_id.into(),
            chore_id: chore_id.into(),
            due_date,
            recipient_role,
            at: Utc::now(),
        }
    }
}

/// A completion handed to the gamification collaborator, carrying the
/// already-updated streak values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub user_id: String,
    pub chore_id: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub at: DateTime<Utc>,
}

/// A detected miss handed to the gamification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissEvent {
    pub user_id: String,
    pub chore_id: String,
    pub current_missed_streak: u32,
    pub missed_longest_streak: u32,
    pub at: DateTime<Utc>,
}

/// Notification delivery collaborator. Formatting and transport are not
/// this engine's concern.
pub trait NotificationSink: Send {
    fn notify(&mut self, event: &NotificationEvent);
}

/// Points/economy collaborator. Balances are not validated here.
pub trait PointsLedger: Send {
    fn award(&mut self, user_id: &str, chore_id: &str, amount: i64);
    fn reverse(&mut self, user_id: &str, chore_id: &str, amount: i64);
}

/// Badge/achievement/challenge collaborator. Scoring is opaque to the engine.
pub trait GamificationSink: Send {
    fn completion(&mut self, event: &CompletionEvent);
    fn miss(&mut self, event: &MissEvent);
}

/// No-op collaborator set, for embedders that wire sinks up later.
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&mut self, _event: &NotificationEvent) {}
}

impl PointsLedger for NullSink {
    fn award(&mut self, _user_id: &str, _chore_id: &str, _amount: i64) {}
    fn reverse(&mut self, _user_id: &str, _chore_id: &str, _amount: i64) {}
}

impl GamificationSink for NullSink {
    fn completion(&mut self, _event: &CompletionEvent) {}
    fn miss(&mut self, _event: &MissEvent) {}
}
