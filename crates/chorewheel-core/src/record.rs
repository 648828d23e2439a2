//! Per-(user, chore) lifecycle records and the record store.
//!
//! A [`UserChoreRecord`] exists per (user, chore) pair for INDEPENDENT
//! chores and once per chore for SHARED/SHARED_FIRST. It embeds the
//! lifecycle state machine and is mutated only by the reset executor and
//! the claim/approve/disapprove entry points.
//!
//! Streak values live directly on the record. The daily snapshot buckets
//! are retention-pruned display data and are never read back as the source
//! of truth; the all-time bucket is never pruned.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::chore::ChoreDefinition;
use crate::error::TransitionError;

/// Lifecycle state of a chore record.
///
/// States follow strict transitions:
///
///   PENDING ──claim──> CLAIMED ──approve──> APPROVED ──reset──> PENDING
///      |                  |
///      |   disapprove     |
///      |<─────────────────+
///      |
///      +──boundary──> OVERDUE ──boundary──> MISSED ──reset──> PENDING
///                        |
///                        +──reset/claim──> PENDING | CLAIMED
///
/// PENDING and OVERDUE cycle indefinitely for recurring chores; there is
/// no terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChoreState {
    /// Actionable, waiting for a claim.
    Pending,
    /// Claimed by a user, waiting for supervisor approval.
    Claimed,
    /// Approved this period; waiting for the reset that returns it to PENDING.
    Approved,
    /// Due-date boundary crossed while actionable.
    Overdue,
    /// Overdue boundary crossed with no completion.
    Missed,
}

impl ChoreState {
    /// Check if a transition is valid.
    pub fn can_transition_to(&self, to: &ChoreState) -> bool {
        match self {
            ChoreState::Pending => matches!(
                to,
                ChoreState::Claimed | ChoreState::Approved | ChoreState::Overdue | ChoreState::Pending
            ),
            ChoreState::Claimed => matches!(
                to,
                ChoreState::Approved | ChoreState::Pending | ChoreState::Overdue
            ),
            ChoreState::Approved => matches!(to, ChoreState::Pending),
            ChoreState::Overdue => matches!(
                to,
                ChoreState::Missed | ChoreState::Pending | ChoreState::Claimed
            ),
            ChoreState::Missed => matches!(to, ChoreState::Pending),
        }
    }

    /// Get valid next states for this state.
    pub fn valid_transitions(&self) -> &[ChoreState] {
        match self {
            ChoreState::Pending => &[
                ChoreState::Claimed,
                ChoreState::Approved,
                ChoreState::Overdue,
                ChoreState::Pending,
            ],
            ChoreState::Claimed => &[ChoreState::Approved, ChoreState::Pending, ChoreState::Overdue],
            ChoreState::Approved => &[ChoreState::Pending],
            ChoreState::Overdue => &[ChoreState::Missed, ChoreState::Pending, ChoreState::Claimed],
            ChoreState::Missed => &[ChoreState::Pending],
        }
    }

    /// Whether the record can still be claimed/completed in this state.
    pub fn is_actionable(&self) -> bool {
        matches!(self, ChoreState::Pending | ChoreState::Claimed | ChoreState::Overdue)
    }
}

impl Default for ChoreState {
    fn default() -> Self {
        ChoreState::Pending
    }
}

/// Same-day streak-tally snapshot. Display only, never the source of truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailySnapshot {
    pub streak: u32,
    pub missed_streak: u32,
}

/// High-water marks. Never pruned.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AllTimeBucket {
    pub longest_streak: u32,
    pub missed_longest_streak: u32,
}

impl AllTimeBucket {
    /// Raise the completion high-water mark if strictly exceeded.
    pub fn observe_streak(&mut self, streak: u32) {
        if streak > self.longest_streak {
            self.longest_streak = streak;
        }
    }

    /// Raise the missed high-water mark if strictly exceeded.
    pub fn observe_missed_streak(&mut self, missed: u32) {
        if missed > self.missed_longest_streak {
            self.missed_longest_streak = missed;
        }
    }
}

/// Fire-once-per-period flags for notification events.
///
/// Cleared when the approval period restarts; guards against duplicate
/// notifications from overlapping due-window and reminder offsets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NotificationFlags {
    #[serde(default)]
    pub due_window_fired: bool,
    #[serde(default)]
    pub due_reminder_fired: bool,
    #[serde(default)]
    pub overdue_fired: bool,
    #[serde(default)]
    pub missed_fired: bool,
}

impl NotificationFlags {
    pub fn clear(&mut self) {
        *self = NotificationFlags::default();
    }
}

/// Lifecycle record for one (user, chore) pair, or one chore for
/// SHARED/SHARED_FIRST (`user_id` is `None` for the shared instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserChoreRecord {
    pub chore_id: String,
    /// Owning user for INDEPENDENT records; `None` for shared records.
    pub user_id: Option<String>,
    #[serde(default)]
    pub state: ChoreState,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_approved_in_current_period: bool,
    /// Users who approved in the current period (SHARED gating).
    #[serde(default)]
    pub approved_user_ids: BTreeSet<String>,
    /// Claim owner; for SHARED_FIRST this is the lockout holder.
    pub claimed_by: Option<String>,
    pub last_claimed: Option<DateTime<Utc>>,
    pub last_approved: Option<DateTime<Utc>>,
    pub last_disapproved: Option<DateTime<Utc>>,
    pub last_missed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub current_missed_streak: u32,
    pub approval_period_start: DateTime<Utc>,
    /// Retention-pruned same-day snapshots, keyed by date. Display only.
    #[serde(default)]
    pub daily_snapshot_buckets: BTreeMap<NaiveDate, DailySnapshot>,
    #[serde(default)]
    pub all_time_bucket: AllTimeBucket,
    #[serde(default)]
    pub notifications: NotificationFlags,
}

impl UserChoreRecord {
    /// Create a fresh record in PENDING with no due date.
    pub fn new(chore_id: impl Into<String>, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            chore_id: chore_id.into(),
            user_id,
            state: ChoreState::Pending,
            due_date: None,
            is_approved_in_current_period: false,
            approved_user_ids: BTreeSet::new(),
            claimed_by: None,
            last_claimed: None,
            last_approved: None,
            last_disapproved: None,
            last_missed: None,
            current_streak: 0,
            current_missed_streak: 0,
            approval_period_start: now,
            daily_snapshot_buckets: BTreeMap::new(),
            all_time_bucket: AllTimeBucket::default(),
            notifications: NotificationFlags::default(),
        }
    }

    /// Transition to a new state, rejecting moves the machine does not allow.
    /// No mutation happens on rejection.
    pub fn transition(&mut self, to: ChoreState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(&to) {
            return Err(TransitionError::NotAllowed {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Write today's streak-tally snapshot.
    ///
    /// At most one bucket exists per calendar day; a second write on the
    /// same day overwrites the same bucket rather than adding another.
    pub fn write_daily_snapshot(&mut self, date: NaiveDate) {
        self.daily_snapshot_buckets.insert(
            date,
            DailySnapshot {
                streak: self.current_streak,
                missed_streak: self.current_missed_streak,
            },
        );
    }

    /// Drop snapshot buckets older than the retention window.
    /// Streak fields and the all-time bucket are untouched.
    pub fn prune_snapshots(&mut self, today: NaiveDate, retention_days: u32) {
        let cutoff = today - Duration::days(retention_days as i64);
        self.daily_snapshot_buckets.retain(|date, _| *date >= cutoff);
    }

    /// Whether every listed user approved in the current period.
    pub fn all_approved(&self, assigned: &[String]) -> bool {
        assigned.iter().all(|u| self.approved_user_ids.contains(u))
    }
}

/// Storage key for independent records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: String,
    pub chore_id: String,
}

/// The full persisted record tree. Saved and loaded all-or-nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTree {
    pub records: Vec<UserChoreRecord>,
}

/// In-memory record store keyed by (user_id, chore_id), with shared
/// records stored once per chore.
///
/// Owned by the lifecycle manager: initialized at startup from a
/// [`RecordTree`], flushed back on shutdown and after every mutation.
#[derive(Debug, Default)]
pub struct RecordStore {
    independent: HashMap<RecordKey, UserChoreRecord>,
    shared: HashMap<String, UserChoreRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from a persisted tree.
    pub fn from_tree(tree: RecordTree) -> Self {
        let mut store = Self::new();
        for record in tree.records {
            match record.user_id.clone() {
                Some(user_id) => {
                    store.independent.insert(
                        RecordKey {
                            user_id,
                            chore_id: record.chore_id.clone(),
                        },
                        record,
                    );
                }
                None => {
                    store.shared.insert(record.chore_id.clone(), record);
                }
            }
        }
        store
    }

    /// Flatten the store into its persisted form.
    pub fn to_tree(&self) -> RecordTree {
        let mut records: Vec<UserChoreRecord> = self
            .independent
            .values()
            .chain(self.shared.values())
            .cloned()
            .collect();
        // Stable order keeps snapshot diffs readable.
        records.sort_by(|a, b| {
            (a.chore_id.as_str(), a.user_id.as_deref())
                .cmp(&(b.chore_id.as_str(), b.user_id.as_deref()))
        });
        RecordTree { records }
    }

    /// Ensure records exist for every assignment of `chore`.
    /// Creates missing records; never resets existing ones.
    pub fn ensure_assigned(&mut self, chore: &ChoreDefinition, now: DateTime<Utc>) {
        if chore.is_shared() {
            self.shared
                .entry(chore.id.clone())
                .or_insert_with(|| UserChoreRecord::new(chore.id.clone(), None, now));
        } else {
            for user_id in &chore.assigned_user_ids {
                let key = RecordKey {
                    user_id: user_id.clone(),
                    chore_id: chore.id.clone(),
                };
                self.independent
                    .entry(key)
                    .or_insert_with(|| UserChoreRecord::new(chore.id.clone(), Some(user_id.clone()), now));
            }
        }
    }

    /// The record governing (user, chore): the per-user record for
    /// INDEPENDENT chores, the single shared record otherwise.
    pub fn record_for_mut(
        &mut self,
        chore: &ChoreDefinition,
        user_id: &str,
    ) -> Option<&mut UserChoreRecord> {
        if chore.is_shared() {
            self.shared.get_mut(&chore.id)
        } else {
            self.independent.get_mut(&RecordKey {
                user_id: user_id.to_string(),
                chore_id: chore.id.clone(),
            })
        }
    }

    pub fn record_for(&self, chore: &ChoreDefinition, user_id: &str) -> Option<&UserChoreRecord> {
        if chore.is_shared() {
            self.shared.get(&chore.id)
        } else {
            self.independent.get(&RecordKey {
                user_id: user_id.to_string(),
                chore_id: chore.id.clone(),
            })
        }
    }

    /// All records belonging to one chore.
    pub fn records_for_chore_mut(&mut self, chore_id: &str) -> Vec<&mut UserChoreRecord> {
        let mut out: Vec<&mut UserChoreRecord> = self
            .independent
            .iter_mut()
            .filter(|(key, _)| key.chore_id == chore_id)
            .map(|(_, r)| r)
            .collect();
        if let Some(shared) = self.shared.get_mut(chore_id) {
            out.push(shared);
        }
        out
    }

    /// Iterate all records mutably (periodic scans).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UserChoreRecord> {
        self.independent.values_mut().chain(self.shared.values_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserChoreRecord> {
        self.independent.values().chain(self.shared.values())
    }

    /// Destroy all records for a chore (chore deleted).
    pub fn remove_chore(&mut self, chore_id: &str) {
        self.independent.retain(|key, _| key.chore_id != chore_id);
        self.shared.remove(chore_id);
    }

    /// Destroy one user's independent record (assignment deleted).
    /// Shared records survive until the chore itself is removed.
    pub fn remove_assignment(&mut self, user_id: &str, chore_id: &str) {
        self.independent.remove(&RecordKey {
            user_id: user_id.to_string(),
            chore_id: chore_id.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.independent.len() + self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.independent.is_empty() && self.shared.is_empty()
    }
}
