//! Reset executor: applies a reset decision against the live record set.
//!
//! The executor is the only component that mutates records for resets. It
//! transitions state, clears claim ownership, reschedules via the
//! recurrence calculator (once per distinct chore, never once per assigned
//! user), and routes every completion or miss through the streak
//! calculator before finalization. It does not persist -- the lifecycle
//! manager guarantees the persistence attempt on every exit path.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::chore::{ChoreDefinition, CompletionCriteria, RecurringFrequency};
use crate::error::{RecurrenceError, Result};
use crate::events::{CompletionEvent, EventType, MissEvent, NotificationEvent, RecipientRole};
use crate::policy::{EvaluationContext, ResetDecision};
use crate::record::{ChoreState, UserChoreRecord};
use crate::recurrence::RecurrenceCalculator;
use crate::streak::StreakCalculator;

/// Everything a single `apply` produced, for the lifecycle manager to
/// dispatch to collaborators after the mutation has landed in memory.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub rescheduled: bool,
    pub notifications: Vec<NotificationEvent>,
    pub completions: Vec<CompletionEvent>,
    pub misses: Vec<MissEvent>,
    /// Point awards owed for auto-approved completions.
    pub awards: Vec<(String, i64)>,
}

/// Stateful applier of reset decisions.
#[derive(Debug, Clone, Copy)]
pub struct ResetExecutor {
    recurrence: RecurrenceCalculator,
    streaks: StreakCalculator,
}

impl ResetExecutor {
    pub fn new(early_completion_grace: Duration) -> Self {
        let recurrence = RecurrenceCalculator::new();
        Self {
            recurrence,
            streaks: StreakCalculator::with_grace(recurrence, early_completion_grace),
        }
    }

    /// Apply `decision` to `record`.
    ///
    /// Fails atomically for this record: the next due date is computed
    /// before any mutation, so an `Err` means the record is untouched and
    /// no event was produced. For SHARED chores the single shared record
    /// makes the reset atomic across all assigned users.
    pub fn apply(
        &self,
        chore: &ChoreDefinition,
        record: &mut UserChoreRecord,
        ctx: &EvaluationContext,
        decision: ResetDecision,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        match decision {
            ResetDecision::Hold => {}
            ResetDecision::ResetOnly => {
                self.reset_record(chore, record, now, &mut outcome)?;
            }
            ResetDecision::ResetAndReschedule => {
                let next = self.next_due(chore, record, now)?;
                self.reset_record(chore, record, now, &mut outcome)?;
                record.due_date = next;
                outcome.rescheduled = true;
            }
            ResetDecision::AutoApprovePending => {
                // Approve without an explicit approval action, then the
                // same reset logic as a normal reset.
                let next = if chore.recurring_frequency != RecurringFrequency::None {
                    Some(self.next_due(chore, record, now)?)
                } else {
                    None
                };
                record.transition(ChoreState::Approved)?;
                for event in self.record_completion(chore, record, now) {
                    outcome.awards.push((event.user_id.clone(), chore.points));
                    outcome.completions.push(event);
                }
                self.reset_record(chore, record, now, &mut outcome)?;
                if let Some(next) = next {
                    record.due_date = next;
                    outcome.rescheduled = true;
                }
            }
        }
        debug!(
            chore_id = %chore.id,
            ?decision,
            trigger = ?ctx.trigger_source,
            rescheduled = outcome.rescheduled,
            "reset decision applied"
        );
        Ok(outcome)
    }

    /// Streak and bucket bookkeeping for a qualifying completion.
    ///
    /// Called by the approval entry point for the approval that completes
    /// the period, and internally for auto-approvals. Returns one
    /// completion event per affected user, carrying the updated streak.
    pub fn record_completion(
        &self,
        chore: &ChoreDefinition,
        record: &mut UserChoreRecord,
        now: DateTime<Utc>,
    ) -> Vec<CompletionEvent> {
        let previous = record.last_approved;
        let streak_user = record.user_id.clone();
        let streak = self.streaks.on_completion(
            chore,
            streak_user.as_deref(),
            record.current_streak,
            previous,
            now,
        );

        record.current_streak = streak;
        record.current_missed_streak = 0;
        record.last_approved = Some(now);
        record.all_time_bucket.observe_streak(streak);
        record.write_daily_snapshot(now.date_naive());

        self.affected_users(chore, record)
            .into_iter()
            .map(|user_id| CompletionEvent {
                user_id,
                chore_id: chore.id.clone(),
                current_streak: record.current_streak,
                longest_streak: record.all_time_bucket.longest_streak,
                at: now,
            })
            .collect()
    }

    /// Streak and bucket bookkeeping for a detected miss; transitions the
    /// record OVERDUE -> MISSED.
    pub fn record_miss(
        &self,
        chore: &ChoreDefinition,
        record: &mut UserChoreRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<MissEvent>> {
        record.transition(ChoreState::Missed)?;
        let missed = self.streaks.on_miss(record.current_missed_streak);
        record.current_missed_streak = missed;
        record.last_missed = Some(now);
        record.all_time_bucket.observe_missed_streak(missed);
        record.write_daily_snapshot(now.date_naive());

        Ok(self
            .affected_users(chore, record)
            .into_iter()
            .map(|user_id| MissEvent {
                user_id,
                chore_id: chore.id.clone(),
                current_missed_streak: record.current_missed_streak,
                missed_longest_streak: record.all_time_bucket.missed_longest_streak,
                at: now,
            })
            .collect())
    }

    /// Return the record to PENDING and start a fresh approval period.
    fn reset_record(
        &self,
        chore: &ChoreDefinition,
        record: &mut UserChoreRecord,
        now: DateTime<Utc>,
        outcome: &mut ApplyOutcome,
    ) -> Result<()> {
        record.transition(ChoreState::Pending)?;
        record.claimed_by = None;
        record.is_approved_in_current_period = false;
        record.approved_user_ids.clear();
        record.approval_period_start = now;
        record.notifications.clear();

        for user_id in self.affected_users(chore, record) {
            outcome.notifications.push(NotificationEvent::new(
                EventType::Reset,
                user_id,
                chore.id.clone(),
                record.due_date,
                RecipientRole::Member,
            ));
        }
        Ok(())
    }

    /// Compute the next due date without touching the record. Invoked once
    /// per distinct chore record; the single due-date write covers all
    /// assigned users of a shared chore.
    fn next_due(
        &self,
        chore: &ChoreDefinition,
        record: &UserChoreRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        // Anchor on the previous due date to keep the scheduled
        // time-of-day stable; walk forward past "now" in case several
        // periods elapsed without a reset.
        let anchor = record.due_date.unwrap_or(now);
        match self.walk_past(chore, record, anchor, now) {
            Ok(next) => Ok(next),
            Err(RecurrenceError::ReplayOverflow { .. }) => {
                // A record idle longer than the replay cap would overflow
                // on every pass; restart the walk from the current day.
                warn!(
                    chore_id = %chore.id,
                    anchor = %anchor,
                    "stored due date too stale to replay; restarting from now"
                );
                Ok(self.walk_past(chore, record, now, now)?)
            }
            Err(err) => {
                warn!(chore_id = %chore.id, error = %err, "reschedule failed");
                Err(err.into())
            }
        }
    }

    /// First occurrence strictly after both `anchor` and `now`.
    fn walk_past(
        &self,
        chore: &ChoreDefinition,
        record: &UserChoreRecord,
        mut anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
        for _ in 0..crate::recurrence::REPLAY_LIMIT {
            match self
                .recurrence
                .next_occurrence(chore, record.user_id.as_deref(), anchor)?
            {
                Some(next) if next <= now => anchor = next,
                next => return Ok(next),
            }
        }
        Err(RecurrenceError::ReplayOverflow {
            chore_id: chore.id.clone(),
            limit: crate::recurrence::REPLAY_LIMIT,
        })
    }

    /// Users a mutation of this record affects: the owner for independent
    /// records, every assigned user for the shared instance.
    fn affected_users(&self, chore: &ChoreDefinition, record: &UserChoreRecord) -> Vec<String> {
        match &record.user_id {
            Some(user_id) => vec![user_id.clone()],
            None => chore.assigned_user_ids.clone(),
        }
    }

    pub fn streaks(&self) -> &StreakCalculator {
        &self.streaks
    }

    pub fn recurrence(&self) -> &RecurrenceCalculator {
        &self.recurrence
    }
}
