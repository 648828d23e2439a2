//! Streak bookkeeping for completions and misses.
//!
//! Pure functions over values owned by the record layer: prior streak in,
//! updated streak out. The completion streak is schedule-aware (the
//! recurrence calculator is replayed between the two completion dates);
//! the missed streak is a plain event count. Values are never derived from
//! the prunable daily snapshot buckets.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::chore::ChoreDefinition;
use crate::recurrence::RecurrenceCalculator;

/// Streak calculator.
///
/// `grace` is the early-completion grace window: a completion at most this
/// far before a scheduled occurrence is credited to that occurrence. The
/// threshold is deliberately a configuration input, not a constant; the
/// default of zero ignores early completions.
#[derive(Debug, Clone, Copy)]
pub struct StreakCalculator {
    recurrence: RecurrenceCalculator,
    grace: Duration,
}

impl StreakCalculator {
    /// Create a calculator with no early-completion grace.
    pub fn new(recurrence: RecurrenceCalculator) -> Self {
        Self {
            recurrence,
            grace: Duration::zero(),
        }
    }

    /// Create with an explicit grace window.
    pub fn with_grace(recurrence: RecurrenceCalculator, grace: Duration) -> Self {
        Self { recurrence, grace }
    }

    /// Updated completion streak for a qualifying completion.
    ///
    /// Increments when no scheduled occurrence was skipped since the prior
    /// completion, resets to 1 otherwise. First completion is 1. A failed
    /// schedule-awareness computation must not penalize the user: the
    /// fallback is increment, with a warning.
    pub fn on_completion(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        prior_streak: u32,
        last_approved: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    ) -> u32 {
        let previous = match last_approved {
            Some(previous) => previous,
            None => return 1,
        };

        // Credit an early completion inside the grace window to the
        // upcoming occurrence by extending the covered range.
        let covered_until = completed_at + self.grace;

        match self
            .recurrence
            .occurrence_skipped(chore, user_id, previous, covered_until)
        {
            Ok(true) => 1,
            Ok(false) => prior_streak.saturating_add(1),
            Err(err) => {
                warn!(
                    chore_id = %chore.id,
                    error = %err,
                    "schedule-awareness check failed; incrementing streak"
                );
                prior_streak.saturating_add(1)
            }
        }
    }

    /// Updated missed streak after a detected miss: +1, always.
    pub fn on_miss(&self, prior_missed_streak: u32) -> u32 {
        prior_missed_streak.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chore::{ApprovalResetType, CompletionCriteria, RecurringFrequency};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn weekly_chore() -> ChoreDefinition {
        ChoreDefinition {
            id: "bins".to_string(),
            name: "Take out the bins".to_string(),
            completion_criteria: CompletionCriteria::Independent,
            approval_reset_type: ApprovalResetType::UponCompletion,
            recurring_frequency: RecurringFrequency::Weekly,
            overdue_handling: Default::default(),
            applicable_days: vec![1], // Mondays
            per_user_applicable_days: HashMap::new(),
            daily_slots: vec![],
            custom_interval_days: None,
            due_window_offset_minutes: 0,
            due_reminder_offset_minutes: 0,
            points: 0,
            assigned_user_ids: vec!["alice".to_string()],
        }
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn calc() -> StreakCalculator {
        StreakCalculator::new(RecurrenceCalculator::new())
    }

    #[test]
    fn first_completion_starts_at_one() {
        let streak = calc().on_completion(&weekly_chore(), None, 0, None, ts(2026, 8, 31, 10));
        assert_eq!(streak, 1);
    }

    #[test]
    fn consecutive_weeks_increment() {
        let streak = calc().on_completion(
            &weekly_chore(),
            None,
            2,
            Some(ts(2026, 8, 31, 10)),
            ts(2026, 9, 7, 20),
        );
        assert_eq!(streak, 3);
    }

    #[test]
    fn skipped_week_resets_to_one() {
        let streak = calc().on_completion(
            &weekly_chore(),
            None,
            4,
            Some(ts(2026, 8, 31, 10)),
            ts(2026, 9, 14, 10),
        );
        assert_eq!(streak, 1);
    }

    #[test]
    fn late_same_date_completion_is_on_time() {
        // Approval at 23:00 of the scheduled Monday still counts.
        let streak = calc().on_completion(
            &weekly_chore(),
            None,
            1,
            Some(ts(2026, 8, 31, 10)),
            ts(2026, 9, 7, 23),
        );
        assert_eq!(streak, 2);
    }

    #[test]
    fn malformed_recurrence_falls_back_to_increment() {
        let mut chore = weekly_chore();
        // CUSTOM without an interval makes the replay fail.
        chore.recurring_frequency = RecurringFrequency::Custom;
        chore.custom_interval_days = None;
        let streak = calc().on_completion(
            &chore,
            None,
            5,
            Some(ts(2026, 8, 31, 10)),
            ts(2026, 9, 14, 10),
        );
        assert_eq!(streak, 6);
    }

    #[test]
    fn grace_window_credits_early_completion() {
        // Completing Sunday evening, 12h before the Monday occurrence.
        let with_grace =
            StreakCalculator::with_grace(RecurrenceCalculator::new(), Duration::hours(24));
        let streak = with_grace.on_completion(
            &weekly_chore(),
            None,
            1,
            Some(ts(2026, 8, 31, 10)),
            ts(2026, 9, 6, 20),
        );
        assert_eq!(streak, 2);
    }

    #[test]
    fn missed_streak_is_a_plain_count() {
        let calc = calc();
        assert_eq!(calc.on_miss(0), 1);
        assert_eq!(calc.on_miss(1), 2);
        assert_eq!(calc.on_miss(u32::MAX), u32::MAX);
    }
}
