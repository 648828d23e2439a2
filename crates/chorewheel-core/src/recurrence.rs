//! Recurrence calculation for chore rescheduling.
//!
//! Pure date math: maps (frequency, applicable days, per-user override,
//! anchor) to the next scheduled occurrence. No state. On-schedule
//! comparison is date-based, not time-based -- any approval before midnight
//! of the scheduled date counts as on time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::chore::{parse_slot, ChoreDefinition, RecurringFrequency};
use crate::error::RecurrenceError;

/// Hard cap on forward walks; a year of daily occurrences plus slack.
/// Hitting it means the configuration cannot produce an occurrence.
pub(crate) const REPLAY_LIMIT: u32 = 400;

/// Recurrence calculator.
///
/// Stateless; carried as a value so the executor and streak calculator
/// share one instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceCalculator;

impl RecurrenceCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Next scheduled occurrence strictly after `anchor`.
    ///
    /// Returns `Ok(None)` for `NONE` frequency (one-off chores are never
    /// rescheduled). The per-user applicable-day override applies when
    /// `user_id` is given and the chore defines one for that user.
    pub fn next_occurrence(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        anchor: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
        match chore.recurring_frequency {
            RecurringFrequency::None => Ok(None),
            RecurringFrequency::Daily | RecurringFrequency::Weekly => {
                let date = self.next_applicable_date(chore, user_id, anchor.date_naive())?;
                Ok(Some(at_time(date, anchor.time())))
            }
            RecurringFrequency::DailyMulti => self.next_slot(chore, user_id, anchor).map(Some),
            RecurringFrequency::Monthly => {
                Ok(Some(at_time(next_month_date(anchor.date_naive()), anchor.time())))
            }
            RecurringFrequency::Custom => {
                let interval = chore.custom_interval_days.ok_or_else(|| {
                    RecurrenceError::NoSchedule {
                        chore_id: chore.id.clone(),
                        message: "CUSTOM frequency without an interval".to_string(),
                    }
                })?;
                let mut date = anchor.date_naive() + Duration::days(interval as i64);
                // Land on the next applicable day at or after the interval.
                let mut steps = 0u32;
                while !chore.is_applicable_day(date, user_id) {
                    date = date.succ_opt().ok_or(RecurrenceError::ReplayOverflow {
                        chore_id: chore.id.clone(),
                        limit: REPLAY_LIMIT,
                    })?;
                    steps += 1;
                    if steps > 7 {
                        return Err(RecurrenceError::NoSchedule {
                            chore_id: chore.id.clone(),
                            message: "no applicable day within a week of the interval".to_string(),
                        });
                    }
                }
                Ok(Some(at_time(date, anchor.time())))
            }
        }
    }

    /// Scheduled occurrence dates strictly after `from` and strictly
    /// before `until`, for schedule-aware streak replay.
    pub fn occurrences_between(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<NaiveDate>, RecurrenceError> {
        let mut dates = Vec::new();
        let mut cursor = from;
        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > REPLAY_LIMIT {
                return Err(RecurrenceError::ReplayOverflow {
                    chore_id: chore.id.clone(),
                    limit: REPLAY_LIMIT,
                });
            }
            match self.next_occurrence(chore, user_id, cursor)? {
                Some(next) if next < until => {
                    // Date-based comparison: multiple DAILY_MULTI slots on
                    // one day collapse into a single scheduled date.
                    let date = next.date_naive();
                    if dates.last() != Some(&date) && date > from.date_naive() {
                        dates.push(date);
                    }
                    cursor = next;
                }
                _ => break,
            }
        }
        Ok(dates)
    }

    /// Whether any scheduled occurrence was skipped between two
    /// completions. Same-date completions never count as a skip.
    pub fn occurrence_skipped(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    ) -> Result<bool, RecurrenceError> {
        if current.date_naive() <= previous.date_naive() {
            return Ok(false);
        }
        let skipped = self
            .occurrences_between(chore, user_id, previous, current)?
            .into_iter()
            .any(|date| date < current.date_naive());
        Ok(skipped)
    }

    /// Next applicable calendar date strictly after `after`.
    fn next_applicable_date(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        after: NaiveDate,
    ) -> Result<NaiveDate, RecurrenceError> {
        let mut date = after;
        for _ in 0..8 {
            date = date.succ_opt().ok_or(RecurrenceError::ReplayOverflow {
                chore_id: chore.id.clone(),
                limit: REPLAY_LIMIT,
            })?;
            if chore.is_applicable_day(date, user_id) {
                return Ok(date);
            }
        }
        Err(RecurrenceError::NoSchedule {
            chore_id: chore.id.clone(),
            message: "no applicable weekday found".to_string(),
        })
    }

    /// First DAILY_MULTI slot strictly after `anchor` on an applicable day.
    fn next_slot(
        &self,
        chore: &ChoreDefinition,
        user_id: Option<&str>,
        anchor: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecurrenceError> {
        let mut slots = Vec::with_capacity(chore.daily_slots.len());
        for raw in &chore.daily_slots {
            let slot = parse_slot(raw).ok_or_else(|| RecurrenceError::MalformedSlot {
                chore_id: chore.id.clone(),
                slot: raw.clone(),
            })?;
            slots.push(slot);
        }
        if slots.is_empty() {
            return Err(RecurrenceError::NoSchedule {
                chore_id: chore.id.clone(),
                message: "DAILY_MULTI without valid slots".to_string(),
            });
        }
        slots.sort();

        let today = anchor.date_naive();
        if chore.is_applicable_day(today, user_id) {
            if let Some(slot) = slots.iter().find(|s| **s > anchor.time()) {
                return Ok(at_time(today, *slot));
            }
        }
        let next_day = self.next_applicable_date(chore, user_id, today)?;
        Ok(at_time(next_day, slots[0]))
    }
}

/// Combine a date and time into a UTC timestamp.
fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Same day-of-month next month, clamped to the month's length.
fn next_month_date(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let mut day = date.day();
    loop {
        if let Some(next) = NaiveDate::from_ymd_opt(year, month, day) {
            return next;
        }
        day -= 1; // Clamp 29/30/31 into shorter months.
    }
}
