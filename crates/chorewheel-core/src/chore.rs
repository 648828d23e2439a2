//! Chore definitions and configuration-time validation.
//!
//! A [`ChoreDefinition`] is owned by the configuration layer and read-only
//! to the engine. Unsupported combinations (e.g. a shared chore with
//! per-user applicable-day overrides) are rejected here by [`ChoreDefinition::validate`]
//! and never reach the decision policy.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How multiple assigned users interact on one chore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionCriteria {
    /// Separate per-user state; each user completes on their own.
    Independent,
    /// One shared state; the chore completes when all assigned users approved.
    Shared,
    /// One shared state; the first claimer locks out the others.
    SharedFirst,
}

impl Default for CompletionCriteria {
    fn default() -> Self {
        CompletionCriteria::Independent
    }
}

/// When an approved chore returns to pending and reschedules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalResetType {
    /// Reset at the midnight boundary; one approval per period.
    AtMidnightOnce,
    /// Reset at the midnight boundary; multiple approvals allowed per period.
    AtMidnightMulti,
    /// Manual-only reset anchored on the due date; one approval per period.
    AtDueDateOnce,
    /// Manual-only reset anchored on the due date; multiple approvals allowed.
    AtDueDateMulti,
    /// Reset immediately when the completion is approved.
    UponCompletion,
}

/// Recurrence frequency for rescheduling after a reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurringFrequency {
    /// One-off chore; never rescheduled.
    None,
    /// Once per applicable day.
    Daily,
    /// Multiple time slots per applicable day (see `daily_slots`).
    DailyMulti,
    /// Once per week on the applicable weekday(s).
    Weekly,
    /// Once per month on the anchor's day-of-month.
    Monthly,
    /// Every `custom_interval_days` days.
    Custom,
}

impl Default for RecurringFrequency {
    fn default() -> Self {
        RecurringFrequency::None
    }
}

/// What happens when a due-date boundary is crossed without completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverdueHandling {
    /// Transition to OVERDUE at the boundary and stay there until acted on.
    Standard,
    /// Due date is displayed but never triggers an overdue transition.
    NeverOverdue,
    /// OVERDUE at the boundary, then MISSED at the next midnight pass.
    MissAtBoundary,
    /// Unclaimed chores are auto-approved when the boundary is crossed.
    AutoApproveIfUnclaimed,
}

impl Default for OverdueHandling {
    fn default() -> Self {
        OverdueHandling::Standard
    }
}

/// A chore as configured by the household.
///
/// Read-only to the engine; mutated only by the configuration surface.
/// Weekday indices follow 0=Sun .. 6=Sat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoreDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub completion_criteria: CompletionCriteria,
    pub approval_reset_type: ApprovalResetType,
    #[serde(default)]
    pub recurring_frequency: RecurringFrequency,
    #[serde(default)]
    pub overdue_handling: OverdueHandling,
    /// Global applicable weekdays. Empty means every day.
    #[serde(default)]
    pub applicable_days: Vec<u8>,
    /// Per-user applicable-day overrides. Only valid for INDEPENDENT chores.
    #[serde(default)]
    pub per_user_applicable_days: HashMap<String, Vec<u8>>,
    /// Ordered HH:mm slots for DAILY_MULTI.
    #[serde(default)]
    pub daily_slots: Vec<String>,
    /// Interval in days for CUSTOM frequency.
    #[serde(default)]
    pub custom_interval_days: Option<u32>,
    /// Minutes before the due date at which the due window opens.
    #[serde(default)]
    pub due_window_offset_minutes: i64,
    /// Minutes before the due date at which the reminder fires.
    #[serde(default)]
    pub due_reminder_offset_minutes: i64,
    /// Points awarded per approved completion.
    #[serde(default)]
    pub points: i64,
    pub assigned_user_ids: Vec<String>,
}

impl ChoreDefinition {
    /// Validate the definition at configuration time.
    ///
    /// Rejections here are final: an invalid definition is never handed to
    /// the decision policy or the executor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assigned_user_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "assigned_user_ids".to_string(),
                message: format!("chore '{}' has no assigned users", self.id),
            });
        }

        if self.completion_criteria != CompletionCriteria::Independent
            && !self.per_user_applicable_days.is_empty()
        {
            return Err(ConfigError::UnsupportedCombination {
                chore_id: self.id.clone(),
                message: "per-user applicable-day overrides require INDEPENDENT criteria"
                    .to_string(),
            });
        }

        for day in self.all_weekday_indices() {
            if day > 6 {
                return Err(ConfigError::InvalidValue {
                    key: "applicable_days".to_string(),
                    message: format!("weekday index {day} out of range (0=Sun .. 6=Sat)"),
                });
            }
        }

        match self.recurring_frequency {
            RecurringFrequency::DailyMulti => {
                if self.daily_slots.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "daily_slots".to_string(),
                        message: format!("chore '{}' is DAILY_MULTI but has no slots", self.id),
                    });
                }
                for slot in &self.daily_slots {
                    if parse_slot(slot).is_none() {
                        return Err(ConfigError::InvalidValue {
                            key: "daily_slots".to_string(),
                            message: format!("slot '{slot}' is not a valid HH:mm time"),
                        });
                    }
                }
            }
            RecurringFrequency::Custom => match self.custom_interval_days {
                None | Some(0) => {
                    return Err(ConfigError::InvalidValue {
                        key: "custom_interval_days".to_string(),
                        message: format!(
                            "chore '{}' is CUSTOM but has no positive interval",
                            self.id
                        ),
                    });
                }
                Some(_) => {}
            },
            RecurringFrequency::Weekly => {
                if self.applicable_days.is_empty() && self.per_user_applicable_days.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "applicable_days".to_string(),
                        message: format!(
                            "chore '{}' is WEEKLY but has no applicable days",
                            self.id
                        ),
                    });
                }
            }
            _ => {}
        }

        if self.due_window_offset_minutes < 0 || self.due_reminder_offset_minutes < 0 {
            return Err(ConfigError::InvalidValue {
                key: "due_window_offset_minutes".to_string(),
                message: "due offsets must be non-negative".to_string(),
            });
        }

        Ok(())
    }

    /// Applicable weekdays for one user, honoring the per-user override.
    pub fn applicable_days_for(&self, user_id: Option<&str>) -> &[u8] {
        if let Some(user_id) = user_id {
            if let Some(days) = self.per_user_applicable_days.get(user_id) {
                return days;
            }
        }
        &self.applicable_days
    }

    /// Whether `date` is an applicable day for `user_id`.
    /// An empty day set means every day is applicable.
    pub fn is_applicable_day(&self, date: NaiveDate, user_id: Option<&str>) -> bool {
        let days = self.applicable_days_for(user_id);
        days.is_empty() || days.contains(&weekday_index(date))
    }

    /// Whether the chore uses one shared record for all assigned users.
    pub fn is_shared(&self) -> bool {
        matches!(
            self.completion_criteria,
            CompletionCriteria::Shared | CompletionCriteria::SharedFirst
        )
    }

    fn all_weekday_indices(&self) -> Vec<u8> {
        let mut all = self.applicable_days.clone();
        for days in self.per_user_applicable_days.values() {
            all.extend_from_slice(days);
        }
        all
    }
}

/// Weekday index for a date, 0=Sun .. 6=Sat.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parse an HH:mm slot string.
pub fn parse_slot(slot: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(slot, "%H:%M").ok()
}
