//! Reset decision policy.
//!
//! [`decide`] is a side-effect-free function of an explicit
//! [`EvaluationContext`]. Both trigger lanes (approval-time and
//! periodic/midnight) build a context and delegate here; neither lane
//! carries branch logic of its own. The decision table is closed -- it is
//! keyed on (completion criteria, approval reset type, trigger source,
//! overdue handling) and is not user-extensible at runtime.

use serde::{Deserialize, Serialize};

use crate::chore::{
    ApprovalResetType, CompletionCriteria, OverdueHandling, RecurringFrequency,
};
use crate::record::ChoreState;

/// Which lane produced the evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    /// Synchronous claim/approve/disapprove action.
    Approval,
    /// Recurring timer scan.
    PeriodicScan,
    /// Dedicated midnight-boundary pass.
    MidnightBoundary,
}

/// Relation of "now" to the record's due date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DueRelation {
    BeforeDue,
    AtDue,
    PastDue,
}

/// Immutable input to the decision policy. Built per evaluation by the
/// lifecycle manager; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationContext {
    pub trigger_source: TriggerSource,
    pub completion_criteria: CompletionCriteria,
    pub state: ChoreState,
    /// A claim is outstanding (CLAIMED, or SHARED_FIRST lockout held).
    pub has_pending_claim: bool,
    /// `None` when the record has no due date.
    pub due_relation: Option<DueRelation>,
    pub overdue_handling: OverdueHandling,
    pub approval_reset_type: ApprovalResetType,
    pub recurring_frequency: RecurringFrequency,
    /// SHARED only: every assigned user approved in the current period.
    pub all_approved: bool,
    /// An explicit administrative reset/skip/set-due request.
    pub admin_request: bool,
}

/// Output of the policy; input to the executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetDecision {
    /// No transition now.
    Hold,
    /// Return to PENDING without touching the due date.
    ResetOnly,
    /// Return to PENDING and compute the next occurrence.
    ResetAndReschedule,
    /// Approve an unclaimed record, then reset.
    AutoApprovePending,
}

/// Map an evaluation context to a reset decision.
pub fn decide(ctx: &EvaluationContext) -> ResetDecision {
    // Administrative requests override the table: explicit reset/skip/set-due
    // always resets and reschedules, including the due-date reset types
    // that are otherwise manual-only.
    if ctx.admin_request {
        return ResetDecision::ResetAndReschedule;
    }

    // Boundary crossing of an unclaimed, past-due record under an
    // auto-resolving overdue policy, regardless of reset type.
    if ctx.overdue_handling == OverdueHandling::AutoApproveIfUnclaimed
        && ctx.trigger_source == TriggerSource::MidnightBoundary
        && ctx.state == ChoreState::Pending
        && !ctx.has_pending_claim
        && ctx.due_relation == Some(DueRelation::PastDue)
    {
        return ResetDecision::AutoApprovePending;
    }

    // A MISSED record cycles at the boundary regardless of reset type;
    // holding it would dead-end recurring chores.
    if ctx.state == ChoreState::Missed && ctx.trigger_source == TriggerSource::MidnightBoundary {
        return if ctx.recurring_frequency == RecurringFrequency::None {
            ResetDecision::ResetOnly
        } else {
            ResetDecision::ResetAndReschedule
        };
    }

    match ctx.approval_reset_type {
        ApprovalResetType::UponCompletion => decide_upon_completion(ctx),

        ApprovalResetType::AtMidnightOnce | ApprovalResetType::AtMidnightMulti => {
            // A NONE-frequency chore still participates here because its
            // reset type is a midnight variant; any other NONE-frequency
            // chore never reaches the midnight path at all.
            if ctx.trigger_source != TriggerSource::MidnightBoundary {
                return ResetDecision::Hold;
            }
            if ctx.recurring_frequency == RecurringFrequency::None {
                ResetDecision::ResetOnly
            } else {
                ResetDecision::ResetAndReschedule
            }
        }

        // Manual-only by design: no timer-driven auto-reset for due-date
        // reset types. Admin requests are handled above.
        ApprovalResetType::AtDueDateOnce | ApprovalResetType::AtDueDateMulti => ResetDecision::Hold,
    }
}

fn decide_upon_completion(ctx: &EvaluationContext) -> ResetDecision {
    if ctx.trigger_source != TriggerSource::Approval || ctx.state != ChoreState::Approved {
        return ResetDecision::Hold;
    }
    match ctx.completion_criteria {
        // Reset only the approving user's record.
        CompletionCriteria::Independent => ResetDecision::ResetAndReschedule,
        // Hold until the approval that completes the set. Approval flags
        // are cleared only by the executor after this check; clearing them
        // first would strand the chore in a never-all-approved cycle.
        CompletionCriteria::Shared => {
            if ctx.all_approved {
                ResetDecision::ResetAndReschedule
            } else {
                ResetDecision::Hold
            }
        }
        // One claimer completes for everyone.
        CompletionCriteria::SharedFirst => ResetDecision::ResetAndReschedule,
    }
}
