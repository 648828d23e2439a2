//! Lifecycle manager: the two trigger lanes and everything between them.
//!
//! The manager owns the record store and the collaborator sinks. An
//! approval action (claim/approve/disapprove) enters synchronously and
//! persists before returning; the periodic lane enters through [`LifecycleManager::tick`]
//! and [`LifecycleManager::midnight_pass`]. Both lanes build an
//! [`EvaluationContext`] per affected (user, chore) pair and delegate to
//! the same pure decision policy -- no lane carries branch logic of its
//! own.
//!
//! Persistence is guaranteed-attempt: every mutating operation funnels
//! through [`LifecycleManager::finalize`], which saves the full record
//! tree with retry/backoff on success and failure paths alike. A failed
//! save keeps the tree dirty; the mutation is never discarded.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::chore::{
    ApprovalResetType, ChoreDefinition, CompletionCriteria, OverdueHandling, RecurringFrequency,
};
use crate::config::EngineConfig;
use crate::error::{CoreError, Result, TransitionError};
use crate::events::{
    EventType, GamificationSink, NotificationEvent, NotificationSink, NullSink, PointsLedger,
    RecipientRole,
};
use crate::executor::{ApplyOutcome, ResetExecutor};
use crate::locks::{LockKey, LockRegistry};
use crate::policy::{decide, DueRelation, EvaluationContext, ResetDecision, TriggerSource};
use crate::record::{ChoreState, RecordStore, UserChoreRecord};
use crate::storage::{persist_with_retry, Persistence};

/// Owner of the record store and both trigger lanes.
///
/// Initialize at startup (loads the full record tree), flush on shutdown.
pub struct LifecycleManager<P: Persistence> {
    chores: HashMap<String, ChoreDefinition>,
    store: RecordStore,
    locks: LockRegistry,
    persistence: P,
    config: EngineConfig,
    executor: ResetExecutor,
    notifications: Box<dyn NotificationSink>,
    points: Box<dyn PointsLedger>,
    gamification: Box<dyn GamificationSink>,
    /// In-memory mutations not yet saved.
    dirty: bool,
}

impl<P: Persistence> LifecycleManager<P> {
    /// Create a manager, loading the record tree from `persistence`.
    pub fn new(persistence: P, config: EngineConfig) -> Result<Self> {
        let tree = persistence.load()?;
        let grace = Duration::minutes(config.early_completion_grace_minutes);
        Ok(Self {
            chores: HashMap::new(),
            store: RecordStore::from_tree(tree),
            locks: LockRegistry::new(),
            persistence,
            executor: ResetExecutor::new(grace),
            config,
            notifications: Box::new(NullSink),
            points: Box::new(NullSink),
            gamification: Box::new(NullSink),
            dirty: false,
        })
    }

    pub fn set_notifications(&mut self, sink: Box<dyn NotificationSink>) {
        self.notifications = sink;
    }

    pub fn set_points(&mut self, ledger: Box<dyn PointsLedger>) {
        self.points = ledger;
    }

    pub fn set_gamification(&mut self, sink: Box<dyn GamificationSink>) {
        self.gamification = sink;
    }

    // ── Chore management ─────────────────────────────────────────────

    /// Register a chore and create records for its assignments.
    ///
    /// Validation happens here, at configuration time; an invalid
    /// definition never reaches the decision policy.
    pub fn add_chore(&mut self, chore: ChoreDefinition, now: DateTime<Utc>) -> Result<()> {
        chore.validate()?;
        self.store.ensure_assigned(&chore, now);

        // Give fresh records their first due date.
        if chore.recurring_frequency != RecurringFrequency::None {
            let recurrence = *self.executor.recurrence();
            for record in self.store.records_for_chore_mut(&chore.id) {
                if record.due_date.is_none() {
                    record.due_date =
                        recurrence.next_occurrence(&chore, record.user_id.as_deref(), now)?;
                }
            }
        }

        self.chores.insert(chore.id.clone(), chore);
        self.dirty = true;
        self.finalize()
    }

    /// Destroy a chore and all of its records.
    pub fn remove_chore(&mut self, chore_id: &str) -> Result<()> {
        self.chores.remove(chore_id);
        self.store.remove_chore(chore_id);
        self.dirty = true;
        self.finalize()
    }

    /// Destroy one user's record for an independent chore.
    pub fn remove_assignment(&mut self, user_id: &str, chore_id: &str) -> Result<()> {
        self.store.remove_assignment(user_id, chore_id);
        self.dirty = true;
        self.finalize()
    }

    pub fn chore(&self, chore_id: &str) -> Option<&ChoreDefinition> {
        self.chores.get(chore_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The record governing (user, chore), for display layers.
    pub fn record(&self, chore_id: &str, user_id: &str) -> Option<&UserChoreRecord> {
        let chore = self.chores.get(chore_id)?;
        self.store.record_for(chore, user_id)
    }

    // ── Approval lane ────────────────────────────────────────────────

    /// Claim a chore. Synchronous; persisted before returning.
    pub fn claim(&mut self, user_id: &str, chore_id: &str, now: DateTime<Utc>) -> Result<()> {
        let chore = self.lookup(chore_id, user_id)?;
        let _lock = self.locks.try_acquire(&LockKey::for_chore(&chore, user_id))?;

        let record = self
            .store
            .record_for_mut(&chore, user_id)
            .ok_or_else(|| record_not_found(user_id, chore_id))?;

        // SHARED_FIRST lockout: one live claim blocks the rest until the
        // record returns to PENDING.
        if let Some(claimed_by) = &record.claimed_by {
            if claimed_by != user_id {
                return Err(TransitionError::ClaimBlocked {
                    chore_id: chore_id.to_string(),
                    claimed_by: claimed_by.clone(),
                }
                .into());
            }
        }

        record.transition(ChoreState::Claimed)?;
        record.claimed_by = Some(user_id.to_string());
        record.last_claimed = Some(now);
        self.dirty = true;
        self.finalize()
    }

    /// Approve a claimed completion. Synchronous; persisted before
    /// returning. Awards points, updates streaks, and feeds the result
    /// through the decision policy on the approval trigger.
    pub fn approve(&mut self, user_id: &str, chore_id: &str, now: DateTime<Utc>) -> Result<()> {
        let chore = self.lookup(chore_id, user_id)?;
        let lock = self.locks.try_acquire(&LockKey::for_chore(&chore, user_id))?;

        let result = self.approve_inner(&chore, user_id, now);
        drop(lock);

        // Targeted O(1) rescan of just this chore; the approval already
        // names it, so no full sweep is needed.
        let rescan = self.scan_chore(chore_id, now, TriggerSource::PeriodicScan);
        let persisted = self.finalize();
        result.and(rescan).and(persisted)
    }

    fn approve_inner(
        &mut self,
        chore: &ChoreDefinition,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = self
            .store
            .record_for_mut(chore, user_id)
            .ok_or_else(|| record_not_found(user_id, &chore.id))?;

        let once_type = matches!(
            chore.approval_reset_type,
            ApprovalResetType::AtMidnightOnce | ApprovalResetType::AtDueDateOnce
        );
        if once_type && record.is_approved_in_current_period {
            return Err(TransitionError::AlreadyApproved {
                user_id: user_id.to_string(),
                chore_id: chore.id.clone(),
            }
            .into());
        }
        if chore.completion_criteria == CompletionCriteria::Shared
            && record.approved_user_ids.contains(user_id)
        {
            return Err(TransitionError::AlreadyApproved {
                user_id: user_id.to_string(),
                chore_id: chore.id.clone(),
            }
            .into());
        }
        if record.state != ChoreState::Claimed || record.claimed_by.as_deref() != Some(user_id) {
            return Err(TransitionError::NotAllowed {
                from: record.state,
                to: ChoreState::Approved,
            }
            .into());
        }

        record.approved_user_ids.insert(user_id.to_string());

        // A SHARED approval only completes the period once the set is
        // full; until then the record cycles back to PENDING for the
        // remaining users. Approval flags are cleared exclusively by the
        // executor after the all-approved check.
        let completes_period = match chore.completion_criteria {
            CompletionCriteria::Shared => record.all_approved(&chore.assigned_user_ids),
            CompletionCriteria::Independent | CompletionCriteria::SharedFirst => true,
        };

        let mut completions = Vec::new();
        if completes_period {
            record.transition(ChoreState::Approved)?;
            record.is_approved_in_current_period = true;
            completions = self.executor.record_completion(chore, record, now);
        } else {
            record.transition(ChoreState::Pending)?;
            record.claimed_by = None;
        }
        self.dirty = true;

        // The approving user earns the points for their own approval.
        self.points.award(user_id, &chore.id, chore.points);
        for event in &completions {
            self.gamification.completion(event);
        }

        let record = self
            .store
            .record_for_mut(chore, user_id)
            .ok_or_else(|| record_not_found(user_id, &chore.id))?;
        let ctx = build_context(chore, record, TriggerSource::Approval, now, false);
        let decision = decide(&ctx);
        let outcome = self.executor.apply(chore, record, &ctx, decision, now)?;

        // MULTI reset types allow repeat completions inside one period:
        // hand the record straight back while the period flags stand. The
        // approval set starts a fresh round too, so a SHARED chore can
        // complete more than once before the boundary; this runs only
        // after the all-approved check above has already been taken.
        if decision == ResetDecision::Hold
            && matches!(
                chore.approval_reset_type,
                ApprovalResetType::AtMidnightMulti | ApprovalResetType::AtDueDateMulti
            )
            && record.state == ChoreState::Approved
        {
            record.transition(ChoreState::Pending)?;
            record.claimed_by = None;
            record.approved_user_ids.clear();
        }

        self.dispatch(&chore.id, outcome);
        Ok(())
    }

    /// Disapprove an outstanding claim or a previously approved
    /// completion. Unblocks SHARED_FIRST lockouts immediately.
    pub fn disapprove(&mut self, user_id: &str, chore_id: &str, now: DateTime<Utc>) -> Result<()> {
        let chore = self.lookup(chore_id, user_id)?;
        let lock = self.locks.try_acquire(&LockKey::for_chore(&chore, user_id))?;

        let result = self.disapprove_inner(&chore, user_id, now);
        drop(lock);
        let persisted = self.finalize();
        result.and(persisted)
    }

    fn disapprove_inner(
        &mut self,
        chore: &ChoreDefinition,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = self
            .store
            .record_for_mut(chore, user_id)
            .ok_or_else(|| record_not_found(user_id, &chore.id))?;

        let had_claim =
            record.state == ChoreState::Claimed && record.claimed_by.as_deref() == Some(user_id);
        let had_approval = record.approved_user_ids.contains(user_id);

        if !had_claim && !had_approval {
            return Err(TransitionError::NothingToDisapprove {
                user_id: user_id.to_string(),
                chore_id: chore.id.clone(),
            }
            .into());
        }

        if had_claim {
            record.transition(ChoreState::Pending)?;
            record.claimed_by = None;
        }
        if had_approval {
            record.approved_user_ids.remove(user_id);
            if record.state == ChoreState::Approved {
                record.transition(ChoreState::Pending)?;
            }
            record.is_approved_in_current_period = false;
        }
        record.last_disapproved = Some(now);
        self.dirty = true;

        if had_approval {
            // Reverse the award for the undone completion.
            self.points.reverse(user_id, &chore.id, chore.points);
        }
        Ok(())
    }

    // ── Periodic/boundary lane ───────────────────────────────────────

    /// Periodic scan tick. Batches evaluation across all (user, chore)
    /// pairs; item failures are logged and do not abort the batch, and
    /// the persistence attempt runs regardless.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let result = self.scan_all(now, TriggerSource::PeriodicScan);
        let persisted = self.finalize();
        result.and(persisted)
    }

    /// Dedicated midnight-boundary pass: miss detection, auto-approvals,
    /// midnight resets, and snapshot retention pruning.
    pub fn midnight_pass(&mut self, now: DateTime<Utc>) -> Result<()> {
        let result = self.midnight_inner(now);
        let persisted = self.finalize();
        result.and(persisted)
    }

    fn midnight_inner(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut first_err: Option<CoreError> = None;
        let chores: Vec<ChoreDefinition> = self.chores.values().cloned().collect();

        for chore in &chores {
            // Misses first: records already OVERDUE at this boundary go
            // to MISSED before newly late records become OVERDUE.
            if let Err(err) = self.detect_misses(chore, now) {
                warn!(chore_id = %chore.id, error = %err, "miss detection failed");
                first_err.get_or_insert(err);
            }
            if let Err(err) = self.scan_chore(&chore.id, now, TriggerSource::MidnightBoundary) {
                warn!(chore_id = %chore.id, error = %err, "midnight scan failed");
                first_err.get_or_insert(err);
            }
        }

        // Retention pruning. Never touches streak fields or the all-time
        // bucket.
        let retention = self.config.snapshot_retention_days;
        let today = now.date_naive();
        for record in self.store.iter_mut() {
            record.prune_snapshots(today, retention);
        }
        self.dirty = true;

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Transition OVERDUE records to MISSED where the overdue policy says
    /// so. The midnight scan that follows cycles MISSED records back to
    /// PENDING through the decision policy, so a missed recurring chore
    /// never sticks in MISSED.
    ///
    /// Per-record failures are logged and deferred to the end: misses
    /// already recorded are dispatched either way.
    fn detect_misses(&mut self, chore: &ChoreDefinition, now: DateTime<Utc>) -> Result<()> {
        if chore.overdue_handling != OverdueHandling::MissAtBoundary {
            return Ok(());
        }

        let mut first_err: Option<CoreError> = None;
        let mut outcomes = Vec::new();
        let executor = self.executor;
        let locks = self.locks.clone();
        for record in self.store.records_for_chore_mut(&chore.id) {
            if record.state != ChoreState::Overdue {
                continue;
            }
            let _lock = match locks.try_acquire(&record_lock_key(chore, record)) {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(chore_id = %chore.id, "record locked, deferring miss detection");
                    continue;
                }
            };
            let misses = match executor.record_miss(chore, record, now) {
                Ok(misses) => misses,
                Err(err) => {
                    warn!(chore_id = %chore.id, error = %err, "miss recording failed");
                    first_err.get_or_insert(err);
                    continue;
                }
            };

            let mut outcome = ApplyOutcome::default();
            if !record.notifications.missed_fired {
                record.notifications.missed_fired = true;
                for miss in &misses {
                    outcome.notifications.push(NotificationEvent::new(
                        EventType::Missed,
                        miss.user_id.clone(),
                        chore.id.clone(),
                        record.due_date,
                        RecipientRole::Supervisor,
                    ));
                }
            }
            outcome.misses = misses;
            outcomes.push(outcome);
        }

        self.dirty |= !outcomes.is_empty();
        for outcome in outcomes {
            self.dispatch(&chore.id, outcome);
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn scan_all(&mut self, now: DateTime<Utc>, trigger: TriggerSource) -> Result<()> {
        let mut first_err: Option<CoreError> = None;
        let chore_ids: Vec<String> = self.chores.keys().cloned().collect();
        for chore_id in chore_ids {
            if let Err(err) = self.scan_chore(&chore_id, now, trigger) {
                warn!(chore_id = %chore_id, error = %err, "scan failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Scan one chore's records: due-window and reminder events, overdue
    /// transitions, and a policy evaluation per record.
    ///
    /// A failing record does not abort the rest of the batch, and events
    /// produced before the failure are still dispatched; the first error
    /// is returned once every record has been visited.
    fn scan_chore(&mut self, chore_id: &str, now: DateTime<Utc>, trigger: TriggerSource) -> Result<()> {
        let chore = match self.chores.get(chore_id) {
            Some(chore) => chore.clone(),
            None => return Ok(()),
        };
        let executor = self.executor;
        let locks = self.locks.clone();
        let mut first_err: Option<CoreError> = None;
        let mut outcomes = Vec::new();

        for record in self.store.records_for_chore_mut(&chore.id) {
            // Same named lock the approval lane uses for this record. A
            // contended record is skipped, not dropped: the next tick
            // picks it up.
            let _lock = match locks.try_acquire(&record_lock_key(&chore, record)) {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(chore_id = %chore.id, "record locked, deferring to next scan");
                    continue;
                }
            };
            let mut outcome = ApplyOutcome::default();
            fire_due_events(&chore, record, now, &mut outcome);
            if let Err(err) = mark_overdue(&chore, record, now, &mut outcome) {
                warn!(chore_id = %chore.id, error = %err, "overdue transition failed");
                first_err.get_or_insert(err);
                outcomes.push(outcome);
                continue;
            }

            let ctx = build_context(&chore, record, trigger, now, false);
            let decision = decide(&ctx);
            if decision != ResetDecision::Hold {
                debug!(chore_id = %chore.id, ?decision, trigger = ?trigger, "timer-lane reset");
                match executor.apply(&chore, record, &ctx, decision, now) {
                    Ok(applied) => {
                        outcome.rescheduled |= applied.rescheduled;
                        outcome.notifications.extend(applied.notifications);
                        outcome.completions.extend(applied.completions);
                        outcome.misses.extend(applied.misses);
                        outcome.awards.extend(applied.awards);
                    }
                    Err(err) => {
                        warn!(chore_id = %chore.id, error = %err, "timer-lane reset failed");
                        first_err.get_or_insert(err);
                    }
                }
            }
            outcomes.push(outcome);
        }

        self.dirty |= outcomes.iter().any(|o| {
            o.rescheduled
                || !o.notifications.is_empty()
                || !o.completions.is_empty()
                || !o.misses.is_empty()
                || !o.awards.is_empty()
        });
        for outcome in outcomes {
            self.dispatch(&chore.id, outcome);
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ── Administrative entry points ──────────────────────────────────

    /// Explicit "reset this chore": RESET_AND_RESCHEDULE for every record,
    /// including the manual-only due-date reset types.
    pub fn admin_reset(&mut self, chore_id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = self.admin_apply(chore_id, now, None);
        let persisted = self.finalize();
        result.and(persisted)
    }

    /// Explicit "skip to next occurrence": the reschedule anchored on the
    /// current due date advances exactly one period.
    pub fn admin_skip(&mut self, chore_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.admin_reset(chore_id, now)
    }

    /// Explicit "set due date": reset without rescheduling, then pin the
    /// given due date.
    pub fn admin_set_due(
        &mut self,
        chore_id: &str,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = self.admin_apply(chore_id, now, Some(due));
        let persisted = self.finalize();
        result.and(persisted)
    }

    fn admin_apply(
        &mut self,
        chore_id: &str,
        now: DateTime<Utc>,
        pin_due: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let chore = self
            .chores
            .get(chore_id)
            .cloned()
            .ok_or_else(|| TransitionError::UnknownChore {
                chore_id: chore_id.to_string(),
            })?;
        let executor = self.executor;
        let locks = self.locks.clone();
        let mut outcomes = Vec::new();

        for record in self.store.records_for_chore_mut(&chore.id) {
            let _lock = locks.try_acquire(&record_lock_key(&chore, record))?;
            let ctx = build_context(&chore, record, TriggerSource::Approval, now, true);
            let decision = match pin_due {
                // Set-due pins the date itself; reschedule would overwrite it.
                Some(_) => ResetDecision::ResetOnly,
                None => decide(&ctx),
            };
            let outcome = executor.apply(&chore, record, &ctx, decision, now)?;
            if let Some(due) = pin_due {
                record.due_date = Some(due);
            }
            outcomes.push(outcome);
        }

        self.dirty = true;
        for outcome in outcomes {
            self.dispatch(&chore.id, outcome);
        }
        Ok(())
    }

    // ── Finalization ─────────────────────────────────────────────────

    /// Save the record tree if dirty. Runs on every exit path of every
    /// mutating operation; a failure keeps the tree dirty so the next
    /// pass retries with the mutation intact.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let tree = self.store.to_tree();
        persist_with_retry(&self.persistence, &tree, self.config.persistence)?;
        self.dirty = false;
        Ok(())
    }

    /// Flush on shutdown.
    pub fn flush(&mut self) -> Result<()> {
        self.dirty = true;
        self.finalize()
    }

    fn dispatch(&mut self, chore_id: &str, outcome: ApplyOutcome) {
        for event in &outcome.notifications {
            self.notifications.notify(event);
        }
        for event in &outcome.completions {
            self.gamification.completion(event);
        }
        for event in &outcome.misses {
            self.gamification.miss(event);
        }
        for (user_id, amount) in &outcome.awards {
            self.points.award(user_id, chore_id, *amount);
        }
    }

    fn lookup(&self, chore_id: &str, user_id: &str) -> Result<ChoreDefinition> {
        let chore = self
            .chores
            .get(chore_id)
            .ok_or_else(|| TransitionError::UnknownChore {
                chore_id: chore_id.to_string(),
            })?;
        if !chore.assigned_user_ids.iter().any(|u| u == user_id) {
            return Err(TransitionError::NotAssigned {
                user_id: user_id.to_string(),
                chore_id: chore_id.to_string(),
            }
            .into());
        }
        Ok(chore.clone())
    }
}

/// The named lock governing one record: the pair key for independent
/// records, the chore key for the shared instance.
fn record_lock_key(chore: &ChoreDefinition, record: &UserChoreRecord) -> LockKey {
    match &record.user_id {
        Some(user_id) => LockKey::Pair {
            user_id: user_id.clone(),
            chore_id: chore.id.clone(),
        },
        None => LockKey::Chore {
            chore_id: chore.id.clone(),
        },
    }
}

fn record_not_found(user_id: &str, chore_id: &str) -> CoreError {
    TransitionError::RecordNotFound {
        user_id: user_id.to_string(),
        chore_id: chore_id.to_string(),
    }
    .into()
}

/// Relation of `now` to the record's due date, by timestamp for lateness
/// and by calendar date for "due today".
fn due_relation(record: &UserChoreRecord, now: DateTime<Utc>) -> Option<DueRelation> {
    let due = record.due_date?;
    if now > due {
        Some(DueRelation::PastDue)
    } else if now.date_naive() == due.date_naive() {
        Some(DueRelation::AtDue)
    } else {
        Some(DueRelation::BeforeDue)
    }
}

/// Build the policy input for one record. Ephemeral; never persisted.
fn build_context(
    chore: &ChoreDefinition,
    record: &UserChoreRecord,
    trigger: TriggerSource,
    now: DateTime<Utc>,
    admin_request: bool,
) -> EvaluationContext {
    EvaluationContext {
        trigger_source: trigger,
        completion_criteria: chore.completion_criteria,
        state: record.state,
        has_pending_claim: record.claimed_by.is_some() || record.state == ChoreState::Claimed,
        due_relation: due_relation(record, now),
        overdue_handling: chore.overdue_handling,
        approval_reset_type: chore.approval_reset_type,
        recurring_frequency: chore.recurring_frequency,
        all_approved: record.all_approved(&chore.assigned_user_ids),
        admin_request,
    }
}

/// Fire due-window and reminder notifications, at most once per period.
fn fire_due_events(
    chore: &ChoreDefinition,
    record: &mut UserChoreRecord,
    now: DateTime<Utc>,
    outcome: &mut ApplyOutcome,
) {
    let due = match record.due_date {
        Some(due) => due,
        None => return,
    };
    if !record.state.is_actionable() || record.is_approved_in_current_period {
        return;
    }

    let recipients: Vec<String> = match &record.user_id {
        Some(user_id) => vec![user_id.clone()],
        None => chore.assigned_user_ids.clone(),
    };

    if !record.notifications.due_window_fired
        && now >= due - Duration::minutes(chore.due_window_offset_minutes)
    {
        record.notifications.due_window_fired = true;
        for user_id in &recipients {
            outcome.notifications.push(NotificationEvent::new(
                EventType::DueWindowOpened,
                user_id.clone(),
                chore.id.clone(),
                Some(due),
                RecipientRole::Member,
            ));
        }
    }

    if !record.notifications.due_reminder_fired
        && now >= due - Duration::minutes(chore.due_reminder_offset_minutes)
    {
        record.notifications.due_reminder_fired = true;
        for user_id in &recipients {
            outcome.notifications.push(NotificationEvent::new(
                EventType::DueReminder,
                user_id.clone(),
                chore.id.clone(),
                Some(due),
                RecipientRole::Member,
            ));
        }
    }
}

/// Transition a past-due actionable record to OVERDUE, unless the overdue
/// policy says the due date is display-only or resolution is deferred to
/// the midnight auto-approval.
fn mark_overdue(
    chore: &ChoreDefinition,
    record: &mut UserChoreRecord,
    now: DateTime<Utc>,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    if matches!(
        chore.overdue_handling,
        OverdueHandling::NeverOverdue | OverdueHandling::AutoApproveIfUnclaimed
    ) {
        return Ok(());
    }
    if due_relation(record, now) != Some(DueRelation::PastDue) {
        return Ok(());
    }
    if !matches!(record.state, ChoreState::Pending | ChoreState::Claimed) {
        return Ok(());
    }

    record.transition(ChoreState::Overdue)?;
    if !record.notifications.overdue_fired {
        record.notifications.overdue_fired = true;
        let recipients: Vec<String> = match &record.user_id {
            Some(user_id) => vec![user_id.clone()],
            None => chore.assigned_user_ids.clone(),
        };
        for user_id in recipients {
            outcome.notifications.push(NotificationEvent::new(
                EventType::Overdue,
                user_id,
                chore.id.clone(),
                record.due_date,
                RecipientRole::Supervisor,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CompletionEvent, MissEvent};
    use crate::record::RecordTree;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    // ── Test doubles ─────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct Recorder {
        notifications: Arc<Mutex<Vec<NotificationEvent>>>,
        awards: Arc<Mutex<Vec<(String, String, i64)>>>,
        reversals: Arc<Mutex<Vec<(String, String, i64)>>>,
        completions: Arc<Mutex<Vec<CompletionEvent>>>,
        misses: Arc<Mutex<Vec<MissEvent>>>,
    }

    impl Recorder {
        fn notified(&self, event_type: EventType) -> usize {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.event_type == event_type)
                .count()
        }
    }

    impl NotificationSink for Recorder {
        fn notify(&mut self, event: &NotificationEvent) {
            self.notifications.lock().unwrap().push(event.clone());
        }
    }

    impl PointsLedger for Recorder {
        fn award(&mut self, user_id: &str, chore_id: &str, amount: i64) {
            self.awards
                .lock()
                .unwrap()
                .push((user_id.to_string(), chore_id.to_string(), amount));
        }
        fn reverse(&mut self, user_id: &str, chore_id: &str, amount: i64) {
            self.reversals
                .lock()
                .unwrap()
                .push((user_id.to_string(), chore_id.to_string(), amount));
        }
    }

    impl GamificationSink for Recorder {
        fn completion(&mut self, event: &CompletionEvent) {
            self.completions.lock().unwrap().push(event.clone());
        }
        fn miss(&mut self, event: &MissEvent) {
            self.misses.lock().unwrap().push(event.clone());
        }
    }

    /// Persistence double whose saves fail while `failing` is set.
    #[derive(Clone, Default)]
    struct ToggleStore {
        tree: Arc<Mutex<RecordTree>>,
        failing: Arc<AtomicBool>,
    }

    impl Persistence for ToggleStore {
        fn load(&self) -> std::result::Result<RecordTree, crate::error::PersistenceError> {
            Ok(self.tree.lock().unwrap().clone())
        }
        fn save(&self, tree: &RecordTree) -> std::result::Result<(), crate::error::PersistenceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(crate::error::PersistenceError::SaveFailed {
                    attempts: 1,
                    message: "injected".to_string(),
                });
            }
            *self.tree.lock().unwrap() = tree.clone();
            Ok(())
        }
    }

    // ── Fixtures ─────────────────────────────────────────────────────

    fn chore(id: &str) -> ChoreDefinition {
        ChoreDefinition {
            id: id.to_string(),
            name: id.to_string(),
            completion_criteria: CompletionCriteria::Independent,
            approval_reset_type: ApprovalResetType::UponCompletion,
            recurring_frequency: RecurringFrequency::Daily,
            overdue_handling: OverdueHandling::Standard,
            applicable_days: vec![],
            per_user_applicable_days: Default::default(),
            daily_slots: vec![],
            custom_interval_days: None,
            due_window_offset_minutes: 60,
            due_reminder_offset_minutes: 15,
            points: 10,
            assigned_user_ids: vec!["alice".to_string()],
        }
    }

    fn manager() -> (LifecycleManager<MemoryStore>, Recorder) {
        let mut config = EngineConfig::default();
        config.persistence.backoff_ms = 1;
        let mut manager = LifecycleManager::new(MemoryStore::new(), config).unwrap();
        let recorder = Recorder::default();
        manager.set_notifications(Box::new(recorder.clone()));
        manager.set_points(Box::new(recorder.clone()));
        manager.set_gamification(Box::new(recorder.clone()));
        (manager, recorder)
    }

    fn ts(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, d, h, 0, 0).unwrap()
    }

    // ── Approval lane ────────────────────────────────────────────────

    #[test]
    fn claim_approve_resets_upon_completion() {
        let (mut m, rec) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let due_before = m.record("dishes", "alice").unwrap().due_date.unwrap();

        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Claimed);

        m.approve("alice", "dishes", ts(1, 10)).unwrap();
        let record = m.record("dishes", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.current_streak, 1);
        assert!(record.claimed_by.is_none());
        assert!(record.due_date.unwrap() > due_before);
        assert_eq!(rec.awards.lock().unwrap().len(), 1);
        assert_eq!(rec.notified(EventType::Reset), 1);
    }

    #[test]
    fn approve_without_claim_is_rejected_without_mutation() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();

        let err = m.approve("alice", "dishes", ts(1, 10)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transition(TransitionError::NotAllowed { .. })
        ));
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Pending);
        assert_eq!(m.record("dishes", "alice").unwrap().current_streak, 0);
    }

    #[test]
    fn claim_by_unassigned_user_is_rejected() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let err = m.claim("mallory", "dishes", ts(1, 9)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transition(TransitionError::NotAssigned { .. })
        ));
    }

    #[test]
    fn held_lock_surfaces_concurrency_conflict() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let key = LockKey::Pair {
            user_id: "alice".to_string(),
            chore_id: "dishes".to_string(),
        };
        let _guard = m.locks.try_acquire(&key).unwrap();
        let err = m.claim("alice", "dishes", ts(1, 9)).unwrap_err();
        assert!(matches!(err, CoreError::ConcurrencyConflict { .. }));
    }

    #[test]
    fn disapproval_of_claim_returns_record_to_pending() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        m.disapprove("alice", "dishes", ts(1, 10)).unwrap();
        let record = m.record("dishes", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert!(record.claimed_by.is_none());
        assert!(record.last_disapproved.is_some());
    }

    #[test]
    fn disapproval_of_prior_approval_reverses_points() {
        let (mut m, rec) = manager();
        let mut c = chore("dishes");
        c.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        m.approve("alice", "dishes", ts(1, 10)).unwrap();
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Approved);

        m.disapprove("alice", "dishes", ts(1, 11)).unwrap();
        let record = m.record("dishes", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert!(!record.is_approved_in_current_period);
        assert_eq!(rec.reversals.lock().unwrap().len(), 1);
        assert_eq!(rec.reversals.lock().unwrap()[0].2, 10);
    }

    #[test]
    fn multi_reset_type_allows_repeat_completions_in_one_period() {
        let (mut m, rec) = manager();
        let mut c = chore("walk-dog");
        c.approval_reset_type = ApprovalResetType::AtMidnightMulti;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "walk-dog", ts(1, 9)).unwrap();
        m.approve("alice", "walk-dog", ts(1, 10)).unwrap();
        // Handed straight back for another round.
        assert_eq!(m.record("walk-dog", "alice").unwrap().state, ChoreState::Pending);

        m.claim("alice", "walk-dog", ts(1, 17)).unwrap();
        m.approve("alice", "walk-dog", ts(1, 18)).unwrap();
        assert_eq!(rec.awards.lock().unwrap().len(), 2);
        // Period flag stands until midnight.
        assert!(m.record("walk-dog", "alice").unwrap().is_approved_in_current_period);
    }

    // ── SHARED semantics ─────────────────────────────────────────────

    #[test]
    fn shared_multi_allows_a_second_round_in_one_period() {
        let (mut m, rec) = manager();
        let mut c = shared_chore("garden", CompletionCriteria::Shared);
        c.approval_reset_type = ApprovalResetType::AtMidnightMulti;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "garden", ts(1, 9)).unwrap();
        m.approve("alice", "garden", ts(1, 10)).unwrap();
        m.claim("bob", "garden", ts(1, 11)).unwrap();
        m.approve("bob", "garden", ts(1, 12)).unwrap();

        // The full set completed; the approval round starts over while
        // the period flag stands until midnight.
        let record = m.record("garden", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert!(record.approved_user_ids.is_empty());
        assert!(record.is_approved_in_current_period);

        // A second full round inside the same period.
        m.claim("alice", "garden", ts(1, 13)).unwrap();
        m.approve("alice", "garden", ts(1, 14)).unwrap();
        m.claim("bob", "garden", ts(1, 15)).unwrap();
        m.approve("bob", "garden", ts(1, 16)).unwrap();

        assert!(m.record("garden", "alice").unwrap().approved_user_ids.is_empty());
        assert_eq!(rec.awards.lock().unwrap().len(), 4);
    }

    fn shared_chore(id: &str, criteria: CompletionCriteria) -> ChoreDefinition {
        let mut c = chore(id);
        c.completion_criteria = criteria;
        c.assigned_user_ids = vec!["alice".to_string(), "bob".to_string()];
        c
    }

    #[test]
    fn shared_upon_completion_terminates_in_n_approvals() {
        let (mut m, rec) = manager();
        m.add_chore(shared_chore("garden", CompletionCriteria::Shared), ts(1, 8))
            .unwrap();
        let due_before = m.record("garden", "alice").unwrap().due_date.unwrap();

        // First approval: no reschedule yet, record cycles back for bob.
        m.claim("alice", "garden", ts(1, 9)).unwrap();
        m.approve("alice", "garden", ts(1, 10)).unwrap();
        let record = m.record("garden", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.due_date.unwrap(), due_before);
        assert!(record.approved_user_ids.contains("alice"));

        // Second approval completes the set: exactly one due-date
        // mutation, everyone back to PENDING, period flags cleared.
        m.claim("bob", "garden", ts(1, 11)).unwrap();
        m.approve("bob", "garden", ts(1, 12)).unwrap();
        let record = m.record("garden", "bob").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert!(record.approved_user_ids.is_empty());
        assert_eq!(record.due_date.unwrap(), due_before + Duration::days(1));

        // Both users earned their approval's points.
        assert_eq!(rec.awards.lock().unwrap().len(), 2);
        // One shared completion, reported to both users.
        assert_eq!(rec.completions.lock().unwrap().len(), 2);
        assert_eq!(record.current_streak, 1);
    }

    #[test]
    fn shared_double_approval_by_same_user_is_rejected() {
        let (mut m, _) = manager();
        m.add_chore(shared_chore("garden", CompletionCriteria::Shared), ts(1, 8))
            .unwrap();
        m.claim("alice", "garden", ts(1, 9)).unwrap();
        m.approve("alice", "garden", ts(1, 10)).unwrap();

        m.claim("alice", "garden", ts(1, 11)).unwrap();
        let err = m.approve("alice", "garden", ts(1, 12)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transition(TransitionError::AlreadyApproved { .. })
        ));
    }

    #[test]
    fn shared_first_claim_locks_out_then_disapproval_unblocks() {
        let (mut m, _) = manager();
        m.add_chore(
            shared_chore("bins", CompletionCriteria::SharedFirst),
            ts(1, 8),
        )
        .unwrap();

        m.claim("alice", "bins", ts(1, 9)).unwrap();
        let err = m.claim("bob", "bins", ts(1, 9)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transition(TransitionError::ClaimBlocked { .. })
        ));

        // Disapproval unblocks immediately, same evaluation cycle.
        m.disapprove("alice", "bins", ts(1, 10)).unwrap();
        m.claim("bob", "bins", ts(1, 10)).unwrap();
        assert_eq!(
            m.record("bins", "bob").unwrap().claimed_by.as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn shared_first_single_approval_completes_for_everyone() {
        let (mut m, rec) = manager();
        m.add_chore(
            shared_chore("bins", CompletionCriteria::SharedFirst),
            ts(1, 8),
        )
        .unwrap();
        let due_before = m.record("bins", "alice").unwrap().due_date.unwrap();

        m.claim("alice", "bins", ts(1, 9)).unwrap();
        m.approve("alice", "bins", ts(1, 10)).unwrap();

        let record = m.record("bins", "bob").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.due_date.unwrap(), due_before + Duration::days(1));
        // Completion reported for both assigned users; points only for
        // the approver.
        assert_eq!(rec.completions.lock().unwrap().len(), 2);
        assert_eq!(rec.awards.lock().unwrap().len(), 1);
    }

    // ── Timer lanes ──────────────────────────────────────────────────

    #[test]
    fn midnight_reset_fires_only_on_midnight_boundary() {
        let (mut m, _) = manager();
        let mut c = chore("dishes");
        c.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        m.approve("alice", "dishes", ts(1, 10)).unwrap();
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Approved);

        // The periodic lane holds.
        m.tick(ts(1, 18)).unwrap();
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Approved);

        // The midnight boundary resets and reschedules.
        m.midnight_pass(ts(2, 0)).unwrap();
        let record = m.record("dishes", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert!(!record.is_approved_in_current_period);
    }

    #[test]
    fn due_window_and_reminder_fire_once_per_period() {
        let (mut m, rec) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let due = m.record("dishes", "alice").unwrap().due_date.unwrap();

        // Inside the 60-minute window, before the 15-minute reminder.
        m.tick(due - Duration::minutes(30)).unwrap();
        assert_eq!(rec.notified(EventType::DueWindowOpened), 1);
        assert_eq!(rec.notified(EventType::DueReminder), 0);

        m.tick(due - Duration::minutes(10)).unwrap();
        assert_eq!(rec.notified(EventType::DueWindowOpened), 1);
        assert_eq!(rec.notified(EventType::DueReminder), 1);

        // Repeat scans never duplicate within the period.
        m.tick(due - Duration::minutes(5)).unwrap();
        m.tick(due - Duration::minutes(1)).unwrap();
        assert_eq!(rec.notified(EventType::DueWindowOpened), 1);
        assert_eq!(rec.notified(EventType::DueReminder), 1);
    }

    #[test]
    fn past_due_record_goes_overdue_and_notifies_once() {
        let (mut m, rec) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let due = m.record("dishes", "alice").unwrap().due_date.unwrap();

        m.tick(due + Duration::minutes(5)).unwrap();
        assert_eq!(m.record("dishes", "alice").unwrap().state, ChoreState::Overdue);
        assert_eq!(rec.notified(EventType::Overdue), 1);

        m.tick(due + Duration::minutes(10)).unwrap();
        assert_eq!(rec.notified(EventType::Overdue), 1);
    }

    #[test]
    fn never_overdue_is_display_only() {
        let (mut m, rec) = manager();
        let mut c = chore("water-plants");
        c.overdue_handling = OverdueHandling::NeverOverdue;
        m.add_chore(c, ts(1, 8)).unwrap();
        let due = m.record("water-plants", "alice").unwrap().due_date.unwrap();

        m.tick(due + Duration::hours(3)).unwrap();
        let record = m.record("water-plants", "alice").unwrap();
        // Still actionable; the past due date merely renders as past.
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.due_date.unwrap(), due);
        assert_eq!(rec.notified(EventType::Overdue), 0);
    }

    #[test]
    fn miss_at_boundary_cycles_through_missed() {
        let (mut m, rec) = manager();
        let mut c = chore("homework");
        c.overdue_handling = OverdueHandling::MissAtBoundary;
        m.add_chore(c, ts(1, 8)).unwrap();
        let due = m.record("homework", "alice").unwrap().due_date.unwrap();

        m.tick(due + Duration::minutes(5)).unwrap();
        assert_eq!(m.record("homework", "alice").unwrap().state, ChoreState::Overdue);

        // Next boundary: miss recorded, then the recurring chore cycles
        // back to PENDING with a fresh due date.
        m.midnight_pass(ts(3, 0)).unwrap();
        let record = m.record("homework", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.current_missed_streak, 1);
        assert!(record.due_date.unwrap() > due);
        assert_eq!(rec.notified(EventType::Missed), 1);
        assert_eq!(rec.misses.lock().unwrap().len(), 1);
    }

    #[test]
    fn missed_streak_resets_on_completion() {
        let (mut m, _) = manager();
        let mut c = chore("homework");
        c.overdue_handling = OverdueHandling::MissAtBoundary;
        m.add_chore(c, ts(1, 8)).unwrap();

        // Two consecutive misses.
        for day in [2u32, 3] {
            let due = m.record("homework", "alice").unwrap().due_date.unwrap();
            m.tick(due + Duration::minutes(5)).unwrap();
            m.midnight_pass(ts(day + 1, 0)).unwrap();
        }
        assert_eq!(m.record("homework", "alice").unwrap().current_missed_streak, 2);

        // One completion clears the missed streak.
        m.claim("alice", "homework", ts(4, 9)).unwrap();
        m.approve("alice", "homework", ts(4, 10)).unwrap();
        let record = m.record("homework", "alice").unwrap();
        assert_eq!(record.current_missed_streak, 0);
        assert_eq!(record.current_streak, 1);
        assert_eq!(record.all_time_bucket.missed_longest_streak, 2);
    }

    #[test]
    fn midnight_pass_recovers_a_long_idle_record() {
        let (mut m, _) = manager();
        let mut c = chore("attic");
        c.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        m.add_chore(c, ts(1, 8)).unwrap();

        // Pin a due date roughly eighteen months in the past.
        let stale = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        m.admin_set_due("attic", stale, ts(1, 9)).unwrap();

        // The boundary pass reschedules from the current day instead of
        // replaying hundreds of elapsed occurrences.
        m.midnight_pass(ts(2, 0)).unwrap();
        let record = m.record("attic", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.due_date, Some(ts(3, 0)));

        // And the next boundary advances normally again.
        m.midnight_pass(ts(3, 0)).unwrap();
        assert_eq!(m.record("attic", "alice").unwrap().due_date, Some(ts(4, 0)));
    }

    #[test]
    fn auto_approve_if_unclaimed_completes_at_boundary() {
        let (mut m, rec) = manager();
        let mut c = chore("feed-cat");
        c.overdue_handling = OverdueHandling::AutoApproveIfUnclaimed;
        c.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        m.add_chore(c, ts(1, 8)).unwrap();
        let due = m.record("feed-cat", "alice").unwrap().due_date.unwrap();

        m.midnight_pass(due + Duration::hours(6)).unwrap();
        let record = m.record("feed-cat", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Pending);
        assert_eq!(record.current_streak, 1);
        assert!(record.due_date.unwrap() > due);
        assert_eq!(rec.awards.lock().unwrap().len(), 1);
        assert_eq!(rec.completions.lock().unwrap().len(), 1);
    }

    // ── Streak retention ─────────────────────────────────────────────

    #[test]
    fn weekly_streak_survives_snapshot_pruning() {
        let mut config = EngineConfig::default();
        config.snapshot_retention_days = 7;
        config.persistence.backoff_ms = 1;
        let mut m = LifecycleManager::new(MemoryStore::new(), config).unwrap();

        let mut c = chore("mow-lawn");
        c.recurring_frequency = RecurringFrequency::Weekly;
        c.applicable_days = vec![1]; // Mondays
        c.overdue_handling = OverdueHandling::NeverOverdue;
        m.add_chore(c, ts(1, 8)).unwrap();

        // Three consecutive Mondays: Sep 7, 14, 21.
        for monday in [7u32, 14, 21] {
            m.claim("alice", "mow-lawn", ts(monday, 19)).unwrap();
            m.approve("alice", "mow-lawn", ts(monday, 20)).unwrap();
        }
        assert_eq!(m.record("mow-lawn", "alice").unwrap().current_streak, 3);

        // Retention pruning drops the older snapshot buckets but never
        // the streak fields or the all-time bucket.
        m.midnight_pass(ts(22, 0)).unwrap();
        let record = m.record("mow-lawn", "alice").unwrap();
        assert_eq!(record.daily_snapshot_buckets.len(), 1);
        assert_eq!(record.current_streak, 3);
        assert_eq!(record.all_time_bucket.longest_streak, 3);
    }

    #[test]
    fn skipped_week_resets_streak_via_schedule_replay() {
        let (mut m, _) = manager();
        let mut c = chore("mow-lawn");
        c.recurring_frequency = RecurringFrequency::Weekly;
        c.applicable_days = vec![1];
        c.overdue_handling = OverdueHandling::NeverOverdue;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "mow-lawn", ts(7, 19)).unwrap();
        m.approve("alice", "mow-lawn", ts(7, 20)).unwrap();
        assert_eq!(m.record("mow-lawn", "alice").unwrap().current_streak, 1);

        // Skip Sep 14 entirely; complete on Sep 21.
        m.admin_skip("mow-lawn", ts(15, 8)).unwrap();
        m.claim("alice", "mow-lawn", ts(21, 19)).unwrap();
        m.approve("alice", "mow-lawn", ts(21, 20)).unwrap();
        assert_eq!(m.record("mow-lawn", "alice").unwrap().current_streak, 1);
    }

    // ── Persistence guarantees ───────────────────────────────────────

    #[test]
    fn failed_save_retains_mutation_until_next_success() {
        let store = ToggleStore::default();
        let mut config = EngineConfig::default();
        config.persistence.backoff_ms = 1;
        let mut m = LifecycleManager::new(store.clone(), config).unwrap();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();

        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        store.failing.store(true, Ordering::SeqCst);
        let err = m.approve("alice", "dishes", ts(1, 10)).unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));

        // The in-memory mutation is intact despite the failed save.
        assert_eq!(m.record("dishes", "alice").unwrap().current_streak, 1);

        // Next pass persists the retained mutation.
        store.failing.store(false, Ordering::SeqCst);
        m.tick(ts(1, 11)).unwrap();
        let saved = store.tree.lock().unwrap().clone();
        assert_eq!(saved.records[0].current_streak, 1);
    }

    #[test]
    fn batch_item_failure_does_not_discard_other_resets() {
        let store = ToggleStore::default();
        let mut config = EngineConfig::default();
        config.persistence.backoff_ms = 1;
        let mut m = LifecycleManager::new(store.clone(), config).unwrap();
        let rec = Recorder::default();
        m.set_notifications(Box::new(rec.clone()));

        let mut good = chore("dishes");
        good.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        m.add_chore(good, ts(1, 8)).unwrap();
        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        m.approve("alice", "dishes", ts(1, 10)).unwrap();

        // Sneak in a chore whose reschedule cannot be computed.
        let mut bad = chore("broken");
        bad.approval_reset_type = ApprovalResetType::AtMidnightOnce;
        bad.recurring_frequency = RecurringFrequency::Custom;
        bad.custom_interval_days = None; // malformed on purpose
        m.store.ensure_assigned(&bad, ts(1, 8));
        m.chores.insert(bad.id.clone(), bad);

        let err = m.midnight_pass(ts(2, 0)).unwrap_err();
        assert!(matches!(err, CoreError::Recurrence(_)));

        // The good chore's midnight reset still landed, its notification
        // went out, and the mutation was persisted.
        assert_eq!(rec.notified(EventType::Reset), 1);
        let saved = store.tree.lock().unwrap().clone();
        let dishes = saved
            .records
            .iter()
            .find(|r| r.chore_id == "dishes")
            .unwrap();
        assert_eq!(dishes.state, ChoreState::Pending);
        assert!(!dishes.is_approved_in_current_period);
    }

    #[test]
    fn miss_events_survive_a_failed_reschedule_in_the_same_pass() {
        let (mut m, rec) = manager();

        // A chore whose reschedule cannot be computed, snuck past
        // validation.
        let mut bad = chore("broken");
        bad.overdue_handling = OverdueHandling::MissAtBoundary;
        bad.recurring_frequency = RecurringFrequency::Custom;
        bad.custom_interval_days = None;
        m.store.ensure_assigned(&bad, ts(1, 8));
        m.chores.insert(bad.id.clone(), bad);
        for record in m.store.records_for_chore_mut("broken") {
            record.due_date = Some(ts(1, 18));
            record.transition(ChoreState::Overdue).unwrap();
        }

        let err = m.midnight_pass(ts(2, 0)).unwrap_err();
        assert!(matches!(err, CoreError::Recurrence(_)));

        // The miss itself landed and its events went out, even though the
        // reschedule in the same pass failed.
        let record = m.record("broken", "alice").unwrap();
        assert_eq!(record.state, ChoreState::Missed);
        assert_eq!(record.current_missed_streak, 1);
        assert_eq!(rec.notified(EventType::Missed), 1);
        assert_eq!(rec.misses.lock().unwrap().len(), 1);
    }

    // ── Administrative entry points ──────────────────────────────────

    #[test]
    fn admin_reset_overrides_manual_only_reset_types() {
        let (mut m, _) = manager();
        let mut c = chore("deep-clean");
        c.approval_reset_type = ApprovalResetType::AtDueDateOnce;
        m.add_chore(c, ts(1, 8)).unwrap();

        m.claim("alice", "deep-clean", ts(1, 9)).unwrap();
        m.approve("alice", "deep-clean", ts(1, 10)).unwrap();
        assert_eq!(m.record("deep-clean", "alice").unwrap().state, ChoreState::Approved);

        // No timer resets due-date types...
        m.tick(ts(1, 18)).unwrap();
        m.midnight_pass(ts(2, 0)).unwrap();
        assert_eq!(m.record("deep-clean", "alice").unwrap().state, ChoreState::Approved);

        // ...only the explicit administrative request does.
        m.admin_reset("deep-clean", ts(2, 9)).unwrap();
        assert_eq!(m.record("deep-clean", "alice").unwrap().state, ChoreState::Pending);
    }

    #[test]
    fn admin_set_due_pins_the_given_date() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();

        m.admin_set_due("dishes", ts(10, 17), ts(1, 9)).unwrap();
        let record = m.record("dishes", "alice").unwrap();
        assert_eq!(record.due_date, Some(ts(10, 17)));
        assert_eq!(record.state, ChoreState::Pending);
    }

    #[test]
    fn admin_skip_advances_exactly_one_occurrence() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        let due = m.record("dishes", "alice").unwrap().due_date.unwrap();

        m.admin_skip("dishes", ts(1, 9)).unwrap();
        assert_eq!(
            m.record("dishes", "alice").unwrap().due_date.unwrap(),
            due + Duration::days(1)
        );
    }

    // ── Lifecycle of records ─────────────────────────────────────────

    #[test]
    fn records_survive_reload_through_persistence() {
        let store = ToggleStore::default();
        let mut config = EngineConfig::default();
        config.persistence.backoff_ms = 1;
        let mut m = LifecycleManager::new(store.clone(), config.clone()).unwrap();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        m.claim("alice", "dishes", ts(1, 9)).unwrap();
        m.approve("alice", "dishes", ts(1, 10)).unwrap();
        m.flush().unwrap();

        let mut reloaded = LifecycleManager::new(store, config).unwrap();
        reloaded.add_chore(chore("dishes"), ts(1, 11)).unwrap();
        let record = reloaded.record("dishes", "alice").unwrap();
        assert_eq!(record.current_streak, 1);
        assert!(record.last_approved.is_some());
    }

    #[test]
    fn remove_chore_destroys_records() {
        let (mut m, _) = manager();
        m.add_chore(chore("dishes"), ts(1, 8)).unwrap();
        m.remove_chore("dishes").unwrap();
        assert!(m.record("dishes", "alice").is_none());
        assert!(m.store.is_empty());
    }
}
