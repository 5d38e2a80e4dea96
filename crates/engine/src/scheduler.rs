//! Scheduling engine - the hourly cycle, force-assignment, timer handling
//! and roster administration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rota_core::{
    floor_to_local_hour, local_hour, Actor, Assignment, AssignmentFilter, AssignmentId,
    AssignmentStatus, AuditEntry, EscalationStage, HourIndex, Operator, OperatorId, Params,
    RequestId, Shift, ShiftId, TaskRef, TaskTemplate, Time, SHIFT_HOURS,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::escalation::{TimerFired, TimerKind};
use crate::lifecycle;
use crate::notify::{AdminNotice, OperatorNotice};
use crate::selection;

/// What happened to one (shift, hour) slot during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Assignments were created for the slot
    Scheduled {
        /// Number of assignments created
        created: usize,
        /// Selected Lead
        lead: Option<OperatorId>,
    },
    /// The slot already had assignments; only missing roster members were filled in
    AlreadyScheduled {
        /// Number of default-task assignments added
        backfilled: usize,
    },
    /// Nobody active on the roster
    NoRoster,
}

/// Per-slot line of a [`CycleReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    /// Shift
    pub shift: ShiftId,
    /// Hour-slot
    pub hour: HourIndex,
    /// Outcome
    pub outcome: SlotOutcome,
}

/// Result of one hourly cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Instant the cycle ran for
    pub at: Time,
    /// Assignments closed by the sweep
    pub closed: usize,
    /// Shifts that ended
    pub shifts_closed: Vec<ShiftId>,
    /// Open slots visited
    pub slots: Vec<SlotReport>,
}

/// Whether a timer event changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The precondition held and the event was applied
    Applied,
    /// The assignment moved on; the event was dropped
    Stale,
}

/// Drives the hourly cycle.
#[derive(Clone)]
pub struct SchedulingEngine {
    ctx: Arc<EngineContext>,
}

impl SchedulingEngine {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    // === Hourly cycle ===

    /// Run the cycle for `now`.
    ///
    /// Closes every assignment whose hour has ended, closes ended shifts, then
    /// schedules the current hour of every open shift. A slot that already has
    /// assignments is not re-selected, so running the cycle twice for the same
    /// hour creates nothing the second time.
    pub async fn run_cycle(&self, now: Time) -> Result<CycleReport> {
        let _cycle = self.ctx.cycle.lock().await;
        info!(%now, "running hourly cycle");

        let closed = self.sweep(now).await?;
        let shifts_closed = self.close_shifts(now).await?;

        let mut slots = Vec::new();
        for shift in self.open_shifts(now).await? {
            let Some(hour) = shift.hour_index_at(now) else { continue };
            let outcome = self.schedule_slot(&shift, hour, now).await?;
            match &outcome {
                SlotOutcome::Scheduled { created, lead } => {
                    info!(shift = %shift.id, %hour, created, lead = ?lead, "hour scheduled")
                }
                SlotOutcome::AlreadyScheduled { backfilled } => {
                    debug!(shift = %shift.id, %hour, backfilled, "hour already scheduled")
                }
                SlotOutcome::NoRoster => warn!(shift = %shift.id, %hour, "no active operators on roster"),
            }
            slots.push(SlotReport { shift: shift.id, hour, outcome });
        }

        self.rearm().await?;
        Ok(CycleReport { at: now, closed, shifts_closed, slots })
    }

    /// Startup recovery: report hours that were never scheduled, then run the
    /// current cycle (which re-arms outstanding timers).
    pub async fn recover(&self, now: Time) -> Result<CycleReport> {
        for shift in self.ctx.storage.list_shifts().await? {
            if shift.ended_at.is_some() || shift.start_at > now {
                continue;
            }
            let current = shift.hour_index_at(now).map_or(SHIFT_HOURS + 1, HourIndex::get);
            for index in (1..current).filter_map(HourIndex::new) {
                let slot = AssignmentFilter::slot(shift.id, index);
                if self.ctx.storage.list_assignments(&slot).await?.is_empty() {
                    warn!(shift = %shift.id, hour = %index, "missed cycle: hour was never scheduled");
                    self.ctx
                        .record(
                            AuditEntry::new(Actor::System, "cycle.missed", shift.id, now)
                                .with_metadata(json!({ "hour": index })),
                        );
                }
            }
        }
        self.run_cycle(now).await
    }

    async fn sweep(&self, now: Time) -> Result<usize> {
        let due: Vec<Assignment> = self
            .ctx
            .storage
            .list_assignments(&AssignmentFilter::open())
            .await?
            .into_iter()
            .filter(|a| a.ends_at <= now)
            .collect();

        let mut closed = 0;
        for stale in due {
            let _guard = self.ctx.locks.lock(&stale.id).await;
            let mut assignment = self.ctx.assignment(stale.id).await?;
            if !assignment.is_open() || assignment.ends_at > now {
                continue;
            }
            let running_break = assignment.on_break.clone();
            let status = lifecycle::close_hour(&mut assignment)?;
            self.ctx.storage.save_assignment(&assignment).await?;
            self.ctx.monitor.cancel_all(assignment.id).await;
            let expired = self.ctx.expire_requests(assignment.id, now).await?;
            if let Some(period) = &running_break {
                self.ctx.release_cover(assignment.id, period, now).await?;
            }

            let action = match status {
                AssignmentStatus::Completed => "assignment.completed",
                _ => "assignment.missed",
            };
            debug!(assignment = %assignment.id, operator = %assignment.operator, %status, "hour closed");
            self.ctx
                .record(
                    AuditEntry::new(Actor::System, action, assignment.id, now)
                        .with_metadata(json!({ "expired_requests": expired })),
                );
            closed += 1;
        }
        Ok(closed)
    }

    async fn close_shifts(&self, now: Time) -> Result<Vec<ShiftId>> {
        let mut closed = Vec::new();
        for mut shift in self.ctx.storage.list_shifts().await? {
            if shift.ended_at.is_none() && shift.end_at() <= now {
                shift.ended_at = Some(shift.end_at());
                self.ctx.storage.save_shift(&shift).await?;
                info!(shift = %shift.id, "shift ended");
                self.ctx.record(AuditEntry::new(Actor::System, "shift.closed", shift.id, now));
                closed.push(shift.id);
            }
        }
        Ok(closed)
    }

    async fn open_shifts(&self, now: Time) -> Result<Vec<Shift>> {
        Ok(self
            .ctx
            .storage
            .list_shifts()
            .await?
            .into_iter()
            .filter(|s| s.is_open_at(now))
            .collect())
    }

    async fn schedule_slot(&self, shift: &Shift, hour: HourIndex, now: Time) -> Result<SlotOutcome> {
        let existing = self.ctx.storage.list_assignments(&AssignmentFilter::slot(shift.id, hour)).await?;
        if !existing.is_empty() {
            let backfilled = self.backfill(shift, hour, &existing, now).await?;
            return Ok(SlotOutcome::AlreadyScheduled { backfilled });
        }

        let roster = self.roster(shift).await?;
        if roster.is_empty() {
            return Ok(SlotOutcome::NoRoster);
        }

        let previous = self.previous_lead(shift, hour).await?;
        let lead = selection::select_lead(&roster, previous.as_ref()).map(|op| op.id.clone());

        let templates = self.ctx.storage.list_templates().await?;
        let window = shift.hour_window(hour);
        let local = local_hour(window.0, self.ctx.settings.get().offset());
        let tasks = selection::assign_defaults(&roster, lead.as_ref(), &templates, local);

        let mut created = 0;
        let mut lead_created = false;
        for (operator, task) in tasks {
            let is_lead = task == TaskRef::Lead;
            let assignment = Assignment::new(operator, shift.id, hour, task, window, now);
            if self.create(assignment, Actor::System, now).await? {
                created += 1;
                lead_created |= is_lead;
            }
        }

        if let (Some(lead_id), true) = (&lead, lead_created) {
            if let Some(mut operator) = self.ctx.storage.load_operator(lead_id).await? {
                operator.last_lead_at = Some(now);
                operator.updated_at = now;
                self.ctx.storage.save_operator(&operator).await?;
            }
        }

        Ok(SlotOutcome::Scheduled { created, lead })
    }

    /// Give roster members without an assignment in the slot the default
    /// task. Superseded assignments do not count, so an operator who left
    /// the shift and came back gets a fresh one.
    async fn backfill(
        &self,
        shift: &Shift,
        hour: HourIndex,
        existing: &[Assignment],
        now: Time,
    ) -> Result<usize> {
        let covered: BTreeSet<&OperatorId> = existing
            .iter()
            .filter(|a| a.status != AssignmentStatus::Superseded)
            .map(|a| &a.operator)
            .collect();
        let window = shift.hour_window(hour);
        let mut added = 0;
        for operator in self.roster(shift).await? {
            if covered.contains(&operator.id) {
                continue;
            }
            let assignment = Assignment::new(operator.id, shift.id, hour, TaskRef::DataLabelling, window, now);
            if self.create(assignment, Actor::System, now).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn roster(&self, shift: &Shift) -> Result<Vec<Operator>> {
        Ok(self
            .ctx
            .storage
            .list_operators()
            .await?
            .into_iter()
            .filter(|op| op.is_active && shift.contains(&op.id))
            .collect())
    }

    /// Lead of the preceding hour-slot, ignoring forced and replacement assignments.
    async fn previous_lead(&self, shift: &Shift, hour: HourIndex) -> Result<Option<OperatorId>> {
        let Some(previous) = hour.previous() else { return Ok(None) };
        let slot = self.ctx.storage.list_assignments(&AssignmentFilter::slot(shift.id, previous)).await?;
        Ok(slot
            .into_iter()
            .find(|a| a.task == TaskRef::Lead && !a.forced && a.replaces.is_none())
            .map(|a| a.operator))
    }

    /// Store a new pending assignment, arm its timers and notify its operator.
    /// Returns `false` when the slot was already occupied.
    async fn create(&self, assignment: Assignment, actor: Actor, now: Time) -> Result<bool> {
        if !self.ctx.storage.insert_assignment_if_vacant(&assignment).await? {
            debug!(operator = %assignment.operator, hour = %assignment.hour, "slot already occupied");
            return Ok(false);
        }

        let action = if assignment.forced { "assignment.forced" } else { "assignment.created" };
        self.ctx
            .record(
                AuditEntry::new(actor, action, assignment.id, now).with_metadata(json!({
                    "operator": assignment.operator,
                    "shift": assignment.shift,
                    "hour": assignment.hour,
                    "task": assignment.task.name(),
                    "forced": assignment.forced,
                    "replaces": assignment.replaces,
                })),
            );

        self.ctx.monitor.arm_acknowledgment(&assignment).await;
        let widget = self.ctx.widget(&assignment).await;
        self.ctx.tell_operator(&assignment.operator, OperatorNotice::Assigned { widget });
        Ok(true)
    }

    /// Re-arm timers that are missing, e.g. after a restart.
    async fn rearm(&self) -> Result<()> {
        let open = self.ctx.storage.list_assignments(&AssignmentFilter::open()).await?;
        for assignment in open {
            if assignment.status == AssignmentStatus::Pending
                && !self.ctx.monitor.is_acknowledgment_armed(assignment.id).await
            {
                self.ctx.monitor.arm_acknowledgment(&assignment).await;
            }
            if let Some(period) = &assignment.on_break {
                if !self.ctx.monitor.is_break_armed(assignment.id).await {
                    self.ctx.monitor.arm_break(assignment.id, period.request, period.ends_at).await;
                }
            }
        }
        Ok(())
    }

    // === Operator actions ===

    /// Operator acknowledges an assignment: `Pending → Active`.
    pub async fn start_assignment(
        &self,
        id: AssignmentId,
        operator: &OperatorId,
        now: Time,
    ) -> Result<Assignment> {
        let _guard = self.ctx.locks.lock(&id).await;
        let mut assignment = self.ctx.assignment(id).await?;
        if &assignment.operator != operator {
            return Err(EngineError::Forbidden(
                "only the assigned operator can start this assignment".to_string(),
            ));
        }
        lifecycle::start(&mut assignment, now)?;
        self.ctx.storage.save_assignment(&assignment).await?;
        self.ctx.monitor.cancel_acknowledgment(id).await;

        info!(assignment = %id, operator = %operator, "assignment started");
        self.ctx
            .record(AuditEntry::new(Actor::Operator(operator.clone()), "assignment.started", id, now));
        Ok(assignment)
    }

    // === Admin override ===

    /// Assign a task directly, bypassing selection.
    ///
    /// Any open assignment the operator holds for the current slot is
    /// superseded first. The new assignment is marked `forced`.
    pub async fn force_assign(
        &self,
        operator: &OperatorId,
        task: TaskRef,
        mut params: Params,
        admin: &OperatorId,
        now: Time,
    ) -> Result<Assignment> {
        let _cycle = self.ctx.cycle.lock().await;
        if self.ctx.storage.load_operator(operator).await?.is_none() {
            return Err(EngineError::not_found(format!("operator {operator}")));
        }
        let shift = self
            .open_shifts(now)
            .await?
            .into_iter()
            .find(|s| s.contains(operator))
            .ok_or_else(|| EngineError::InvalidInput(format!("{operator} is not on an open shift")))?;
        let Some(hour) = shift.hour_index_at(now) else {
            return Err(EngineError::InvalidInput(format!("{operator} is not on an open shift")));
        };

        if let TaskRef::Template(name) = &task {
            let template = self
                .ctx
                .storage
                .load_template(name)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("template '{name}'")))?;
            if template.retired {
                return Err(EngineError::InvalidInput(format!("template '{name}' is retired")));
            }
            if let Some(schema) = &template.params_schema {
                schema.check_diff(&params).map_err(EngineError::InvalidPayload)?;
            }
        }
        params.retain(|_, v| !v.is_null());

        let current = AssignmentFilter {
            operator: Some(operator.clone()),
            shift: Some(shift.id),
            hour: Some(hour),
            open_only: true,
        };
        let mut replaced = None;
        for existing in self.ctx.storage.list_assignments(&current).await? {
            if self.supersede(existing.id, Actor::Admin(admin.clone()), now).await? {
                replaced = Some(existing.id);
            }
        }

        let mut assignment =
            Assignment::new(operator.clone(), shift.id, hour, task, shift.hour_window(hour), now);
        assignment.forced = true;
        assignment.params = params;
        if !self.create(assignment.clone(), Actor::Admin(admin.clone()), now).await? {
            return Err(EngineError::InvalidInput(
                "the slot was filled concurrently, try again".to_string(),
            ));
        }
        info!(
            assignment = %assignment.id,
            operator = %operator,
            task = %assignment.task,
            replaced = ?replaced,
            "forced assignment"
        );
        Ok(assignment)
    }

    /// Retire an open assignment as `Superseded`. Returns `false` if it had
    /// already reached a terminal state.
    async fn supersede(&self, id: AssignmentId, actor: Actor, now: Time) -> Result<bool> {
        let _guard = self.ctx.locks.lock(&id).await;
        let mut assignment = self.ctx.assignment(id).await?;
        if !assignment.is_open() {
            return Ok(false);
        }
        let running_break = assignment.on_break.clone();
        lifecycle::supersede(&mut assignment, now)?;
        self.ctx.storage.save_assignment(&assignment).await?;
        self.ctx.monitor.cancel_all(id).await;
        self.ctx.expire_requests(id, now).await?;
        if let Some(period) = &running_break {
            self.ctx.release_cover(id, period, now).await?;
        }
        self.ctx.record(AuditEntry::new(actor, "assignment.superseded", id, now));
        Ok(true)
    }

    // === Timers ===

    /// Apply a fired timer if its precondition still holds.
    pub async fn handle_timer(&self, event: TimerFired, now: Time) -> Result<TimerOutcome> {
        let outcome = match event.kind {
            TimerKind::Reminder => self.remind(event.assignment, now).await?,
            TimerKind::Escalation => self.escalate(event.assignment, now).await?,
            TimerKind::BreakEnd(request) => self.end_break(event.assignment, request, now).await?,
        };
        if outcome == TimerOutcome::Stale {
            debug!(assignment = %event.assignment, kind = ?event.kind, "stale timer ignored");
        }
        Ok(outcome)
    }

    async fn remind(&self, id: AssignmentId, now: Time) -> Result<TimerOutcome> {
        let assignment = {
            let _guard = self.ctx.locks.lock(&id).await;
            let mut assignment = self.ctx.assignment(id).await?;
            if assignment.status != AssignmentStatus::Pending
                || assignment.escalation != EscalationStage::None
            {
                return Ok(TimerOutcome::Stale);
            }
            lifecycle::remind(&mut assignment)?;
            self.ctx.storage.save_assignment(&assignment).await?;
            assignment
        };

        info!(assignment = %id, operator = %assignment.operator, "acknowledgment reminder");
        let task = assignment.task.name().to_string();
        self.ctx
            .tell_operator(&assignment.operator, OperatorNotice::Reminder { assignment: id, task: task.clone() });
        self.ctx
            .tell_admins(AdminNotice::AckOverdue { assignment: id, operator: assignment.operator.clone(), task });
        self.ctx.record(AuditEntry::new(Actor::System, "assignment.reminded", id, now));
        Ok(TimerOutcome::Applied)
    }

    async fn escalate(&self, id: AssignmentId, now: Time) -> Result<TimerOutcome> {
        // Keeps the replacement out of a concurrent hour rollover.
        let _cycle = self.ctx.cycle.lock().await;
        let original = {
            let _guard = self.ctx.locks.lock(&id).await;
            let mut assignment = self.ctx.assignment(id).await?;
            if assignment.status != AssignmentStatus::Pending
                || assignment.task.is_default()
                || assignment.ends_at <= now
            {
                return Ok(TimerOutcome::Stale);
            }
            lifecycle::escalate(&mut assignment, now)?;
            self.ctx.storage.save_assignment(&assignment).await?;
            self.ctx.monitor.cancel_acknowledgment(id).await;
            assignment
        };

        warn!(assignment = %id, operator = %original.operator, task = %original.task, "assignment escalated");
        self.ctx.record(AuditEntry::new(Actor::System, "assignment.escalated", id, now));
        self.ctx
            .tell_operator(
                &original.operator,
                OperatorNotice::Reassigned { assignment: id, task: original.task.name().to_string() },
            );

        let replacement = self.replace(&original, now).await?;
        if replacement.is_none() {
            warn!(assignment = %id, "no eligible operator to take over escalated assignment");
        }
        self.ctx
            .tell_admins(AdminNotice::Escalated {
                assignment: id,
                operator: original.operator.clone(),
                task: original.task.name().to_string(),
                replacement: replacement.map(|a| a.operator),
            });
        Ok(TimerOutcome::Applied)
    }

    /// Hand an escalated assignment to an on-shift default-task operator.
    async fn replace(&self, original: &Assignment, now: Time) -> Result<Option<Assignment>> {
        let slot = self
            .ctx
            .storage
            .list_assignments(&AssignmentFilter::slot(original.shift, original.hour))
            .await?;
        let shift = self.ctx.storage.load_shift(original.shift).await?;
        let operators: BTreeMap<OperatorId, Operator> = self
            .ctx
            .storage
            .list_operators()
            .await?
            .into_iter()
            .filter(|op| shift.as_ref().is_some_and(|s| s.contains(&op.id)))
            .map(|op| (op.id.clone(), op))
            .collect();

        let Some(pick) = selection::select_replacement(original, &slot, &operators).cloned() else {
            return Ok(None);
        };
        {
            let _guard = self.ctx.locks.lock(&pick.id).await;
            let mut current = self.ctx.assignment(pick.id).await?;
            if !current.is_open()
                || !current.task.is_default()
                || current.on_break.is_some()
                || current.covering.is_some()
            {
                return Ok(None);
            }
            lifecycle::supersede(&mut current, now)?;
            self.ctx.storage.save_assignment(&current).await?;
            self.ctx.monitor.cancel_all(pick.id).await;
            self.ctx.expire_requests(pick.id, now).await?;
            self.ctx
                .record(
                    AuditEntry::new(Actor::System, "assignment.superseded", pick.id, now)
                        .with_metadata(json!({ "escalation_of": original.id })),
                );
        }

        let mut replacement = Assignment::new(
            pick.operator,
            original.shift,
            original.hour,
            original.task.clone(),
            (original.starts_at, original.ends_at),
            now,
        );
        replacement.params = original.params.clone();
        replacement.replaces = Some(original.id);
        if !self.create(replacement.clone(), Actor::System, now).await? {
            return Ok(None);
        }
        info!(
            assignment = %replacement.id,
            operator = %replacement.operator,
            replaces = %original.id,
            "replacement assigned"
        );
        Ok(Some(replacement))
    }

    async fn end_break(&self, id: AssignmentId, request: RequestId, now: Time) -> Result<TimerOutcome> {
        let _guard = self.ctx.locks.lock(&id).await;
        let mut assignment = self.ctx.assignment(id).await?;
        match self.resume(&mut assignment, request, Actor::System, now).await? {
            true => Ok(TimerOutcome::Applied),
            false => Ok(TimerOutcome::Stale),
        }
    }

    /// Operator ends their own break before the timer does.
    pub async fn end_break_early(
        &self,
        id: AssignmentId,
        operator: &OperatorId,
        now: Time,
    ) -> Result<Assignment> {
        let _guard = self.ctx.locks.lock(&id).await;
        let mut assignment = self.ctx.assignment(id).await?;
        if &assignment.operator != operator {
            return Err(EngineError::Forbidden("you can only end your own break".to_string()));
        }
        let Some(request) = assignment.on_break.as_ref().map(|p| p.request) else {
            return Err(EngineError::BreakNotAllowed("no break is running on this assignment".to_string()));
        };
        self.resume(&mut assignment, request, Actor::Operator(operator.clone()), now).await?;
        self.ctx.monitor.cancel_break(id).await;
        Ok(assignment)
    }

    /// End the break granted by `request` and hand any covered task back.
    /// Returns `false` when that break is no longer running. Caller holds
    /// the assignment lock.
    async fn resume(
        &self,
        assignment: &mut Assignment,
        request: RequestId,
        actor: Actor,
        now: Time,
    ) -> Result<bool> {
        let Some(period) = assignment.on_break.clone() else { return Ok(false) };
        if !lifecycle::end_break(assignment, request) {
            return Ok(false);
        }
        self.ctx.storage.save_assignment(assignment).await?;
        self.ctx.release_cover(assignment.id, &period, now).await?;

        let early = period.ends_at > now;
        info!(assignment = %assignment.id, operator = %assignment.operator, early, "break over");
        self.ctx.tell_operator(&assignment.operator, OperatorNotice::BreakOver { assignment: assignment.id });
        self.ctx.record(
            AuditEntry::new(actor, "break.ended", assignment.id, now)
                .with_metadata(json!({ "request": request, "early": early })),
        );
        Ok(true)
    }

    // === Shifts ===

    /// Open a shift at the local hour containing `start`.
    ///
    /// Listed operators are moved out of any other open shift.
    pub async fn open_shift(
        &self,
        start: Time,
        roster: Vec<OperatorId>,
        now: Time,
    ) -> Result<Shift> {
        let settings = self.ctx.settings.get();
        for operator in &roster {
            if self.ctx.storage.load_operator(operator).await?.is_none() {
                return Err(EngineError::not_found(format!("operator {operator}")));
            }
        }

        let _cycle = self.ctx.cycle.lock().await;
        for operator in &roster {
            self.remove_from_other_shifts(operator, None, now).await?;
        }
        let start = floor_to_local_hour(start, settings.offset());
        let shift = Shift::new(start, settings.timezone.clone(), roster, now);
        self.ctx.storage.save_shift(&shift).await?;

        info!(shift = %shift.id, start = %shift.start_at, roster = shift.roster.len(), "shift opened");
        self.ctx
            .record(
                AuditEntry::new(Actor::System, "shift.opened", shift.id, now)
                    .with_metadata(json!({ "start": shift.start_at, "roster": shift.roster })),
            );
        Ok(shift)
    }

    /// Add an operator to a running shift. If the current hour is already
    /// scheduled they get the default task right away.
    pub async fn join_shift(&self, shift_id: ShiftId, operator: &OperatorId, now: Time) -> Result<Shift> {
        if self.ctx.storage.load_operator(operator).await?.is_none() {
            return Err(EngineError::not_found(format!("operator {operator}")));
        }
        let _cycle = self.ctx.cycle.lock().await;
        let mut shift = self.live_shift(shift_id, now).await?;
        self.remove_from_other_shifts(operator, Some(shift_id), now).await?;
        shift.roster.insert(operator.clone());
        self.ctx.storage.save_shift(&shift).await?;

        info!(shift = %shift_id, operator = %operator, "operator joined shift");
        self.ctx
            .record(
                AuditEntry::new(Actor::Operator(operator.clone()), "shift.joined", shift_id, now),
            );

        if let Some(hour) = shift.hour_index_at(now) {
            let existing = self.ctx.storage.list_assignments(&AssignmentFilter::slot(shift.id, hour)).await?;
            if !existing.is_empty() {
                self.backfill(&shift, hour, &existing, now).await?;
            }
        }
        Ok(shift)
    }

    /// Remove an operator from a shift. Their open assignments in it are superseded.
    pub async fn leave_shift(&self, shift_id: ShiftId, operator: &OperatorId, now: Time) -> Result<Shift> {
        let _cycle = self.ctx.cycle.lock().await;
        let mut shift = self
            .ctx
            .storage
            .load_shift(shift_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("shift {shift_id}")))?;
        if !shift.roster.remove(operator) {
            return Err(EngineError::InvalidInput(format!("{operator} is not on shift {shift_id}")));
        }
        self.ctx.storage.save_shift(&shift).await?;
        self.retire_open(&shift, operator, now).await?;

        info!(shift = %shift_id, operator = %operator, "operator left shift");
        self.ctx
            .record(AuditEntry::new(Actor::Operator(operator.clone()), "shift.left", shift_id, now));
        Ok(shift)
    }

    async fn live_shift(&self, shift_id: ShiftId, now: Time) -> Result<Shift> {
        let shift = self
            .ctx
            .storage
            .load_shift(shift_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("shift {shift_id}")))?;
        if shift.ended_at.is_some() || shift.end_at() <= now {
            return Err(EngineError::InvalidInput(format!("shift {shift_id} has ended")));
        }
        Ok(shift)
    }

    async fn remove_from_other_shifts(
        &self,
        operator: &OperatorId,
        keep: Option<ShiftId>,
        now: Time,
    ) -> Result<()> {
        for mut other in self.ctx.storage.list_shifts().await? {
            let live = other.ended_at.is_none() && other.end_at() > now;
            if !live || Some(other.id) == keep || !other.roster.remove(operator) {
                continue;
            }
            self.ctx.storage.save_shift(&other).await?;
            self.retire_open(&other, operator, now).await?;
            info!(shift = %other.id, operator = %operator, "operator moved out of shift");
        }
        Ok(())
    }

    async fn retire_open(&self, shift: &Shift, operator: &OperatorId, now: Time) -> Result<()> {
        let open = AssignmentFilter {
            operator: Some(operator.clone()),
            shift: Some(shift.id),
            hour: None,
            open_only: true,
        };
        for assignment in self.ctx.storage.list_assignments(&open).await? {
            self.supersede(assignment.id, Actor::System, now).await?;
        }
        Ok(())
    }

    // === Operators and templates ===

    /// Register an operator seen in the operator role, or refresh an existing one.
    pub async fn observe_operator(&self, id: OperatorId, display_name: &str, now: Time) -> Result<Operator> {
        let operator = match self.ctx.storage.load_operator(&id).await? {
            Some(mut existing) => {
                existing.display_name = display_name.to_string();
                existing.is_active = true;
                existing.updated_at = now;
                existing
            }
            None => {
                info!(operator = %id, "new operator");
                Operator::new(id, display_name, now)
            }
        };
        self.ctx.storage.save_operator(&operator).await?;
        self.ctx
            .record(AuditEntry::new(Actor::System, "operator.observed", &operator.id, now));
        Ok(operator)
    }

    /// Mark an operator inactive. Operators are never deleted.
    pub async fn deactivate_operator(&self, id: &OperatorId, now: Time) -> Result<Operator> {
        let mut operator = self
            .ctx
            .storage
            .load_operator(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("operator {id}")))?;
        operator.is_active = false;
        operator.updated_at = now;
        self.ctx.storage.save_operator(&operator).await?;
        info!(operator = %id, "operator deactivated");
        self.ctx.record(AuditEntry::new(Actor::System, "operator.deactivated", id, now));
        Ok(operator)
    }

    /// Create or update a template.
    pub async fn upsert_template(
        &self,
        mut template: TaskTemplate,
        admin: &OperatorId,
        now: Time,
    ) -> Result<TaskTemplate> {
        template.name = template.name.trim().to_string();
        template.validate().map_err(EngineError::InvalidInput)?;
        if let Some(bound) = &template.bound_operator {
            if self.ctx.storage.load_operator(bound).await?.is_none() {
                return Err(EngineError::not_found(format!("operator {bound}")));
            }
        }
        if let Some(existing) = self.ctx.storage.load_template(&template.name).await? {
            template.created_at = existing.created_at;
        }
        template.updated_at = now;
        self.ctx.storage.save_template(&template).await?;

        info!(template = %template.name, priority = template.priority, "template saved");
        self.ctx
            .record(AuditEntry::new(Actor::Admin(admin.clone()), "template.upserted", &template.name, now));
        Ok(template)
    }

    /// Tombstone a template. Assignments that reference it keep working.
    pub async fn retire_template(&self, name: &str, admin: &OperatorId, now: Time) -> Result<TaskTemplate> {
        let mut template = self
            .ctx
            .storage
            .load_template(name)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("template '{name}'")))?;
        template.retired = true;
        template.updated_at = now;
        self.ctx.storage.save_template(&template).await?;
        info!(template = %name, "template retired");
        self.ctx
            .record(AuditEntry::new(Actor::Admin(admin.clone()), "template.retired", name, now));
        Ok(template)
    }
}
