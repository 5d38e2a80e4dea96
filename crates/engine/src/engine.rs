//! The engine facade - inbound events and the run loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rota_core::{
    next_local_hour, Actor, ApprovalRequest, Assignment, AssignmentFilter, AssignmentId,
    AuditEntry, BreakKind, Decision, Operator, OperatorId, Params, RequestFilter, RequestId,
    RequestPayload, Settings, Shift, ShiftId, TaskRef, TaskTemplate, Time,
};
use rota_storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::approval::ApprovalWorkflow;
use crate::audit::{AuditSink, StorageAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::escalation::{EscalationMonitor, TimerEvents, TimerFired};
use crate::locks::KeyedLocks;
use crate::notify::{LogNotifier, Notifier};
use crate::outbox::Outbox;
use crate::scheduler::{CycleReport, SchedulingEngine, TimerOutcome};
use crate::settings::SettingsHandle;
use crate::widget::Widget;

/// Process configuration, fixed for the lifetime of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds after creation before an acknowledgment reminder
    pub reminder_after_secs: u64,
    /// Seconds after creation before escalation
    pub escalate_after_secs: u64,
    /// Short break length in minutes
    pub short_break_mins: i64,
    /// Long break length in minutes
    pub long_break_mins: i64,
    /// Hour indices in which long breaks are allowed
    pub long_break_hours: Vec<u8>,
    /// Seconds to wait before retrying a failed cycle
    pub retry_delay_secs: u64,
    /// Seconds before one notice or audit write is given up on
    pub notify_timeout_secs: u64,
}

/// Longest break the engine accepts, in minutes.
pub const MAX_BREAK_MINS: i64 = 24 * 60;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_after_secs: 300,
            escalate_after_secs: 600,
            short_break_mins: 15,
            long_break_mins: 60,
            long_break_hours: vec![3, 4, 5],
            retry_delay_secs: 60,
            notify_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Delay before the acknowledgment reminder.
    pub fn reminder_after(&self) -> Duration {
        secs(self.reminder_after_secs)
    }

    /// Delay before escalation.
    pub fn escalate_after(&self) -> Duration {
        secs(self.escalate_after_secs)
    }

    /// Length of a break.
    pub fn break_length(&self, kind: BreakKind) -> Duration {
        match kind {
            BreakKind::Short => Duration::minutes(self.short_break_mins),
            BreakKind::Long => Duration::minutes(self.long_break_mins),
        }
    }

    /// Delay before retrying a failed cycle.
    pub fn retry_delay(&self) -> Duration {
        secs(self.retry_delay_secs)
    }

    /// Per-item delivery timeout for notices and audit entries.
    pub fn notify_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.notify_timeout_secs)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.escalate_after_secs <= self.reminder_after_secs {
            return Err(EngineError::InvalidInput(
                "escalate_after_secs must be greater than reminder_after_secs".to_string(),
            ));
        }
        let allowed = 1..=MAX_BREAK_MINS;
        if !allowed.contains(&self.short_break_mins) || !allowed.contains(&self.long_break_mins) {
            return Err(EngineError::InvalidInput(format!(
                "break lengths must be between 1 and {MAX_BREAK_MINS} minutes"
            )));
        }
        if self.notify_timeout_secs == 0 {
            return Err(EngineError::InvalidInput("notify_timeout_secs must be positive".to_string()));
        }
        if let Some(hour) = self
            .long_break_hours
            .iter()
            .find(|&&h| !(1..=rota_core::SHIFT_HOURS).contains(&h))
        {
            return Err(EngineError::InvalidInput(format!("long break hour {hour} is outside the shift")));
        }
        Ok(())
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

/// Builds an [`Engine`] from its collaborators.
pub struct EngineBuilder {
    storage: Arc<dyn Storage>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn Notifier>>,
    audit: Option<Arc<dyn AuditSink>>,
    settings: Option<SettingsHandle>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Use a specific clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific notifier. Defaults to [`LogNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Use a specific audit sink. Defaults to the storage audit log.
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Share an already loaded settings handle.
    pub fn settings(mut self, settings: SettingsHandle) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the process configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine and the channel its timers report on.
    ///
    /// The receiver must be passed to [`Engine::run`], or drained by hand
    /// with [`Engine::handle_timer`]. Spawns the notice and audit workers, so
    /// it must run inside a Tokio runtime.
    pub async fn build(self) -> Result<(Engine, TimerEvents)> {
        self.config.validate()?;
        let settings = match self.settings {
            Some(handle) => handle,
            None => SettingsHandle::load(self.storage.clone()).await?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(StorageAuditSink::new(self.storage.clone())));
        let (monitor, timers) = EscalationMonitor::new(
            clock.clone(),
            self.config.reminder_after(),
            self.config.escalate_after(),
        );

        let outbox = Outbox::spawn(notifier, audit, self.config.notify_timeout());

        let ctx = Arc::new(EngineContext {
            storage: self.storage,
            clock,
            outbox,
            settings,
            monitor,
            config: self.config,
            locks: KeyedLocks::new(),
            cycle: Mutex::new(()),
            staffing: Mutex::new(()),
        });
        let engine = Engine {
            scheduler: SchedulingEngine::new(ctx.clone()),
            approvals: ApprovalWorkflow::new(ctx.clone()),
            ctx,
        };
        Ok((engine, timers))
    }
}

/// Assignment lifecycle and scheduling engine.
///
/// Every inbound event reads the current instant from the engine's clock.
/// The handle is cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    scheduler: SchedulingEngine,
    approvals: ApprovalWorkflow,
}

impl Engine {
    /// Start building an engine over a store.
    pub fn builder(storage: Arc<dyn Storage>) -> EngineBuilder {
        EngineBuilder {
            storage,
            clock: None,
            notifier: None,
            audit: None,
            settings: None,
            config: EngineConfig::default(),
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Recovers first, then runs the cycle at every local hour boundary and
    /// applies timer events as they arrive. A failed cycle is logged and
    /// retried after the configured delay.
    pub async fn run<F>(&self, mut timers: TimerEvents, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut next = match self.recover().await {
            Ok(report) => {
                info!(slots = report.slots.len(), closed = report.closed, "recovered");
                self.next_boundary()
            }
            Err(e) => self.retry_at(&e),
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                _ = self.ctx.clock.sleep_until(next) => {
                    next = match self.tick().await {
                        Ok(_) => self.next_boundary(),
                        Err(e) => self.retry_at(&e),
                    };
                }
                Some(event) = timers.recv() => {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = engine.handle_timer(event).await {
                            warn!(assignment = %event.assignment, kind = ?event.kind, error = %e, "timer handling failed");
                        }
                    });
                }
            }
        }

        self.ctx.monitor.shutdown().await;
        self.flush().await;
        Ok(())
    }

    fn next_boundary(&self) -> Time {
        next_local_hour(self.ctx.clock.now(), self.ctx.settings.get().offset())
    }

    fn retry_at(&self, e: &EngineError) -> Time {
        let at = self.ctx.clock.now() + self.ctx.config.retry_delay();
        error!(error = %e, retry_at = %at, "cycle failed");
        at
    }

    // === Scheduling ===

    /// Run the hourly cycle for the current instant.
    pub async fn tick(&self) -> Result<CycleReport> {
        self.scheduler.run_cycle(self.ctx.clock.now()).await
    }

    /// Report missed hours, schedule the current one and re-arm timers.
    pub async fn recover(&self) -> Result<CycleReport> {
        self.scheduler.recover(self.ctx.clock.now()).await
    }

    /// Apply a fired timer.
    pub async fn handle_timer(&self, event: TimerFired) -> Result<TimerOutcome> {
        self.scheduler.handle_timer(event, self.ctx.clock.now()).await
    }

    /// Operator starts their assignment.
    pub async fn start(&self, assignment: AssignmentId, operator: &OperatorId) -> Result<Assignment> {
        self.scheduler.start_assignment(assignment, operator, self.ctx.clock.now()).await
    }

    /// Admin assigns a task directly.
    pub async fn force_assign(
        &self,
        operator: &OperatorId,
        task: TaskRef,
        params: Params,
        admin: &OperatorId,
    ) -> Result<Assignment> {
        self.scheduler
            .force_assign(operator, task, params, admin, self.ctx.clock.now())
            .await
    }

    /// Operator comes back from a break before its timer runs out.
    pub async fn end_break(&self, assignment: AssignmentId, operator: &OperatorId) -> Result<Assignment> {
        self.scheduler.end_break_early(assignment, operator, self.ctx.clock.now()).await
    }

    // === Requests ===

    /// Ask for a parameter change.
    pub async fn submit_edit(
        &self,
        assignment: AssignmentId,
        operator: &OperatorId,
        reason: &str,
        diff: Params,
    ) -> Result<ApprovalRequest> {
        self.submit(assignment, operator, reason, RequestPayload::Edit(diff)).await
    }

    /// Ask to stop before the hour closes.
    pub async fn submit_end_early(
        &self,
        assignment: AssignmentId,
        operator: &OperatorId,
        reason: &str,
    ) -> Result<ApprovalRequest> {
        self.submit(assignment, operator, reason, RequestPayload::EndEarly).await
    }

    /// Ask for a break.
    pub async fn submit_break(
        &self,
        assignment: AssignmentId,
        operator: &OperatorId,
        reason: &str,
        kind: BreakKind,
    ) -> Result<ApprovalRequest> {
        self.submit(assignment, operator, reason, RequestPayload::Break(kind)).await
    }

    async fn submit(
        &self,
        assignment: AssignmentId,
        operator: &OperatorId,
        reason: &str,
        payload: RequestPayload,
    ) -> Result<ApprovalRequest> {
        self.approvals
            .submit(assignment, operator, reason, payload, self.ctx.clock.now())
            .await
    }

    /// Admin decides a request.
    pub async fn decide(
        &self,
        request: RequestId,
        decision: Decision,
        admin: &OperatorId,
    ) -> Result<ApprovalRequest> {
        self.approvals.decide(request, decision, admin, self.ctx.clock.now()).await
    }

    /// Requests matching a filter.
    pub async fn requests(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>> {
        Ok(self.ctx.storage.list_requests(filter).await?)
    }

    // === Shifts and operators ===

    /// Open a shift at the local hour containing `start`.
    pub async fn open_shift(&self, start: Time, roster: Vec<OperatorId>) -> Result<Shift> {
        self.scheduler.open_shift(start, roster, self.ctx.clock.now()).await
    }

    /// Add an operator to a running shift.
    pub async fn join_shift(&self, shift: ShiftId, operator: &OperatorId) -> Result<Shift> {
        self.scheduler.join_shift(shift, operator, self.ctx.clock.now()).await
    }

    /// Remove an operator from a shift.
    pub async fn leave_shift(&self, shift: ShiftId, operator: &OperatorId) -> Result<Shift> {
        self.scheduler.leave_shift(shift, operator, self.ctx.clock.now()).await
    }

    /// Register or refresh an operator.
    pub async fn observe_operator(&self, id: OperatorId, display_name: &str) -> Result<Operator> {
        self.scheduler.observe_operator(id, display_name, self.ctx.clock.now()).await
    }

    /// Mark an operator inactive.
    pub async fn deactivate_operator(&self, id: &OperatorId) -> Result<Operator> {
        self.scheduler.deactivate_operator(id, self.ctx.clock.now()).await
    }

    // === Templates ===

    /// Create or update a template.
    pub async fn upsert_template(&self, template: TaskTemplate, admin: &OperatorId) -> Result<TaskTemplate> {
        self.scheduler.upsert_template(template, admin, self.ctx.clock.now()).await
    }

    /// Retire a template.
    pub async fn retire_template(&self, name: &str, admin: &OperatorId) -> Result<TaskTemplate> {
        self.scheduler.retire_template(name, admin, self.ctx.clock.now()).await
    }

    // === Settings ===

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<Settings> {
        self.ctx.settings.get()
    }

    /// Change one setting by key.
    pub async fn update_settings(&self, key: &str, value: &str, admin: &OperatorId) -> Result<Arc<Settings>> {
        let settings = self.ctx.settings.update(|s| s.set(key, value)).await?;
        self.ctx
            .record(
                AuditEntry::new(Actor::Admin(admin.clone()), "settings.updated", key, self.ctx.clock.now())
                    .with_metadata(json!({ "value": value })),
            );
        Ok(settings)
    }

    /// Re-read settings from storage.
    pub async fn reload_settings(&self) -> Result<Arc<Settings>> {
        self.ctx.settings.reload().await
    }

    // === Views ===

    /// Every non-terminal assignment.
    pub async fn status(&self) -> Result<Vec<Assignment>> {
        Ok(self.ctx.storage.list_assignments(&AssignmentFilter::open()).await?)
    }

    /// Render the widget of an assignment.
    pub async fn widget(&self, assignment: AssignmentId) -> Result<Widget> {
        let assignment = self.ctx.assignment(assignment).await?;
        Ok(self.ctx.widget(&assignment).await)
    }

    /// Number of outstanding timers.
    pub async fn armed_timers(&self) -> usize {
        self.ctx.monitor.armed().await
    }

    /// Wait until every notice and audit entry queued so far was delivered
    /// or timed out.
    pub async fn flush(&self) {
        self.ctx.outbox.flush().await;
    }

    /// Backing store.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.ctx.storage.clone()
    }

    /// Engine clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.ctx.clock.clone()
    }

    /// Process configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }
}
