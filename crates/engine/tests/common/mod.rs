#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rota_core::{
    ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AuditEntry, Operator, OperatorId,
    RequestFilter, RequestId, Settings, Shift, ShiftId, TaskRef, TaskTemplate, Time,
};
use rota_engine::{
    AdminNotice, Engine, EngineConfig, ManualClock, OperatorNotice, RecordingNotifier, TimerEvents,
    TimerFired, TimerOutcome,
};
use rota_storage::{MemoryStorage, Storage};

pub fn t0() -> Time {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn op(id: &str) -> OperatorId {
    OperatorId::new(id)
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: Arc<dyn Storage>,
    pub timers: TimerEvents,
    pub admin: OperatorId,
}

impl Harness {
    /// Engine at `t0()` in UTC with the given operators registered.
    pub async fn new(operators: &[&str]) -> Self {
        Self::over(Arc::new(MemoryStorage::new()), operators).await
    }

    /// Same, over a caller-supplied store.
    pub async fn over(storage: Arc<dyn Storage>, operators: &[&str]) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(RecordingNotifier::new());
        let (engine, timers) = Engine::builder(storage.clone())
            .clock(clock.clone())
            .notifier(notifier.clone())
            .config(EngineConfig::default())
            .build()
            .await
            .unwrap();

        let admin = op("admin");
        engine.update_settings("utc_offset_minutes", "0", &admin).await.unwrap();
        for id in operators {
            engine.observe_operator(op(id), &id.to_uppercase()).await.unwrap();
        }
        Self { engine, clock, notifier, storage, timers, admin }
    }

    /// Same, plus a shift opened at `t0()` with every operator on the roster.
    pub async fn with_shift(operators: &[&str]) -> (Self, Shift) {
        Self::with_shift_over(Arc::new(MemoryStorage::new()), operators).await
    }

    pub async fn with_shift_over(storage: Arc<dyn Storage>, operators: &[&str]) -> (Self, Shift) {
        let h = Self::over(storage, operators).await;
        let shift = h
            .engine
            .open_shift(t0(), operators.iter().map(|id| op(id)).collect())
            .await
            .unwrap();
        (h, shift)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Collect every timer event that fires within a short grace period.
    pub async fn fired(&mut self) -> Vec<TimerFired> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(StdDuration::from_millis(200), self.timers.recv()).await
        {
            events.push(event);
        }
        events
    }

    /// Collect fired timers and apply them.
    pub async fn drain(&mut self) -> Vec<(TimerFired, TimerOutcome)> {
        let mut outcomes = Vec::new();
        for event in self.fired().await {
            let outcome = self.engine.handle_timer(event).await.unwrap();
            outcomes.push((event, outcome));
        }
        outcomes
    }

    /// The open assignment of an operator.
    pub async fn current(&self, id: &str) -> Assignment {
        self.engine
            .status()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.operator.as_str() == id)
            .unwrap_or_else(|| panic!("{id} has no open assignment"))
    }

    pub async fn assignment(&self, assignment: &Assignment) -> Assignment {
        self.storage.load_assignment(assignment.id).await.unwrap().unwrap()
    }

    pub async fn lead(&self) -> OperatorId {
        self.engine
            .status()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.task == TaskRef::Lead)
            .map(|a| a.operator)
            .unwrap()
    }

    /// Start every open assignment.
    pub async fn start_all(&self) {
        for a in self.engine.status().await.unwrap() {
            self.engine.start(a.id, &a.operator).await.unwrap();
        }
    }

    /// Notices delivered to one operator so far.
    pub async fn notices_for(&self, id: &OperatorId) -> Vec<OperatorNotice> {
        self.engine.flush().await;
        self.notifier.notices_for(id).await
    }

    pub async fn admin_notices(&self) -> Vec<AdminNotice> {
        self.engine.flush().await;
        self.notifier.admin_notices().await
    }

    pub async fn audit_count(&self, action: &str) -> usize {
        self.engine.flush().await;
        self.storage
            .list_audit()
            .await
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

/// In-memory store whose decision commits take a while, like a disk or a
/// remote database would.
pub struct SlowCommits {
    inner: MemoryStorage,
    delay: StdDuration,
}

impl SlowCommits {
    pub fn new(delay: StdDuration) -> Self {
        Self { inner: MemoryStorage::new(), delay }
    }
}

type StoreResult<T> = rota_storage::Result<T>;

#[async_trait]
impl Storage for SlowCommits {
    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        self.inner.load_settings().await
    }
    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.inner.save_settings(settings).await
    }
    async fn save_operator(&self, operator: &Operator) -> StoreResult<()> {
        self.inner.save_operator(operator).await
    }
    async fn load_operator(&self, id: &OperatorId) -> StoreResult<Option<Operator>> {
        self.inner.load_operator(id).await
    }
    async fn list_operators(&self) -> StoreResult<Vec<Operator>> {
        self.inner.list_operators().await
    }
    async fn save_shift(&self, shift: &Shift) -> StoreResult<()> {
        self.inner.save_shift(shift).await
    }
    async fn load_shift(&self, id: ShiftId) -> StoreResult<Option<Shift>> {
        self.inner.load_shift(id).await
    }
    async fn list_shifts(&self) -> StoreResult<Vec<Shift>> {
        self.inner.list_shifts().await
    }
    async fn save_template(&self, template: &TaskTemplate) -> StoreResult<()> {
        self.inner.save_template(template).await
    }
    async fn load_template(&self, name: &str) -> StoreResult<Option<TaskTemplate>> {
        self.inner.load_template(name).await
    }
    async fn list_templates(&self) -> StoreResult<Vec<TaskTemplate>> {
        self.inner.list_templates().await
    }
    async fn insert_assignment_if_vacant(&self, assignment: &Assignment) -> StoreResult<bool> {
        self.inner.insert_assignment_if_vacant(assignment).await
    }
    async fn save_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        self.inner.save_assignment(assignment).await
    }
    async fn load_assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        self.inner.load_assignment(id).await
    }
    async fn list_assignments(&self, filter: &AssignmentFilter) -> StoreResult<Vec<Assignment>> {
        self.inner.list_assignments(filter).await
    }
    async fn save_request(&self, request: &ApprovalRequest) -> StoreResult<()> {
        self.inner.save_request(request).await
    }
    async fn load_request(&self, id: RequestId) -> StoreResult<Option<ApprovalRequest>> {
        self.inner.load_request(id).await
    }
    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<ApprovalRequest>> {
        self.inner.list_requests(filter).await
    }
    async fn commit_decision(
        &self,
        request: &ApprovalRequest,
        assignment: Option<&Assignment>,
    ) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.commit_decision(request, assignment).await
    }
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.inner.append_audit(entry).await
    }
    async fn list_audit(&self) -> StoreResult<Vec<AuditEntry>> {
        self.inner.list_audit().await
    }
}
