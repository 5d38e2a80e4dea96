//! State shared by the scheduler, the approval workflow and the run loop.

use std::sync::Arc;

use std::collections::BTreeMap;

use rota_core::{
    Actor, ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AuditEntry, BreakPeriod,
    Coverage, Operator, OperatorId, ParamSchema, RequestFilter, RequestId, RequestStatus, TaskRef,
    TaskTemplate, Time,
};
use rota_storage::Storage;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::engine::EngineConfig;
use crate::error::{EngineError, Result};
use crate::escalation::EscalationMonitor;
use crate::lifecycle;
use crate::locks::KeyedLocks;
use crate::notify::{AdminNotice, OperatorNotice};
use crate::outbox::Outbox;
use crate::selection;
use crate::settings::SettingsHandle;
use crate::widget::{render_widget, Widget};

pub(crate) struct EngineContext {
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub outbox: Outbox,
    pub settings: SettingsHandle,
    pub monitor: EscalationMonitor,
    pub config: EngineConfig,
    /// Serializes transitions per assignment.
    pub locks: KeyedLocks<AssignmentId>,
    /// Held for a whole hourly cycle, and by operations that create
    /// assignments outside of it.
    pub cycle: Mutex<()>,
    /// Held while a break approval checks and consumes staffing headroom.
    pub staffing: Mutex<()>,
}

impl EngineContext {
    pub async fn assignment(&self, id: AssignmentId) -> Result<Assignment> {
        self.storage
            .load_assignment(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("assignment {id}")))
    }

    pub async fn request(&self, id: RequestId) -> Result<ApprovalRequest> {
        self.storage
            .load_request(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("request {id}")))
    }

    pub async fn template_for(&self, task: &TaskRef) -> Result<Option<TaskTemplate>> {
        match task {
            TaskRef::Template(name) => Ok(self.storage.load_template(name).await?),
            _ => Ok(None),
        }
    }

    pub async fn schema_for(&self, task: &TaskRef) -> Result<Option<ParamSchema>> {
        Ok(self.template_for(task).await?.and_then(|t| t.params_schema))
    }

    pub async fn widget(&self, assignment: &Assignment) -> Widget {
        let template = match self.template_for(assignment.current_task()).await {
            Ok(t) => t,
            Err(e) => {
                warn!(assignment = %assignment.id, error = %e, "template lookup failed");
                None
            }
        };
        render_widget(assignment, template.as_ref(), &self.config.long_break_hours)
    }

    /// Expire the pending requests of an assignment that just became terminal.
    pub async fn expire_requests(&self, assignment: AssignmentId, now: Time) -> Result<usize> {
        let pending = self.storage.list_requests(&RequestFilter::pending_for(assignment)).await?;
        for mut request in pending.iter().cloned() {
            request.status = RequestStatus::Expired;
            request.decided_at = Some(now);
            self.storage.save_request(&request).await?;
        }
        Ok(pending.len())
    }

    pub fn record(&self, entry: AuditEntry) {
        self.outbox.record(entry);
    }

    pub fn tell_operator(&self, operator: &OperatorId, notice: OperatorNotice) {
        self.outbox.operator(operator, notice);
    }

    pub fn tell_admins(&self, notice: AdminNotice) {
        self.outbox.admins(notice);
    }

    /// Hand the task of an assignment that just went on break to a working
    /// default-task colleague in the same slot. Called with the lock of
    /// `on_break` held; takes the colleague's lock.
    pub async fn cover_break(&self, on_break: &mut Assignment, now: Time) -> Result<Option<AssignmentId>> {
        if on_break.task.is_default() || on_break.on_break.is_none() {
            return Ok(None);
        }
        let slot = self
            .storage
            .list_assignments(&AssignmentFilter::slot(on_break.shift, on_break.hour))
            .await?;
        let operators: BTreeMap<OperatorId, Operator> = self
            .storage
            .list_operators()
            .await?
            .into_iter()
            .map(|op| (op.id.clone(), op))
            .collect();
        let Some(pick) = selection::select_cover(on_break, &slot, &operators).map(|a| a.id) else {
            warn!(assignment = %on_break.id, task = %on_break.task, "no one free to cover break");
            return Ok(None);
        };

        let cover = {
            let _guard = self.locks.lock(&pick).await;
            let mut cover = self.assignment(pick).await?;
            let coverage = Coverage {
                of: on_break.id,
                operator: on_break.operator.clone(),
                task: on_break.task.clone(),
                params: on_break.params.clone(),
            };
            if lifecycle::begin_cover(&mut cover, coverage).is_err() {
                return Ok(None);
            }
            self.storage.save_assignment(&cover).await?;
            cover
        };
        if let Some(period) = on_break.on_break.as_mut() {
            period.covered_by = Some(cover.id);
        }
        self.storage.save_assignment(on_break).await?;

        info!(assignment = %on_break.id, cover = %cover.id, operator = %cover.operator, "break covered");
        self.record(
            AuditEntry::new(Actor::System, "break.covered", on_break.id, now)
                .with_metadata(json!({ "cover": cover.id, "operator": cover.operator })),
        );
        self.tell_operator(
            &cover.operator,
            OperatorNotice::Covering {
                assignment: cover.id,
                colleague: on_break.operator.clone(),
                task: on_break.task.name().to_string(),
            },
        );
        Ok(Some(cover.id))
    }

    /// Return a covered task to its owner once their break is over, however
    /// it ended. Called with the owner's lock held; takes the cover's lock.
    pub async fn release_cover(&self, of: AssignmentId, period: &BreakPeriod, now: Time) -> Result<()> {
        let Some(cover_id) = period.covered_by else { return Ok(()) };
        let cover = {
            let _guard = self.locks.lock(&cover_id).await;
            let mut cover = self.assignment(cover_id).await?;
            let task = cover.current_task().clone();
            if !cover.is_open() || !lifecycle::end_cover(&mut cover, of) {
                return Ok(());
            }
            self.storage.save_assignment(&cover).await?;
            (cover, task)
        };
        let (cover, task) = cover;

        info!(assignment = %of, cover = %cover_id, "covered task handed back");
        self.record(
            AuditEntry::new(Actor::System, "break.cover_ended", of, now)
                .with_metadata(json!({ "cover": cover_id })),
        );
        self.tell_operator(
            &cover.operator,
            OperatorNotice::CoverEnded { assignment: cover_id, task: task.name().to_string() },
        );
        Ok(())
    }
}
