//! Approval workflow - operator requests behind an admin gate.
//!
//! A request is validated on submit and again when it is approved. A
//! decision is committed only after the change applied cleanly, so a failed
//! approval leaves the request `Pending` for the admin to retry or deny.

use std::sync::Arc;

use chrono::Duration;
use rota_core::{
    Actor, ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AssignmentStatus,
    AuditEntry, BreakKind, BreakPeriod, Decision, OperatorId, Params, RequestFilter, RequestId,
    RequestKind, RequestPayload, RequestStatus, Time,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::lifecycle;
use crate::notify::{AdminNotice, FieldChange, OperatorNotice};
use crate::selection;

/// Submits and decides approval requests.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    ctx: Arc<EngineContext>,
}

impl ApprovalWorkflow {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Submit a request for an assignment.
    ///
    /// Fails with `DuplicatePending` when a request of the same kind awaits a
    /// decision, `CooldownActive` when the operator asked for the same kind
    /// too recently and `InvalidPayload` when an edit does not fit the
    /// template schema. Break requests are also checked against the staffing
    /// floor and the long-break hours.
    pub async fn submit(
        &self,
        assignment_id: AssignmentId,
        requested_by: &OperatorId,
        reason: &str,
        payload: RequestPayload,
        now: Time,
    ) -> Result<ApprovalRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidInput("a reason is required".to_string()));
        }
        let kind = payload.kind();

        let _guard = self.ctx.locks.lock(&assignment_id).await;
        let assignment = self.ctx.assignment(assignment_id).await?;
        if &assignment.operator != requested_by {
            return Err(EngineError::Forbidden(
                "only the assigned operator can request changes to this assignment".to_string(),
            ));
        }
        if assignment.status != AssignmentStatus::Active {
            return Err(EngineError::GuardViolation {
                action: "request changes to",
                status: assignment.status,
            });
        }

        let duplicate = RequestFilter { kind: Some(kind), ..RequestFilter::pending_for(assignment_id) };
        if !self.ctx.storage.list_requests(&duplicate).await?.is_empty() {
            return Err(EngineError::DuplicatePending(kind));
        }
        self.check_cooldown(requested_by, kind, now).await?;

        let changes = match &payload {
            RequestPayload::Edit(diff) => {
                let schema = self.ctx.schema_for(&assignment.task).await?;
                lifecycle::validate_edit(diff, schema.as_ref())?;
                diff_view(&assignment, diff)
            }
            RequestPayload::Break(break_kind) => {
                self.check_break(&assignment, *break_kind).await?;
                Vec::new()
            }
            RequestPayload::EndEarly => Vec::new(),
        };

        let request = ApprovalRequest::new(assignment_id, requested_by.clone(), reason, payload, now);
        self.ctx.storage.save_request(&request).await?;

        info!(request = %request.id, assignment = %assignment_id, operator = %requested_by, %kind, "request submitted");
        self.ctx
            .record(
                AuditEntry::new(Actor::Operator(requested_by.clone()), "request.submitted", request.id, now)
                    .with_metadata(json!({ "assignment": assignment_id, "kind": kind, "reason": reason })),
            );
        self.ctx
            .tell_admins(AdminNotice::ApprovalRequested {
                request: request.id,
                operator: requested_by.clone(),
                kind,
                reason: reason.to_string(),
                changes,
            });
        Ok(request)
    }

    /// Approve or deny a pending request.
    ///
    /// Concurrent decisions on the same request serialize on the assignment
    /// lock: the first one wins and the rest get `AlreadyDecided`.
    pub async fn decide(
        &self,
        request_id: RequestId,
        decision: Decision,
        admin: &OperatorId,
        now: Time,
    ) -> Result<ApprovalRequest> {
        let peek = self.ctx.request(request_id).await?;
        if peek.status.is_terminal() {
            return Err(EngineError::AlreadyDecided(request_id, peek.status));
        }

        let _guard = self.ctx.locks.lock(&peek.assignment).await;
        let mut request = self.ctx.request(request_id).await?;
        if request.status.is_terminal() {
            return Err(EngineError::AlreadyDecided(request_id, request.status));
        }
        let mut assignment = self.ctx.assignment(request.assignment).await?;
        let running_break = assignment.on_break.clone();

        // A break approval keeps the staffing lock until its decision is
        // stored, so the next one counts it.
        let staffing = match (decision, &request.payload) {
            (Decision::Approve, RequestPayload::Break(_)) => Some(self.ctx.staffing.lock().await),
            _ => None,
        };
        let applied = match decision {
            Decision::Approve => {
                self.apply(&mut assignment, &request, now).await?;
                true
            }
            Decision::Deny => false,
        };

        request.decide(decision, admin.clone(), now);
        self.ctx
            .storage
            .commit_decision(&request, applied.then_some(&assignment))
            .await?;
        drop(staffing);

        if applied {
            match &request.payload {
                RequestPayload::EndEarly => {
                    self.ctx.monitor.cancel_all(assignment.id).await;
                    let expired = self.ctx.expire_requests(assignment.id, now).await?;
                    if let Some(period) = &running_break {
                        self.ctx.release_cover(assignment.id, period, now).await?;
                    }
                    debug!(assignment = %assignment.id, expired, "assignment ended early");
                }
                RequestPayload::Break(_) => {
                    if let Some(period) = &assignment.on_break {
                        self.ctx.monitor.arm_break(assignment.id, request.id, period.ends_at).await;
                    }
                    if let Err(e) = self.ctx.cover_break(&mut assignment, now).await {
                        warn!(assignment = %assignment.id, error = %e, "break coverage failed");
                    }
                }
                RequestPayload::Edit(_) => {}
            }
        }

        let kind = request.kind();
        let action = match request.status {
            RequestStatus::Approved => "request.approved",
            _ => "request.denied",
        };
        info!(request = %request_id, assignment = %assignment.id, admin = %admin, %kind, status = %request.status, "request decided");
        self.ctx
            .record(
                AuditEntry::new(Actor::Admin(admin.clone()), action, request_id, now)
                    .with_metadata(json!({ "assignment": assignment.id, "kind": kind })),
            );
        self.ctx
            .tell_operator(
                &request.requested_by,
                OperatorNotice::Decided { request: request_id, kind, status: request.status },
            );
        Ok(request)
    }

    /// Apply an approved request to the assignment in memory. Break
    /// approvals run with the staffing lock held.
    async fn apply(&self, assignment: &mut Assignment, request: &ApprovalRequest, now: Time) -> Result<()> {
        match &request.payload {
            RequestPayload::Edit(diff) => {
                let schema = self.ctx.schema_for(&assignment.task).await?;
                lifecycle::apply_edit(assignment, diff, schema.as_ref())
            }
            RequestPayload::EndEarly => lifecycle::end_early(assignment, &request.reason, now),
            RequestPayload::Break(kind) => {
                self.check_break(assignment, *kind).await?;
                let period = BreakPeriod {
                    kind: *kind,
                    started_at: now,
                    ends_at: now + self.ctx.config.break_length(*kind),
                    request: request.id,
                    covered_by: None,
                };
                lifecycle::begin_break(assignment, period)
            }
        }
    }

    async fn check_cooldown(&self, operator: &OperatorId, kind: RequestKind, now: Time) -> Result<()> {
        let settings = self.ctx.settings.get();
        let secs = match kind {
            RequestKind::Edit => settings.cooldown_edit_sec,
            RequestKind::EndEarly => settings.cooldown_end_early_sec,
            RequestKind::Break => settings.cooldown_break_sec,
        };
        let window = Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000));

        let previous = RequestFilter {
            requested_by: Some(operator.clone()),
            kind: Some(kind),
            ..RequestFilter::default()
        };
        let last = self
            .ctx
            .storage
            .list_requests(&previous)
            .await?
            .into_iter()
            .map(|r| r.requested_at)
            .max();
        if let Some(last) = last {
            let elapsed = now - last;
            if elapsed < window {
                let remaining_secs = (window - elapsed).num_seconds().max(1);
                return Err(EngineError::CooldownActive { kind, remaining_secs });
            }
        }
        Ok(())
    }

    /// Break preconditions: not already on break or covering for someone,
    /// long breaks only in the configured hours, and enough operators left
    /// on duty.
    async fn check_break(&self, assignment: &Assignment, kind: BreakKind) -> Result<()> {
        if assignment.on_break.is_some() {
            return Err(EngineError::BreakNotAllowed("already on a break".to_string()));
        }
        let long_hours = &self.ctx.config.long_break_hours;
        if kind == BreakKind::Long && !long_hours.contains(&assignment.hour.get()) {
            return Err(EngineError::BreakNotAllowed(format!(
                "long breaks are only allowed in hours {long_hours:?}"
            )));
        }

        let open = self.ctx.storage.list_assignments(&AssignmentFilter::open()).await?;
        let on_duty = selection::count_on_duty(&open);
        let minimum = self.ctx.settings.get().min_on_duty;
        if !selection::staffing_allows_break(on_duty, minimum) {
            warn!(assignment = %assignment.id, on_duty, minimum, "break refused by staffing floor");
            return Err(EngineError::StaffingFloor { remaining: on_duty.saturating_sub(1), minimum });
        }
        if let Some(coverage) = &assignment.covering {
            return Err(EngineError::BreakNotAllowed(format!(
                "covering {} for {} until their break ends",
                coverage.task, coverage.operator
            )));
        }
        Ok(())
    }
}

/// Current to proposed values for the admin notice.
fn diff_view(assignment: &Assignment, diff: &Params) -> Vec<FieldChange> {
    diff.iter()
        .map(|(field, proposed)| FieldChange {
            field: field.clone(),
            current: assignment.params.get(field).cloned(),
            proposed: proposed.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rota_core::{HourIndex, ShiftId, TaskRef};
    use serde_json::json;

    #[test]
    fn diff_view_shows_current_values() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let mut a = Assignment::new(
            OperatorId::new("a"),
            ShiftId::new(),
            HourIndex::FIRST,
            TaskRef::DataLabelling,
            (now, now + Duration::hours(1)),
            now,
        );
        a.params.insert("queue".into(), json!("vision"));
        let diff = Params::from([
            ("queue".to_string(), json!("audio")),
            ("batch".to_string(), json!(40)),
        ]);

        let view = diff_view(&a, &diff);
        assert_eq!(view.len(), 2);
        let queue = view.iter().find(|c| c.field == "queue").unwrap();
        assert_eq!(queue.current, Some(json!("vision")));
        assert_eq!(queue.proposed, json!("audio"));
        let batch = view.iter().find(|c| c.field == "batch").unwrap();
        assert_eq!(batch.current, None);
    }
}
