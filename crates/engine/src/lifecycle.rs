//! Assignment state machine.
//!
//! ```text
//! Pending ──start──▶ Active ──hour closes──▶ Completed
//!    │                  └──approved end-early──▶ EndedEarly
//!    ├──ack deadline (non-default task)──▶ Escalated
//!    ├──hour closes──▶ Missed
//!    └──force-assign / replacement──▶ Superseded   (also from Active)
//! ```
//!
//! Breaks and break coverage are overlays on `Active`: they never change the
//! status, and every terminal transition drops them.
//!
//! Every function checks its guard before touching the assignment, so a
//! rejected transition leaves it unchanged.

use rota_core::{
    Assignment, AssignmentId, AssignmentStatus, BreakPeriod, Coverage, EscalationStage,
    ParamSchema, Params, RequestId, Time,
};

use crate::error::{EngineError, Result};

fn guard(assignment: &Assignment, action: &'static str, allowed: &[AssignmentStatus]) -> Result<()> {
    if allowed.contains(&assignment.status) {
        Ok(())
    } else {
        Err(EngineError::GuardViolation { action, status: assignment.status })
    }
}

/// `Pending → Active`, only inside the hour window.
pub fn start(assignment: &mut Assignment, now: Time) -> Result<()> {
    guard(assignment, "start", &[AssignmentStatus::Pending])?;
    if !assignment.in_window(now) {
        return Err(EngineError::OutsideWindow {
            starts_at: assignment.starts_at,
            ends_at: assignment.ends_at,
        });
    }
    assignment.status = AssignmentStatus::Active;
    assignment.acknowledged_at = Some(now);
    Ok(())
}

/// Record that the reminder went out. No status change.
pub fn remind(assignment: &mut Assignment) -> Result<()> {
    guard(assignment, "remind about", &[AssignmentStatus::Pending])?;
    assignment.escalation = EscalationStage::Reminded;
    Ok(())
}

/// `Pending → Escalated`. The default task is never escalated.
pub fn escalate(assignment: &mut Assignment, now: Time) -> Result<()> {
    guard(assignment, "escalate", &[AssignmentStatus::Pending])?;
    if assignment.task.is_default() {
        return Err(EngineError::InvalidInput(format!(
            "{} assignments are never escalated",
            assignment.task
        )));
    }
    assignment.status = AssignmentStatus::Escalated;
    assignment.escalation = EscalationStage::Escalated;
    assignment.ended_at = Some(now);
    Ok(())
}

/// Hour window closed: `Active → Completed`, `Pending → Missed`. A running
/// break ends with the hour.
pub fn close_hour(assignment: &mut Assignment) -> Result<AssignmentStatus> {
    guard(assignment, "close", &[AssignmentStatus::Pending, AssignmentStatus::Active])?;
    assignment.status = match assignment.status {
        AssignmentStatus::Active => AssignmentStatus::Completed,
        _ => AssignmentStatus::Missed,
    };
    assignment.on_break = None;
    assignment.covering = None;
    assignment.ended_at = Some(assignment.ends_at);
    Ok(assignment.status)
}

/// `Active → EndedEarly`, applied from an approved request.
pub fn end_early(assignment: &mut Assignment, reason: &str, now: Time) -> Result<()> {
    guard(assignment, "end early", &[AssignmentStatus::Active])?;
    assignment.status = AssignmentStatus::EndedEarly;
    assignment.on_break = None;
    assignment.covering = None;
    assignment.end_reason = Some(reason.to_string());
    assignment.ended_at = Some(now);
    Ok(())
}

/// `Pending | Active → Superseded`, when an admin or an escalation takes the slot.
pub fn supersede(assignment: &mut Assignment, now: Time) -> Result<()> {
    guard(assignment, "supersede", &[AssignmentStatus::Pending, AssignmentStatus::Active])?;
    assignment.status = AssignmentStatus::Superseded;
    assignment.on_break = None;
    assignment.covering = None;
    assignment.ended_at = Some(now);
    Ok(())
}

/// Check an edit diff against the template schema. Without a schema any
/// fields are accepted.
pub fn validate_edit(diff: &Params, schema: Option<&ParamSchema>) -> Result<()> {
    if diff.is_empty() {
        return Err(EngineError::InvalidPayload("the edit changes nothing".to_string()));
    }
    if let Some(schema) = schema {
        schema.check_diff(diff).map_err(EngineError::InvalidPayload)?;
    }
    Ok(())
}

/// Merge an approved edit into the current parameters. `null` removes a field.
pub fn apply_edit(assignment: &mut Assignment, diff: &Params, schema: Option<&ParamSchema>) -> Result<()> {
    guard(assignment, "edit", &[AssignmentStatus::Active])?;
    validate_edit(diff, schema)?;
    for (field, value) in diff {
        if value.is_null() {
            assignment.params.remove(field);
        } else {
            assignment.params.insert(field.clone(), value.clone());
        }
    }
    Ok(())
}

/// Put an active assignment on break.
pub fn begin_break(assignment: &mut Assignment, period: BreakPeriod) -> Result<()> {
    guard(assignment, "pause", &[AssignmentStatus::Active])?;
    if assignment.on_break.is_some() {
        return Err(EngineError::BreakNotAllowed("already on a break".to_string()));
    }
    assignment.on_break = Some(period);
    Ok(())
}

/// End the break granted by `request`. Returns `false` when that break is
/// no longer running.
pub fn end_break(assignment: &mut Assignment, request: RequestId) -> bool {
    match &assignment.on_break {
        Some(period) if period.request == request && assignment.is_open() => {
            assignment.on_break = None;
            true
        }
        _ => false,
    }
}

/// Let an active default-task assignment hold a colleague's task.
pub fn begin_cover(assignment: &mut Assignment, coverage: Coverage) -> Result<()> {
    guard(assignment, "cover with", &[AssignmentStatus::Active])?;
    if !assignment.task.is_default() || assignment.on_break.is_some() || assignment.covering.is_some() {
        return Err(EngineError::InvalidInput(format!(
            "{} cannot cover another task right now",
            assignment.operator
        )));
    }
    assignment.covering = Some(coverage);
    Ok(())
}

/// Hand a covered task back. Returns `false` when the assignment is not
/// covering `of` anymore.
pub fn end_cover(assignment: &mut Assignment, of: AssignmentId) -> bool {
    match &assignment.covering {
        Some(coverage) if coverage.of == of => {
            assignment.covering = None;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rota_core::{
        BreakKind, HourIndex, OperatorId, ParamField, ParamType, ShiftId, TaskRef,
    };
    use serde_json::json;

    fn t0() -> Time {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
    }

    fn pending(task: TaskRef) -> Assignment {
        Assignment::new(
            OperatorId::new("a"),
            ShiftId::new(),
            HourIndex::FIRST,
            task,
            (t0(), t0() + Duration::hours(1)),
            t0(),
        )
    }

    fn active() -> Assignment {
        let mut a = pending(TaskRef::Lead);
        start(&mut a, t0() + Duration::minutes(1)).unwrap();
        a
    }

    #[test]
    fn start_records_acknowledgment() {
        let mut a = pending(TaskRef::Lead);
        start(&mut a, t0() + Duration::minutes(3)).unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);
        assert_eq!(a.acknowledged_at, Some(t0() + Duration::minutes(3)));
    }

    #[test]
    fn start_twice_is_a_guard_violation() {
        let mut a = active();
        let before = a.clone();
        let err = start(&mut a, t0() + Duration::minutes(2)).unwrap_err();
        assert!(matches!(err, EngineError::GuardViolation { action: "start", .. }));
        assert_eq!(a, before);
    }

    #[test]
    fn start_outside_window_is_rejected() {
        let mut a = pending(TaskRef::Lead);
        let err = start(&mut a, t0() + Duration::minutes(61)).unwrap_err();
        assert!(matches!(err, EngineError::OutsideWindow { .. }));
        assert_eq!(a.status, AssignmentStatus::Pending);
    }

    #[test]
    fn default_task_never_escalates() {
        let mut a = pending(TaskRef::DataLabelling);
        assert!(escalate(&mut a, t0() + Duration::minutes(10)).is_err());
        assert_eq!(a.status, AssignmentStatus::Pending);

        let mut lead = pending(TaskRef::Lead);
        escalate(&mut lead, t0() + Duration::minutes(10)).unwrap();
        assert_eq!(lead.status, AssignmentStatus::Escalated);
        assert_eq!(lead.ended_at, Some(t0() + Duration::minutes(10)));
    }

    #[test]
    fn close_hour_completes_or_misses() {
        let mut a = active();
        assert_eq!(close_hour(&mut a).unwrap(), AssignmentStatus::Completed);
        assert_eq!(a.ended_at, Some(a.ends_at));

        let mut p = pending(TaskRef::DataLabelling);
        assert_eq!(close_hour(&mut p).unwrap(), AssignmentStatus::Missed);
        assert!(close_hour(&mut p).is_err());
    }

    #[test]
    fn end_early_requires_active() {
        let mut p = pending(TaskRef::Lead);
        assert!(end_early(&mut p, "network outage", t0()).is_err());

        let mut a = active();
        end_early(&mut a, "network outage", t0() + Duration::minutes(20)).unwrap();
        assert_eq!(a.status, AssignmentStatus::EndedEarly);
        assert_eq!(a.end_reason.as_deref(), Some("network outage"));
    }

    #[test]
    fn edit_on_terminal_assignment_is_rejected() {
        let mut a = active();
        end_early(&mut a, "done", t0()).unwrap();
        let diff = Params::from([("queue".to_string(), json!("audio"))]);
        assert!(matches!(apply_edit(&mut a, &diff, None), Err(EngineError::GuardViolation { .. })));
    }

    #[test]
    fn edit_merges_and_removes_fields() {
        let schema = ParamSchema {
            fields: vec![
                ParamField { name: "queue".into(), kind: ParamType::Text, required: true },
                ParamField { name: "note".into(), kind: ParamType::Text, required: false },
            ],
        };
        let mut a = active();
        a.params.insert("queue".into(), json!("vision"));
        a.params.insert("note".into(), json!("slow"));

        let diff = Params::from([
            ("queue".to_string(), json!("audio")),
            ("note".to_string(), serde_json::Value::Null),
        ]);
        apply_edit(&mut a, &diff, Some(&schema)).unwrap();
        assert_eq!(a.params.get("queue"), Some(&json!("audio")));
        assert!(!a.params.contains_key("note"));

        let bad = Params::from([("colour".to_string(), json!("red"))]);
        let before = a.params.clone();
        assert!(matches!(apply_edit(&mut a, &bad, Some(&schema)), Err(EngineError::InvalidPayload(_))));
        assert_eq!(a.params, before);
    }

    #[test]
    fn break_is_tracked_and_ended_by_its_request() {
        let mut a = active();
        let request = RequestId::new();
        let period = BreakPeriod {
            kind: BreakKind::Short,
            started_at: t0(),
            ends_at: t0() + Duration::minutes(15),
            request,
            covered_by: None,
        };
        begin_break(&mut a, period.clone()).unwrap();
        assert!(matches!(begin_break(&mut a, period), Err(EngineError::BreakNotAllowed(_))));
        assert_eq!(a.status, AssignmentStatus::Active);

        assert!(!end_break(&mut a, RequestId::new()));
        assert!(end_break(&mut a, request));
        assert!(a.on_break.is_none());
    }

    fn coverage_of(lead: &Assignment) -> Coverage {
        Coverage {
            of: lead.id,
            operator: lead.operator.clone(),
            task: lead.task.clone(),
            params: lead.params.clone(),
        }
    }

    #[test]
    fn only_active_default_task_can_cover() {
        let lead = active();
        let mut pending_dl = pending(TaskRef::DataLabelling);
        assert!(matches!(
            begin_cover(&mut pending_dl, coverage_of(&lead)),
            Err(EngineError::GuardViolation { .. })
        ));

        let mut other_lead = active();
        assert!(begin_cover(&mut other_lead, coverage_of(&lead)).is_err());

        let mut dl = pending(TaskRef::DataLabelling);
        start(&mut dl, t0() + Duration::minutes(2)).unwrap();
        begin_cover(&mut dl, coverage_of(&lead)).unwrap();
        assert_eq!(dl.current_task(), &TaskRef::Lead);
        assert!(begin_cover(&mut dl, coverage_of(&lead)).is_err());

        assert!(!end_cover(&mut dl, AssignmentId::new()));
        assert!(end_cover(&mut dl, lead.id));
        assert_eq!(dl.current_task(), &TaskRef::DataLabelling);
    }

    #[test]
    fn closing_the_hour_drops_coverage() {
        let lead = active();
        let mut dl = pending(TaskRef::DataLabelling);
        start(&mut dl, t0() + Duration::minutes(2)).unwrap();
        begin_cover(&mut dl, coverage_of(&lead)).unwrap();
        assert_eq!(close_hour(&mut dl).unwrap(), AssignmentStatus::Completed);
        assert!(dl.covering.is_none());
    }
}
