//! Selection - who leads this hour, and what everyone else does.
//!
//! Everything here is a pure function over an explicit snapshot. No storage,
//! no clock, no randomness.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rota_core::{
    Assignment, AssignmentStatus, Operator, OperatorId, TaskRef, TaskTemplate, DEFAULT_PRIORITY,
};

/// Least-recently-used order: never-led first, then oldest `last_lead_at`, then id.
fn lru_order(a: &Operator, b: &Operator) -> Ordering {
    a.last_lead_at.cmp(&b.last_lead_at).then_with(|| a.id.cmp(&b.id))
}

/// Pick this hour's Lead.
///
/// The operator who led the immediately preceding hour-slot is excluded
/// unless they are the only one on the roster. Returns `None` for an empty
/// roster.
pub fn select_lead<'a>(roster: &'a [Operator], previous: Option<&OperatorId>) -> Option<&'a Operator> {
    roster
        .iter()
        .filter(|op| roster.len() == 1 || Some(&op.id) != previous)
        .min_by(|a, b| lru_order(a, b))
}

/// Map every roster member to a task.
///
/// The Lead gets [`TaskRef::Lead`]. Everyone else gets the default task
/// unless a non-retired template bound to them is more urgent than the
/// default and its window covers `local_hour`; among several such templates
/// the most urgent wins, then the alphabetically first.
pub fn assign_defaults(
    roster: &[Operator],
    lead: Option<&OperatorId>,
    templates: &[TaskTemplate],
    local_hour: u32,
) -> BTreeMap<OperatorId, TaskRef> {
    roster
        .iter()
        .map(|op| {
            if Some(&op.id) == lead {
                return (op.id.clone(), TaskRef::Lead);
            }
            let bound = templates
                .iter()
                .filter(|t| {
                    !t.retired
                        && t.bound_operator.as_ref() == Some(&op.id)
                        && t.priority < DEFAULT_PRIORITY
                        && t.in_window(local_hour)
                })
                .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
            let task = match bound {
                Some(t) => TaskRef::Template(t.name.clone()),
                None => TaskRef::DataLabelling,
            };
            (op.id.clone(), task)
        })
        .collect()
}

/// Pick who takes over an escalated assignment.
///
/// Candidates hold an open, default-task assignment in the same slot, are not
/// on break or covering for someone, and are active. `Active` assignments are
/// preferred over `Pending`, then the operator who led least recently, then id.
pub fn select_replacement<'a>(
    escalated: &Assignment,
    slot: &'a [Assignment],
    operators: &BTreeMap<OperatorId, Operator>,
) -> Option<&'a Assignment> {
    free_default_holders(escalated, slot, operators).min_by(|a, b| {
        let rank = |x: &Assignment| u8::from(x.status != AssignmentStatus::Active);
        rank(a).cmp(&rank(b)).then_with(|| by_lead_history(a, b, operators))
    })
}

/// Pick who covers the task of an operator going on break.
///
/// Same candidates as for a replacement, but only ones already working.
pub fn select_cover<'a>(
    on_break: &Assignment,
    slot: &'a [Assignment],
    operators: &BTreeMap<OperatorId, Operator>,
) -> Option<&'a Assignment> {
    free_default_holders(on_break, slot, operators)
        .filter(|a| a.status == AssignmentStatus::Active)
        .min_by(|a, b| by_lead_history(a, b, operators))
}

fn free_default_holders<'a, 'b>(
    other: &'b Assignment,
    slot: &'a [Assignment],
    operators: &'b BTreeMap<OperatorId, Operator>,
) -> impl Iterator<Item = &'a Assignment> + 'b
where
    'a: 'b,
{
    slot.iter().filter(move |a| {
        a.operator != other.operator
            && a.shift == other.shift
            && a.hour == other.hour
            && a.is_open()
            && a.task.is_default()
            && a.on_break.is_none()
            && a.covering.is_none()
            && operators.get(&a.operator).is_some_and(|op| op.is_active)
    })
}

fn by_lead_history(a: &Assignment, b: &Assignment, operators: &BTreeMap<OperatorId, Operator>) -> Ordering {
    match (operators.get(&a.operator), operators.get(&b.operator)) {
        (Some(x), Some(y)) => lru_order(x, y),
        _ => a.operator.cmp(&b.operator),
    }
}

/// Operators on duty: open assignments not on break.
pub fn count_on_duty(assignments: &[Assignment]) -> usize {
    assignments.iter().filter(|a| a.is_on_duty()).count()
}

/// Whether one more operator can go on break without dropping below `min_on_duty`.
pub fn staffing_allows_break(on_duty: usize, min_on_duty: u32) -> bool {
    on_duty.saturating_sub(1) >= min_on_duty as usize
}
