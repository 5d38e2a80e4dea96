//! Assignment model - one operator, one hour-slot, one task.

use serde::{Deserialize, Serialize};

use crate::id::{AssignmentId, OperatorId, RequestId, ShiftId};
use crate::shift::HourIndex;
use crate::template::{Params, TaskRef};
use crate::Time;

/// Lifecycle state of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Created, not yet acknowledged
    Pending,
    /// Operator started the task
    Active,
    /// Hour window closed while active
    Completed,
    /// An approved end-early request was applied
    EndedEarly,
    /// Auto-reassigned after a missed acknowledgment
    Escalated,
    /// Hour window closed without a start
    Missed,
    /// Replaced by a force-assignment or an escalation replacement
    Superseded,
}

impl AssignmentStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::EndedEarly => "ended early",
            Self::Escalated => "escalated",
            Self::Missed => "missed",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// How far the acknowledgment timers have progressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    /// No timer has fired
    #[default]
    None,
    /// The reminder was sent
    Reminded,
    /// The assignment was escalated
    Escalated,
}

/// Length class of a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Short break, any hour
    Short,
    /// Lunch, restricted hours
    Long,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => f.write_str("short break"),
            Self::Long => f.write_str("long break"),
        }
    }
}

impl std::str::FromStr for BreakKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "long" | "lunch" => Ok(Self::Long),
            other => Err(format!("unknown break kind '{other}'")),
        }
    }
}

/// A running break on an active assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPeriod {
    /// Break length class
    pub kind: BreakKind,
    /// When the break was granted
    pub started_at: Time,
    /// When the operator is due back
    pub ends_at: Time,
    /// The approved request that granted it
    pub request: RequestId,
    /// Assignment holding the task while the operator is away
    #[serde(default)]
    pub covered_by: Option<AssignmentId>,
}

/// A default-task assignment standing in for a colleague on break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Assignment on break
    pub of: AssignmentId,
    /// Operator on break
    pub operator: OperatorId,
    /// Task being covered
    pub task: TaskRef,
    /// Its parameters when the break began
    #[serde(default)]
    pub params: Params,
}

/// The central mutable entity of the rota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique identifier
    pub id: AssignmentId,

    /// Owner
    pub operator: OperatorId,

    /// Shift the hour-slot belongs to
    pub shift: ShiftId,

    /// Hour-slot within the shift
    pub hour: HourIndex,

    /// Task to perform
    pub task: TaskRef,

    /// Current parameters, mutable only via an approved edit
    #[serde(default)]
    pub params: Params,

    /// Lifecycle state
    pub status: AssignmentStatus,

    /// Start of the hour window
    pub starts_at: Time,

    /// End of the hour window
    pub ends_at: Time,

    /// Creation timestamp
    pub created_at: Time,

    /// When the operator started the task
    pub acknowledged_at: Option<Time>,

    /// When the assignment reached a terminal state
    pub ended_at: Option<Time>,

    /// Reason recorded on early termination
    pub end_reason: Option<String>,

    /// Timer progress
    #[serde(default)]
    pub escalation: EscalationStage,

    /// Running break, if any
    pub on_break: Option<BreakPeriod>,

    /// Colleague's task held during their break
    #[serde(default)]
    pub covering: Option<Coverage>,

    /// Created by an admin override
    #[serde(default)]
    pub forced: bool,

    /// Escalated assignment this one takes over
    pub replaces: Option<AssignmentId>,
}

impl Assignment {
    /// Create a pending assignment for an hour window.
    pub fn new(
        operator: OperatorId,
        shift: ShiftId,
        hour: HourIndex,
        task: TaskRef,
        window: (Time, Time),
        now: Time,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            operator,
            shift,
            hour,
            task,
            params: Params::new(),
            status: AssignmentStatus::Pending,
            starts_at: window.0,
            ends_at: window.1,
            created_at: now,
            acknowledged_at: None,
            ended_at: None,
            end_reason: None,
            escalation: EscalationStage::None,
            on_break: None,
            covering: None,
            forced: false,
            replaces: None,
        }
    }

    /// Whether the assignment is still live.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the assignment counts toward the staffing floor.
    pub fn is_on_duty(&self) -> bool {
        self.is_open() && self.on_break.is_none()
    }

    /// The task the operator is working on right now, coverage included.
    pub fn current_task(&self) -> &TaskRef {
        self.covering.as_ref().map_or(&self.task, |c| &c.task)
    }

    /// Whether `now` falls inside the hour window.
    pub fn in_window(&self, now: Time) -> bool {
        now >= self.starts_at && now < self.ends_at
    }

    /// Whether this assignment occupies the given slot.
    pub fn occupies(&self, operator: &OperatorId, shift: ShiftId, hour: HourIndex) -> bool {
        self.is_open() && &self.operator == operator && self.shift == shift && self.hour == hour
    }
}

/// Filter for listing assignments.
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    /// Only this operator
    pub operator: Option<OperatorId>,
    /// Only this shift
    pub shift: Option<ShiftId>,
    /// Only this hour-slot
    pub hour: Option<HourIndex>,
    /// Only non-terminal assignments
    pub open_only: bool,
}

impl AssignmentFilter {
    /// All non-terminal assignments.
    pub fn open() -> Self {
        Self { open_only: true, ..Self::default() }
    }

    /// Every assignment of one hour-slot.
    pub fn slot(shift: ShiftId, hour: HourIndex) -> Self {
        Self { shift: Some(shift), hour: Some(hour), ..Self::default() }
    }

    /// Whether an assignment passes the filter.
    pub fn matches(&self, assignment: &Assignment) -> bool {
        if let Some(op) = &self.operator {
            if &assignment.operator != op {
                return false;
            }
        }
        if let Some(shift) = self.shift {
            if assignment.shift != shift {
                return false;
            }
        }
        if let Some(hour) = self.hour {
            if assignment.hour != hour {
                return false;
            }
        }
        !self.open_only || assignment.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample() -> Assignment {
        let now = Utc::now();
        Assignment::new(
            OperatorId::new("a"),
            ShiftId::new(),
            HourIndex::FIRST,
            TaskRef::DataLabelling,
            (now, now + Duration::hours(1)),
            now,
        )
    }

    #[test]
    fn only_pending_and_active_are_open() {
        assert!(!AssignmentStatus::Pending.is_terminal());
        assert!(!AssignmentStatus::Active.is_terminal());
        for status in [
            AssignmentStatus::Completed,
            AssignmentStatus::EndedEarly,
            AssignmentStatus::Escalated,
            AssignmentStatus::Missed,
            AssignmentStatus::Superseded,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn break_takes_assignment_off_duty() {
        let mut a = sample();
        a.status = AssignmentStatus::Active;
        assert!(a.is_on_duty());
        a.on_break = Some(BreakPeriod {
            kind: BreakKind::Short,
            started_at: a.starts_at,
            ends_at: a.starts_at + Duration::minutes(15),
            request: RequestId::new(),
            covered_by: None,
        });
        assert!(a.is_open());
        assert!(!a.is_on_duty());
    }

    #[test]
    fn coverage_changes_the_current_task() {
        let mut a = sample();
        assert_eq!(a.current_task(), &TaskRef::DataLabelling);
        a.covering = Some(Coverage {
            of: AssignmentId::new(),
            operator: OperatorId::new("b"),
            task: TaskRef::Lead,
            params: Params::new(),
        });
        assert_eq!(a.current_task(), &TaskRef::Lead);
        assert_eq!(a.task, TaskRef::DataLabelling);
    }

    #[test]
    fn filter_matches_slot_and_openness() {
        let mut a = sample();
        assert!(AssignmentFilter::slot(a.shift, a.hour).matches(&a));
        assert!(!AssignmentFilter::slot(ShiftId::new(), a.hour).matches(&a));
        assert!(AssignmentFilter::open().matches(&a));
        a.status = AssignmentStatus::Missed;
        assert!(!AssignmentFilter::open().matches(&a));
        assert!(!a.occupies(&a.operator.clone(), a.shift, a.hour));
    }

    #[test]
    fn break_kind_parses_lunch_alias() {
        assert_eq!("lunch".parse::<BreakKind>().unwrap(), BreakKind::Long);
        assert_eq!("Short".parse::<BreakKind>().unwrap(), BreakKind::Short);
        assert!("nap".parse::<BreakKind>().is_err());
    }
}
