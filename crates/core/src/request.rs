//! Approval requests - operator-initiated changes behind an admin gate.

use serde::{Deserialize, Serialize};

use crate::assignment::BreakKind;
use crate::id::{AssignmentId, OperatorId, RequestId};
use crate::template::Params;
use crate::Time;

/// Kind of change an operator can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Change assignment parameters
    Edit,
    /// Stop the assignment before the hour closes
    EndEarly,
    /// Take a break
    Break,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Edit => "edit",
            Self::EndEarly => "end early",
            Self::Break => "break",
        };
        f.write_str(name)
    }
}

/// What the operator proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Field diff; `null` removes a field
    Edit(Params),
    /// No payload
    EndEarly,
    /// Requested break length
    Break(BreakKind),
}

impl RequestPayload {
    /// Kind of the request carrying this payload.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Edit(_) => RequestKind::Edit,
            Self::EndEarly => RequestKind::EndEarly,
            Self::Break(_) => RequestKind::Break,
        }
    }
}

/// Decision state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting an admin decision
    Pending,
    /// Approved and applied
    Approved,
    /// Denied
    Denied,
    /// The assignment ended before a decision
    Expired,
}

impl RequestStatus {
    /// Whether the request can no longer be decided.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Admin verdict on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Apply the change
    Approve,
    /// Reject the change
    Deny,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" => Ok(Self::Approve),
            "deny" | "denied" | "no" => Ok(Self::Deny),
            other => Err(format!("unknown decision '{other}'")),
        }
    }
}

/// An operator-submitted change awaiting an admin decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique identifier
    pub id: RequestId,

    /// Target assignment
    pub assignment: AssignmentId,

    /// Submitting operator
    pub requested_by: OperatorId,

    /// Free-text reason
    pub reason: String,

    /// Proposed change
    pub payload: RequestPayload,

    /// Decision state
    pub status: RequestStatus,

    /// Submission timestamp
    pub requested_at: Time,

    /// Deciding admin
    pub decided_by: Option<OperatorId>,

    /// Decision timestamp
    pub decided_at: Option<Time>,
}

impl ApprovalRequest {
    /// Create a pending request.
    pub fn new(
        assignment: AssignmentId,
        requested_by: OperatorId,
        reason: impl Into<String>,
        payload: RequestPayload,
        now: Time,
    ) -> Self {
        Self {
            id: RequestId::new(),
            assignment,
            requested_by,
            reason: reason.into(),
            payload,
            status: RequestStatus::Pending,
            requested_at: now,
            decided_by: None,
            decided_at: None,
        }
    }

    /// Kind of the request.
    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    /// Record a decision.
    pub fn decide(&mut self, decision: Decision, by: OperatorId, at: Time) {
        self.status = match decision {
            Decision::Approve => RequestStatus::Approved,
            Decision::Deny => RequestStatus::Denied,
        };
        self.decided_by = Some(by);
        self.decided_at = Some(at);
    }
}

/// Filter for listing requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Only requests on this assignment
    pub assignment: Option<AssignmentId>,
    /// Only requests by this operator
    pub requested_by: Option<OperatorId>,
    /// Only this kind
    pub kind: Option<RequestKind>,
    /// Only this status
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    /// Pending requests on one assignment.
    pub fn pending_for(assignment: AssignmentId) -> Self {
        Self {
            assignment: Some(assignment),
            status: Some(RequestStatus::Pending),
            ..Self::default()
        }
    }

    /// Whether a request passes the filter.
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.assignment.map_or(true, |a| request.assignment == a)
            && self.requested_by.as_ref().map_or(true, |op| &request.requested_by == op)
            && self.kind.map_or(true, |k| request.kind() == k)
            && self.status.map_or(true, |s| request.status == s)
    }
}
