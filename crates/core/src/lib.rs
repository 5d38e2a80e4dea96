//! Rota core data models.
//!
//! Operators, shifts, task templates, assignments and approval requests
//! for the hourly duty rota. No I/O lives here.

#![warn(missing_docs)]

// Identities
mod id;

// Duty pool and time windows
mod operator;
mod shift;

// Work
mod template;
mod assignment;
mod request;

// Configuration and audit
mod settings;
mod audit;

pub use id::*;

pub use operator::Operator;
pub use shift::{floor_to_local_hour, local_hour, next_local_hour, HourIndex, Shift, SHIFT_HOURS};

pub use template::{
    HourWindow, ParamField, ParamSchema, ParamType, Params, TaskRef, TaskTemplate,
    DATA_LABELLING, DEFAULT_PRIORITY, LEAD,
};
pub use assignment::{
    Assignment, AssignmentFilter, AssignmentStatus, BreakKind, BreakPeriod, Coverage,
    EscalationStage,
};
pub use request::{
    ApprovalRequest, Decision, RequestFilter, RequestKind, RequestPayload, RequestStatus,
};

pub use settings::{Settings, SettingsError};
pub use audit::{Actor, AuditEntry};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
