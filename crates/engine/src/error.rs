//! Engine error taxonomy.

use rota_core::{AssignmentStatus, RequestId, RequestKind, RequestStatus, SettingsError, Time};
use rota_storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by engine operations.
///
/// The `Display` text of every variant is meant for direct display to the
/// operator or admin who triggered the action.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Illegal state transition
    #[error("cannot {action} an assignment that is {status}")]
    GuardViolation {
        /// Attempted action
        action: &'static str,
        /// Current status
        status: AssignmentStatus,
    },

    /// Start attempted outside the hour window
    #[error("this assignment runs from {starts_at} to {ends_at} and cannot be started now")]
    OutsideWindow {
        /// Window start
        starts_at: Time,
        /// Window end
        ends_at: Time,
    },

    /// Same-kind request already awaiting a decision
    #[error("there is already a pending {0} request for this assignment")]
    DuplicatePending(RequestKind),

    /// Operator submitted the same kind of request too recently
    #[error("please wait {remaining_secs}s before submitting another {kind} request")]
    CooldownActive {
        /// Request kind
        kind: RequestKind,
        /// Seconds until the cooldown lapses
        remaining_secs: i64,
    },

    /// Edit payload does not fit the template schema
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Malformed admin or operator input
    #[error("{0}")]
    InvalidInput(String),

    /// Granting a break would drop staffing below the floor
    #[error("a break now would leave {remaining} operator(s) on duty, below the minimum of {minimum}")]
    StaffingFloor {
        /// Operators left on duty after the break
        remaining: usize,
        /// Configured floor
        minimum: u32,
    },

    /// Break not permitted at this time
    #[error("{0}")]
    BreakNotAllowed(String),

    /// Request already has a final status
    #[error("request {0} was already {1}")]
    AlreadyDecided(RequestId, RequestStatus),

    /// Referenced entity is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Actor may not act on the entity
    #[error("{0}")]
    Forbidden(String),

    /// Rejected settings change
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// Persistence failure
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Whether the condition is local to one action. Only persistence
    /// failures are treated as unrecoverable for the current cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}
