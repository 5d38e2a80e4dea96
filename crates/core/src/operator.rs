//! Operator model - the humans who receive hourly assignments.

use serde::{Deserialize, Serialize};
use crate::id::OperatorId;
use crate::Time;

/// An operator in the duty pool.
///
/// Operators are created on first observed membership in the operator role
/// and are never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    /// Stable external identity
    pub id: OperatorId,

    /// Name shown in notifications
    pub display_name: String,

    /// Inactive operators are skipped by selection
    pub is_active: bool,

    /// Last time this operator was selected as Lead (`None` = never)
    pub last_lead_at: Option<Time>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Operator {
    /// Create a new active operator that has never served as Lead.
    pub fn new(id: OperatorId, display_name: impl Into<String>, now: Time) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_active: true,
            last_lead_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
