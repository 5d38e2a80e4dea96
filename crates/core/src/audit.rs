//! Audit entries - append-only record of state changes.

use serde::{Deserialize, Serialize};

use crate::id::{AuditId, OperatorId};
use crate::Time;

/// Who caused an audited change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// The scheduler or a timer
    System,
    /// An operator action
    Operator(OperatorId),
    /// An admin action
    Admin(OperatorId),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Operator(id) => write!(f, "operator:{id}"),
            Self::Admin(id) => write!(f, "admin:{id}"),
        }
    }
}

/// An `(actor, action, entity, timestamp, metadata)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier
    pub id: AuditId,

    /// Who did it
    pub actor: Actor,

    /// What happened, e.g. `assignment.escalated`
    pub action: String,

    /// Entity the action applies to
    pub entity_id: String,

    /// When it happened
    pub at: Time,

    /// Free-form details
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    /// Create an entry without metadata.
    pub fn new(actor: Actor, action: impl Into<String>, entity_id: impl ToString, at: Time) -> Self {
        Self {
            id: AuditId::new(),
            actor,
            action: action.into(),
            entity_id: entity_id.to_string(),
            at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
