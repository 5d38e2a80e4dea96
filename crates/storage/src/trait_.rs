//! Storage trait abstraction.

use async_trait::async_trait;
use rota_core::{
    ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AuditEntry, Operator, OperatorId,
    RequestFilter, RequestId, Settings, Shift, ShiftId, TaskTemplate,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage abstraction for rota data.
///
/// Implementations are shared behind an `Arc` by the engine, so every
/// method takes `&self` and must give read-your-writes consistency within
/// one process.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Settings ===

    /// Load the settings singleton, `None` if never saved.
    async fn load_settings(&self) -> Result<Option<Settings>>;

    /// Replace the settings singleton.
    async fn save_settings(&self, settings: &Settings) -> Result<()>;

    // === Operators ===

    /// Save an operator (create or update).
    async fn save_operator(&self, operator: &Operator) -> Result<()>;

    /// Load an operator by id.
    async fn load_operator(&self, id: &OperatorId) -> Result<Option<Operator>>;

    /// List all operators.
    async fn list_operators(&self) -> Result<Vec<Operator>>;

    // === Shifts ===

    /// Save a shift (create or update).
    async fn save_shift(&self, shift: &Shift) -> Result<()>;

    /// Load a shift by id.
    async fn load_shift(&self, id: ShiftId) -> Result<Option<Shift>>;

    /// List all shifts.
    async fn list_shifts(&self) -> Result<Vec<Shift>>;

    // === Templates ===

    /// Save a template (create or update), keyed by name.
    async fn save_template(&self, template: &TaskTemplate) -> Result<()>;

    /// Load a template by name.
    async fn load_template(&self, name: &str) -> Result<Option<TaskTemplate>>;

    /// List all templates, retired ones included.
    async fn list_templates(&self) -> Result<Vec<TaskTemplate>>;

    // === Assignments ===

    /// Insert an assignment unless its `(operator, shift, hour)` slot already
    /// holds a non-terminal one. Returns `false` when the slot was taken.
    ///
    /// The check and the write happen atomically.
    async fn insert_assignment_if_vacant(&self, assignment: &Assignment) -> Result<bool>;

    /// Save an existing assignment.
    async fn save_assignment(&self, assignment: &Assignment) -> Result<()>;

    /// Load an assignment by id.
    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>>;

    /// List assignments matching the filter, oldest first.
    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>>;

    // === Requests ===

    /// Save a request (create or update).
    async fn save_request(&self, request: &ApprovalRequest) -> Result<()>;

    /// Load a request by id.
    async fn load_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>>;

    /// List requests matching the filter, oldest first.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>>;

    /// Write a decided request and the assignment it changed as one unit.
    async fn commit_decision(
        &self,
        request: &ApprovalRequest,
        assignment: Option<&Assignment>,
    ) -> Result<()>;

    // === Audit ===

    /// Append an audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// List audit entries in append order.
    async fn list_audit(&self) -> Result<Vec<AuditEntry>>;
}
