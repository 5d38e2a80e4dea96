//! In-memory storage backend, used by tests and one-off runs.

use std::collections::BTreeMap;

use rota_core::{
    ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AuditEntry, Operator, OperatorId,
    RequestFilter, RequestId, Settings, Shift, ShiftId, TaskTemplate,
};
use tokio::sync::RwLock;

use super::{Result, Storage};

#[derive(Default)]
struct Tables {
    settings: Option<Settings>,
    operators: BTreeMap<OperatorId, Operator>,
    shifts: BTreeMap<ShiftId, Shift>,
    templates: BTreeMap<String, TaskTemplate>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    requests: BTreeMap<RequestId, ApprovalRequest>,
    audit: Vec<AuditEntry>,
}

/// Storage held entirely in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn load_settings(&self) -> Result<Option<Settings>> {
        Ok(self.tables.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.tables.write().await.settings = Some(settings.clone());
        Ok(())
    }

    async fn save_operator(&self, operator: &Operator) -> Result<()> {
        self.tables.write().await.operators.insert(operator.id.clone(), operator.clone());
        Ok(())
    }

    async fn load_operator(&self, id: &OperatorId) -> Result<Option<Operator>> {
        Ok(self.tables.read().await.operators.get(id).cloned())
    }

    async fn list_operators(&self) -> Result<Vec<Operator>> {
        Ok(self.tables.read().await.operators.values().cloned().collect())
    }

    async fn save_shift(&self, shift: &Shift) -> Result<()> {
        self.tables.write().await.shifts.insert(shift.id, shift.clone());
        Ok(())
    }

    async fn load_shift(&self, id: ShiftId) -> Result<Option<Shift>> {
        Ok(self.tables.read().await.shifts.get(&id).cloned())
    }

    async fn list_shifts(&self) -> Result<Vec<Shift>> {
        Ok(self.tables.read().await.shifts.values().cloned().collect())
    }

    async fn save_template(&self, template: &TaskTemplate) -> Result<()> {
        self.tables.write().await.templates.insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn load_template(&self, name: &str) -> Result<Option<TaskTemplate>> {
        Ok(self.tables.read().await.templates.get(name).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<TaskTemplate>> {
        Ok(self.tables.read().await.templates.values().cloned().collect())
    }

    async fn insert_assignment_if_vacant(&self, assignment: &Assignment) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .assignments
            .values()
            .any(|a| a.occupies(&assignment.operator, assignment.shift, assignment.hour));
        if taken {
            return Ok(false);
        }
        tables.assignments.insert(assignment.id, assignment.clone());
        Ok(true)
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<()> {
        self.tables.write().await.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>> {
        Ok(self.tables.read().await.assignments.get(&id).cloned())
    }

    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        // ULID keys keep creation order.
        Ok(self
            .tables
            .read()
            .await
            .assignments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn save_request(&self, request: &ApprovalRequest) -> Result<()> {
        self.tables.write().await.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>> {
        Ok(self
            .tables
            .read()
            .await
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn commit_decision(
        &self,
        request: &ApprovalRequest,
        assignment: Option<&Assignment>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.requests.insert(request.id, request.clone());
        if let Some(assignment) = assignment {
            tables.assignments.insert(assignment.id, assignment.clone());
        }
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.tables.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.tables.read().await.audit.clone())
    }
}
