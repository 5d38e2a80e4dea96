//! JSON file storage implementation.
//!
//! Stores one JSON file per entity under a data root (`.rota` by default)
//! and appends audit entries to `audit.jsonl`. Files are written to a
//! temporary sibling and renamed into place, so readers never observe a
//! half-written entity.

use std::path::{Path, PathBuf};

use rota_core::{
    ApprovalRequest, Assignment, AssignmentFilter, AssignmentId, AuditEntry, Operator, OperatorId,
    RequestFilter, RequestId, Settings, Shift, ShiftId, TaskTemplate,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Result, Storage};

const DIRS: [&str; 5] = ["operators", "shifts", "templates", "assignments", "requests"];

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    // Serializes check-then-write operations and audit appends.
    write_lock: Mutex<()>,
}

impl JsonStorage {
    /// Create storage, creating the entity directories under `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in DIRS {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self { root, write_lock: Mutex::new(()) })
    }

    /// Data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
    fn operator_path(&self, id: &OperatorId) -> PathBuf {
        self.root.join("operators").join(format!("{}.json", file_key(id.as_str())))
    }
    fn shift_path(&self, id: ShiftId) -> PathBuf {
        self.root.join("shifts").join(format!("{}.json", id))
    }
    fn template_path(&self, name: &str) -> PathBuf {
        self.root.join("templates").join(format!("{}.json", file_key(name)))
    }
    fn assignment_path(&self, id: AssignmentId) -> PathBuf {
        self.root.join("assignments").join(format!("{}.json", id))
    }
    fn request_path(&self, id: RequestId) -> PathBuf {
        self.root.join("requests").join(format!("{}.json", id))
    }
    fn audit_path(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn load_settings(&self) -> Result<Option<Settings>> {
        read_json(&self.settings_path()).await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        write_json(&self.settings_path(), settings).await
    }

    async fn save_operator(&self, operator: &Operator) -> Result<()> {
        write_json(&self.operator_path(&operator.id), operator).await
    }

    async fn load_operator(&self, id: &OperatorId) -> Result<Option<Operator>> {
        read_json(&self.operator_path(id)).await
    }

    async fn list_operators(&self) -> Result<Vec<Operator>> {
        list_dir(&self.root.join("operators")).await
    }

    async fn save_shift(&self, shift: &Shift) -> Result<()> {
        write_json(&self.shift_path(shift.id), shift).await
    }

    async fn load_shift(&self, id: ShiftId) -> Result<Option<Shift>> {
        read_json(&self.shift_path(id)).await
    }

    async fn list_shifts(&self) -> Result<Vec<Shift>> {
        list_dir(&self.root.join("shifts")).await
    }

    async fn save_template(&self, template: &TaskTemplate) -> Result<()> {
        write_json(&self.template_path(&template.name), template).await
    }

    async fn load_template(&self, name: &str) -> Result<Option<TaskTemplate>> {
        read_json(&self.template_path(name)).await
    }

    async fn list_templates(&self) -> Result<Vec<TaskTemplate>> {
        list_dir(&self.root.join("templates")).await
    }

    async fn insert_assignment_if_vacant(&self, assignment: &Assignment) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let slot = AssignmentFilter {
            operator: Some(assignment.operator.clone()),
            shift: Some(assignment.shift),
            hour: Some(assignment.hour),
            open_only: true,
        };
        if !self.list_assignments(&slot).await?.is_empty() {
            return Ok(false);
        }
        write_json(&self.assignment_path(assignment.id), assignment).await?;
        Ok(true)
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.assignment_path(assignment.id), assignment).await
    }

    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>> {
        read_json(&self.assignment_path(id)).await
    }

    async fn list_assignments(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        let all: Vec<Assignment> = list_dir(&self.root.join("assignments")).await?;
        Ok(all.into_iter().filter(|a| filter.matches(a)).collect())
    }

    async fn save_request(&self, request: &ApprovalRequest) -> Result<()> {
        write_json(&self.request_path(request.id), request).await
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>> {
        read_json(&self.request_path(id)).await
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>> {
        let all: Vec<ApprovalRequest> = list_dir(&self.root.join("requests")).await?;
        Ok(all.into_iter().filter(|r| filter.matches(r)).collect())
    }

    async fn commit_decision(
        &self,
        request: &ApprovalRequest,
        assignment: Option<&Assignment>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        // Assignment first: a crash in between leaves the request Pending,
        // and re-deciding it reapplies an idempotent change.
        if let Some(assignment) = assignment {
            write_json(&self.assignment_path(assignment.id), assignment).await?;
        }
        write_json(&self.request_path(request.id), request).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        let content = match fs::read_to_string(self.audit_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt audit line"),
            }
        }
        Ok(entries)
    }
}

/// Turn an external key into a safe file stem.
fn file_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut paths = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    // ULID file names sort by creation time.
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entity"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rota_core::{
        Actor, AssignmentStatus, Decision, HourIndex, RequestPayload, RequestStatus, TaskRef,
    };

    fn pending(op: &str, shift: ShiftId) -> Assignment {
        let now = Utc::now();
        Assignment::new(
            OperatorId::new(op),
            shift,
            HourIndex::FIRST,
            TaskRef::Lead,
            (now, now + Duration::hours(1)),
            now,
        )
    }

    #[tokio::test]
    async fn entities_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let storage = JsonStorage::new(dir.path()).await.unwrap();
            storage.save_operator(&Operator::new(OperatorId::new("U/42"), "Ana", now)).await.unwrap();
            storage.save_template(&TaskTemplate::new("Queue Triage", now)).await.unwrap();
            storage.save_settings(&Settings::default()).await.unwrap();
        }
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let op = storage.load_operator(&OperatorId::new("U/42")).await.unwrap().unwrap();
        assert_eq!(op.display_name, "Ana");
        assert!(storage.load_template("Queue Triage").await.unwrap().is_some());
        assert_eq!(storage.load_settings().await.unwrap(), Some(Settings::default()));
    }

    #[tokio::test]
    async fn insert_if_vacant_checks_slot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let shift = ShiftId::new();

        assert!(storage.insert_assignment_if_vacant(&pending("a", shift)).await.unwrap());
        assert!(!storage.insert_assignment_if_vacant(&pending("a", shift)).await.unwrap());
        assert!(storage.insert_assignment_if_vacant(&pending("b", shift)).await.unwrap());
        assert_eq!(storage.list_assignments(&AssignmentFilter::open()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn commit_decision_writes_both() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let mut assignment = pending("a", ShiftId::new());
        storage.save_assignment(&assignment).await.unwrap();

        let mut request = ApprovalRequest::new(
            assignment.id,
            assignment.operator.clone(),
            "network outage",
            RequestPayload::EndEarly,
            Utc::now(),
        );
        storage.save_request(&request).await.unwrap();

        request.decide(Decision::Approve, OperatorId::new("admin"), Utc::now());
        assignment.status = AssignmentStatus::EndedEarly;
        storage.commit_decision(&request, Some(&assignment)).await.unwrap();

        let stored = storage.load_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        let stored = storage.load_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::EndedEarly);
    }

    #[tokio::test]
    async fn audit_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        for action in ["assignment.created", "assignment.started"] {
            let entry = AuditEntry::new(Actor::System, action, "x", Utc::now());
            storage.append_audit(&entry).await.unwrap();
        }
        let entries = storage.list_audit().await.unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["assignment.created", "assignment.started"]);
    }

    #[test]
    fn file_key_escapes_separators() {
        assert_eq!(file_key("U/42"), "U%2F42");
        assert_eq!(file_key("Queue Triage"), "Queue%20Triage");
    }
}
