//! Audit collaborator - append-only, best effort.

use std::sync::Arc;

use async_trait::async_trait;
use rota_core::AuditEntry;
use rota_storage::{Storage, StorageError};

/// Errors from an audit sink.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Backing store failed
    #[error("audit write failed: {0}")]
    Storage(#[from] StorageError),
}

/// Accepts audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one entry.
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Appends entries through [`Storage::append_audit`].
pub struct StorageAuditSink {
    storage: Arc<dyn Storage>,
}

impl StorageAuditSink {
    /// Create a sink over a store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AuditSink for StorageAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.storage.append_audit(&entry).await?;
        Ok(())
    }
}
