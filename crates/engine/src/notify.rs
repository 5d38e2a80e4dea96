//! Messaging collaborator - operator and admin notifications.
//!
//! The engine treats every notification as fire-and-forget: notices are
//! queued through the outbox, and a failed send is logged and never rolls
//! back the state change that triggered it.

use std::time::Duration;

use async_trait::async_trait;
use rota_core::{AssignmentId, OperatorId, RequestId, RequestKind, RequestStatus};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::settings::SettingsHandle;
use crate::widget::Widget;

/// Errors from a notification channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport failure
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("webhook rejected notice with status {0}")]
    Rejected(u16),
}

/// Sent to one operator's private channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorNotice {
    /// A new assignment
    Assigned {
        /// Rendered assignment
        widget: Widget,
    },
    /// Acknowledgment is overdue
    Reminder {
        /// Pending assignment
        assignment: AssignmentId,
        /// Task name
        task: String,
    },
    /// The assignment was handed to someone else
    Reassigned {
        /// Escalated assignment
        assignment: AssignmentId,
        /// Task name
        task: String,
    },
    /// An admin decided one of the operator's requests
    Decided {
        /// Request
        request: RequestId,
        /// Request kind
        kind: RequestKind,
        /// Final status
        status: RequestStatus,
    },
    /// A break ran out
    BreakOver {
        /// Assignment resumed
        assignment: AssignmentId,
    },
    /// Take over a colleague's task while they are on break
    Covering {
        /// The covering operator's own assignment
        assignment: AssignmentId,
        /// Operator on break
        colleague: OperatorId,
        /// Task name
        task: String,
    },
    /// The colleague is back; return to the default task
    CoverEnded {
        /// The covering operator's own assignment
        assignment: AssignmentId,
        /// Task handed back
        task: String,
    },
}

/// One field of an edit proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Field name
    pub field: String,
    /// Value today, `None` if unset
    pub current: Option<Value>,
    /// Proposed value, `null` to remove
    pub proposed: Value,
}

/// Sent to the admin channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminNotice {
    /// A request awaits a decision
    ApprovalRequested {
        /// Request
        request: RequestId,
        /// Submitting operator
        operator: OperatorId,
        /// Request kind
        kind: RequestKind,
        /// Operator's reason
        reason: String,
        /// Current to proposed values, edits only
        changes: Vec<FieldChange>,
    },
    /// An operator has not acknowledged in time
    AckOverdue {
        /// Pending assignment
        assignment: AssignmentId,
        /// Assigned operator
        operator: OperatorId,
        /// Task name
        task: String,
    },
    /// An assignment was escalated
    Escalated {
        /// Escalated assignment
        assignment: AssignmentId,
        /// Operator who missed it
        operator: OperatorId,
        /// Task name
        task: String,
        /// Who took it over, if anyone could
        replacement: Option<OperatorId>,
    },
}

/// Delivers notices to operators and admins.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify one operator.
    async fn notify_operator(
        &self,
        operator: &OperatorId,
        notice: OperatorNotice,
    ) -> Result<(), NotifyError>;

    /// Notify the admin channel.
    async fn notify_admins(&self, notice: AdminNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_operator(
        &self,
        operator: &OperatorId,
        notice: OperatorNotice,
    ) -> Result<(), NotifyError> {
        info!(operator = %operator, ?notice, "operator notice");
        Ok(())
    }

    async fn notify_admins(&self, notice: AdminNotice) -> Result<(), NotifyError> {
        info!(?notice, "admin notice");
        Ok(())
    }
}

/// Posts notices as JSON to a webhook.
///
/// Operator notices carry the assignments channel id, admin notices the admin
/// channel id, both read from the live settings.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    settings: SettingsHandle,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`. Each post gives up after `timeout`.
    pub fn new(url: impl Into<String>, settings: SettingsHandle, timeout: Duration) -> Self {
        Self {
            client: reqwest::ClientBuilder::new()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
            settings,
        }
    }

    async fn post(&self, body: Value) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_operator(
        &self,
        operator: &OperatorId,
        notice: OperatorNotice,
    ) -> Result<(), NotifyError> {
        let channel = self.settings.get().assignments_channel_id.clone();
        self.post(serde_json::json!({
            "channel": channel,
            "operator": operator,
            "notice": notice,
        }))
        .await
    }

    async fn notify_admins(&self, notice: AdminNotice) -> Result<(), NotifyError> {
        let channel = self.settings.get().admin_channel_id.clone();
        self.post(serde_json::json!({
            "channel": channel,
            "notice": notice,
        }))
        .await
    }
}

/// Keeps every notice in memory for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    operator: Mutex<Vec<(OperatorId, OperatorNotice)>>,
    admin: Mutex<Vec<AdminNotice>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator notices so far.
    pub async fn operator_notices(&self) -> Vec<(OperatorId, OperatorNotice)> {
        self.operator.lock().await.clone()
    }

    /// Notices sent to one operator.
    pub async fn notices_for(&self, operator: &OperatorId) -> Vec<OperatorNotice> {
        self.operator
            .lock()
            .await
            .iter()
            .filter(|(op, _)| op == operator)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Admin notices so far.
    pub async fn admin_notices(&self) -> Vec<AdminNotice> {
        self.admin.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_operator(
        &self,
        operator: &OperatorId,
        notice: OperatorNotice,
    ) -> Result<(), NotifyError> {
        self.operator.lock().await.push((operator.clone(), notice));
        Ok(())
    }

    async fn notify_admins(&self, notice: AdminNotice) -> Result<(), NotifyError> {
        self.admin.lock().await.push(notice);
        Ok(())
    }
}
