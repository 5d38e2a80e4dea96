//! Outbox - notices and audit entries leave the engine through queues.
//!
//! State transitions only enqueue. Two worker tasks, one per queue, deliver
//! in order with a per-item timeout, so a slow webhook or audit store never
//! holds a cycle or an assignment lock.

use std::sync::Arc;
use std::time::Duration;

use rota_core::{AuditEntry, OperatorId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::notify::{AdminNotice, Notifier, OperatorNotice};

#[derive(Debug)]
enum Notice {
    Operator(OperatorId, OperatorNotice),
    Admins(AdminNotice),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Audit {
    Entry(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Sending half, owned by the engine context.
pub(crate) struct Outbox {
    notices: mpsc::UnboundedSender<Notice>,
    audit: mpsc::UnboundedSender<Audit>,
}

impl Outbox {
    /// Spawn both delivery workers. Must be called inside a Tokio runtime.
    ///
    /// The workers stop once the outbox is dropped and their queues drain.
    pub fn spawn(notifier: Arc<dyn Notifier>, sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (audit, audit_rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_notices(notifier, notice_rx, timeout));
        tokio::spawn(deliver_audit(sink, audit_rx, timeout));
        Self { notices, audit }
    }

    pub fn operator(&self, operator: &OperatorId, notice: OperatorNotice) {
        if self.notices.send(Notice::Operator(operator.clone(), notice)).is_err() {
            warn!(operator = %operator, "notice worker gone, operator notice dropped");
        }
    }

    pub fn admins(&self, notice: AdminNotice) {
        if self.notices.send(Notice::Admins(notice)).is_err() {
            warn!("notice worker gone, admin notice dropped");
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        if let Err(mpsc::error::SendError(Audit::Entry(entry))) = self.audit.send(Audit::Entry(entry)) {
            warn!(action = %entry.action, "audit worker gone, entry dropped");
        }
    }

    /// Wait until everything queued before this call was delivered or gave up.
    pub async fn flush(&self) {
        let (notice_tx, notice_done) = oneshot::channel();
        let (audit_tx, audit_done) = oneshot::channel();
        let notice_sent = self.notices.send(Notice::Flush(notice_tx)).is_ok();
        let audit_sent = self.audit.send(Audit::Flush(audit_tx)).is_ok();
        if audit_sent {
            let _ = audit_done.await;
        }
        if notice_sent {
            let _ = notice_done.await;
        }
    }
}

async fn deliver_notices(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::UnboundedReceiver<Notice>,
    timeout: Duration,
) {
    while let Some(notice) = rx.recv().await {
        match notice {
            Notice::Operator(operator, notice) => {
                match tokio::time::timeout(timeout, notifier.notify_operator(&operator, notice)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(operator = %operator, error = %e, "operator notification failed"),
                    Err(_) => warn!(operator = %operator, ?timeout, "operator notification timed out"),
                }
            }
            Notice::Admins(notice) => match tokio::time::timeout(timeout, notifier.notify_admins(notice)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "admin notification failed"),
                Err(_) => warn!(?timeout, "admin notification timed out"),
            },
            Notice::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("notice worker stopped");
}

async fn deliver_audit(sink: Arc<dyn AuditSink>, mut rx: mpsc::UnboundedReceiver<Audit>, timeout: Duration) {
    while let Some(item) = rx.recv().await {
        match item {
            Audit::Entry(entry) => {
                let action = entry.action.clone();
                match tokio::time::timeout(timeout, sink.record(entry)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%action, error = %e, "audit write failed"),
                    Err(_) => warn!(%action, ?timeout, "audit write timed out"),
                }
            }
            Audit::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("audit worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rota_core::{Actor, AssignmentId};
    use tokio::sync::Mutex;

    use crate::audit::AuditError;
    use crate::notify::{NotifyError, RecordingNotifier};

    /// Never answers.
    struct Silent;

    #[async_trait]
    impl Notifier for Silent {
        async fn notify_operator(&self, _: &OperatorId, _: OperatorNotice) -> Result<(), NotifyError> {
            std::future::pending().await
        }

        async fn notify_admins(&self, _: AdminNotice) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Entries(Mutex<Vec<AuditEntry>>);

    #[async_trait]
    impl AuditSink for Entries {
        async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
            self.0.lock().await.push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_waits_for_queued_items_in_order() {
        let notifier = Arc::new(RecordingNotifier::new());
        let sink = Arc::new(Entries::default());
        let outbox = Outbox::spawn(notifier.clone(), sink.clone(), Duration::from_secs(1));

        let a = OperatorId::new("a");
        let first = AssignmentId::new();
        let second = AssignmentId::new();
        outbox.operator(&a, OperatorNotice::BreakOver { assignment: first });
        outbox.operator(&a, OperatorNotice::BreakOver { assignment: second });
        outbox.record(AuditEntry::new(Actor::System, "break.ended", first, Utc::now()));
        outbox.flush().await;

        assert_eq!(
            notifier.notices_for(&a).await,
            vec![
                OperatorNotice::BreakOver { assignment: first },
                OperatorNotice::BreakOver { assignment: second },
            ]
        );
        assert_eq!(sink.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn silent_notifier_does_not_hold_up_audit() {
        let sink = Arc::new(Entries::default());
        let outbox = Outbox::spawn(Arc::new(Silent), sink.clone(), Duration::from_millis(50));

        outbox.admins(AdminNotice::AckOverdue {
            assignment: AssignmentId::new(),
            operator: OperatorId::new("a"),
            task: "Lead".into(),
        });
        outbox.record(AuditEntry::new(Actor::System, "assignment.reminded", AssignmentId::new(), Utc::now()));

        tokio::time::timeout(Duration::from_secs(2), outbox.flush())
            .await
            .expect("flush should finish once the stuck notice times out");
        assert_eq!(sink.0.lock().await.len(), 1);
    }
}
