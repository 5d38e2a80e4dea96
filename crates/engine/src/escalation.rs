//! Escalation monitor - per-assignment timers.
//!
//! Timers never touch state themselves. When a deadline passes they send a
//! [`TimerFired`] message to the engine, which re-checks the assignment under
//! its lock and drops the event if the precondition no longer holds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use rota_core::{Assignment, AssignmentId, AssignmentStatus, EscalationStage, RequestId, Time};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

/// Which deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Acknowledgment reminder; expects `Pending`
    Reminder,
    /// Escalation deadline; expects `Pending`
    Escalation,
    /// Break over; expects the break granted by this request to be running
    BreakEnd(RequestId),
}

/// A timer deadline passed for an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Assignment the timer was armed for
    pub assignment: AssignmentId,
    /// Deadline kind
    pub kind: TimerKind,
}

/// Receiving end of timer events.
pub type TimerEvents = mpsc::UnboundedReceiver<TimerFired>;

/// Arms and cancels per-assignment timers.
pub struct EscalationMonitor {
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<TimerFired>,
    reminder_after: Duration,
    escalate_after: Duration,
    acknowledgment: Mutex<HashMap<AssignmentId, JoinHandle<()>>>,
    breaks: Mutex<HashMap<AssignmentId, JoinHandle<()>>>,
}

impl EscalationMonitor {
    /// Create a monitor and the channel its timers report on.
    pub fn new(
        clock: Arc<dyn Clock>,
        reminder_after: Duration,
        escalate_after: Duration,
    ) -> (Self, TimerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            clock,
            events,
            reminder_after,
            escalate_after,
            acknowledgment: Mutex::new(HashMap::new()),
            breaks: Mutex::new(HashMap::new()),
        };
        (monitor, rx)
    }

    /// Arm the acknowledgment timers of a pending assignment.
    ///
    /// Deadlines count from `created_at`, so re-arming after a restart keeps
    /// the original schedule. Default-task assignments only get the reminder.
    pub async fn arm_acknowledgment(&self, assignment: &Assignment) {
        if assignment.status != AssignmentStatus::Pending {
            return;
        }
        let mut stages = Vec::with_capacity(2);
        if assignment.escalation == EscalationStage::None {
            stages.push((assignment.created_at + self.reminder_after, TimerKind::Reminder));
        }
        if !assignment.task.is_default() {
            stages.push((assignment.created_at + self.escalate_after, TimerKind::Escalation));
        }
        if stages.is_empty() {
            return;
        }
        debug!(assignment = %assignment.id, stages = stages.len(), "arming acknowledgment timers");
        let handle = self.spawn(assignment.id, stages);
        replace(&self.acknowledgment, assignment.id, handle).await;
    }

    /// Arm the timer that ends a break.
    pub async fn arm_break(&self, assignment: AssignmentId, request: RequestId, ends_at: Time) {
        debug!(assignment = %assignment, %ends_at, "arming break timer");
        let handle = self.spawn(assignment, vec![(ends_at, TimerKind::BreakEnd(request))]);
        replace(&self.breaks, assignment, handle).await;
    }

    /// Cancel the acknowledgment timers of an assignment.
    pub async fn cancel_acknowledgment(&self, assignment: AssignmentId) {
        if let Some(handle) = self.acknowledgment.lock().await.remove(&assignment) {
            handle.abort();
        }
    }

    /// Cancel the break timer of an assignment.
    pub async fn cancel_break(&self, assignment: AssignmentId) {
        if let Some(handle) = self.breaks.lock().await.remove(&assignment) {
            handle.abort();
        }
    }

    /// Cancel every timer of an assignment.
    pub async fn cancel_all(&self, assignment: AssignmentId) {
        self.cancel_acknowledgment(assignment).await;
        self.cancel_break(assignment).await;
    }

    /// Whether acknowledgment timers are still outstanding.
    pub async fn is_acknowledgment_armed(&self, assignment: AssignmentId) -> bool {
        self.acknowledgment
            .lock()
            .await
            .get(&assignment)
            .is_some_and(|h| !h.is_finished())
    }

    /// Whether a break timer is still outstanding.
    pub async fn is_break_armed(&self, assignment: AssignmentId) -> bool {
        self.breaks.lock().await.get(&assignment).is_some_and(|h| !h.is_finished())
    }

    /// Number of outstanding timers.
    pub async fn armed(&self) -> usize {
        let ack = self.acknowledgment.lock().await.values().filter(|h| !h.is_finished()).count();
        let brk = self.breaks.lock().await.values().filter(|h| !h.is_finished()).count();
        ack + brk
    }

    /// Abort every outstanding timer.
    pub async fn shutdown(&self) {
        for (_, handle) in self.acknowledgment.lock().await.drain() {
            handle.abort();
        }
        for (_, handle) in self.breaks.lock().await.drain() {
            handle.abort();
        }
    }

    fn spawn(&self, assignment: AssignmentId, stages: Vec<(Time, TimerKind)>) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            for (deadline, kind) in stages {
                clock.sleep_until(deadline).await;
                if events.send(TimerFired { assignment, kind }).is_err() {
                    return;
                }
            }
        })
    }
}

async fn replace(
    table: &Mutex<HashMap<AssignmentId, JoinHandle<()>>>,
    assignment: AssignmentId,
    handle: JoinHandle<()>,
) {
    let mut table = table.lock().await;
    table.retain(|_, h| !h.is_finished());
    if let Some(old) = table.insert(assignment, handle) {
        old.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use rota_core::{HourIndex, OperatorId, ShiftId, TaskRef};

    fn t0() -> Time {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
    }

    fn pending(task: TaskRef) -> Assignment {
        Assignment::new(
            OperatorId::new("a"),
            ShiftId::new(),
            HourIndex::FIRST,
            task,
            (t0(), t0() + Duration::hours(1)),
            t0(),
        )
    }

    async fn next(rx: &mut TimerEvents) -> Option<TimerFired> {
        tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn reminder_then_escalation() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (monitor, mut rx) =
            EscalationMonitor::new(clock.clone(), Duration::minutes(5), Duration::minutes(10));
        let a = pending(TaskRef::Lead);
        monitor.arm_acknowledgment(&a).await;

        clock.advance(Duration::minutes(4));
        assert_eq!(next(&mut rx).await, None);

        clock.advance(Duration::minutes(1));
        assert_eq!(next(&mut rx).await, Some(TimerFired { assignment: a.id, kind: TimerKind::Reminder }));

        clock.advance(Duration::minutes(5));
        assert_eq!(next(&mut rx).await, Some(TimerFired { assignment: a.id, kind: TimerKind::Escalation }));
    }

    #[tokio::test]
    async fn default_task_gets_reminder_only() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (monitor, mut rx) =
            EscalationMonitor::new(clock.clone(), Duration::minutes(5), Duration::minutes(10));
        let a = pending(TaskRef::DataLabelling);
        monitor.arm_acknowledgment(&a).await;

        clock.advance(Duration::minutes(30));
        assert_eq!(next(&mut rx).await.map(|e| e.kind), Some(TimerKind::Reminder));
        assert_eq!(next(&mut rx).await, None);
    }

    #[tokio::test]
    async fn cancel_silences_timers() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (monitor, mut rx) =
            EscalationMonitor::new(clock.clone(), Duration::minutes(5), Duration::minutes(10));
        let a = pending(TaskRef::Lead);
        monitor.arm_acknowledgment(&a).await;
        assert!(monitor.is_acknowledgment_armed(a.id).await);

        monitor.cancel_all(a.id).await;
        clock.advance(Duration::minutes(30));
        assert_eq!(next(&mut rx).await, None);
        assert_eq!(monitor.armed().await, 0);
    }

    #[tokio::test]
    async fn rearm_after_reminder_skips_it() {
        let clock = Arc::new(ManualClock::new(t0() + Duration::minutes(7)));
        let (monitor, mut rx) =
            EscalationMonitor::new(clock.clone(), Duration::minutes(5), Duration::minutes(10));
        let mut a = pending(TaskRef::Lead);
        a.escalation = EscalationStage::Reminded;
        monitor.arm_acknowledgment(&a).await;

        clock.advance(Duration::minutes(3));
        assert_eq!(next(&mut rx).await.map(|e| e.kind), Some(TimerKind::Escalation));
    }
}
