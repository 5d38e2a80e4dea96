//! Engine layer - hourly scheduling, the assignment lifecycle, escalation
//! timers and the approval workflow.

#![warn(missing_docs)]

pub mod approval;
pub mod audit;
pub mod clock;
mod context;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod lifecycle;
pub mod locks;
pub mod notify;
mod outbox;
pub mod scheduler;
pub mod selection;
pub mod settings;
pub mod widget;

pub use approval::ApprovalWorkflow;
pub use audit::{AuditError, AuditSink, StorageAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineBuilder, EngineConfig, MAX_BREAK_MINS};
pub use error::{EngineError, Result};
pub use escalation::{EscalationMonitor, TimerEvents, TimerFired, TimerKind};
pub use locks::KeyedLocks;
pub use notify::{
    AdminNotice, FieldChange, LogNotifier, Notifier, NotifyError, OperatorNotice,
    RecordingNotifier, WebhookNotifier,
};
pub use scheduler::{CycleReport, SchedulingEngine, SlotOutcome, SlotReport, TimerOutcome};
pub use settings::SettingsHandle;
pub use widget::{render_widget, Widget, WidgetAction};
