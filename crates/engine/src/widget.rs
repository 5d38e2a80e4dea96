//! Assignment widget - what an operator sees and can press.

use rota_core::{Assignment, AssignmentId, AssignmentStatus, HourIndex, OperatorId, TaskTemplate, Time};
use serde::Serialize;

/// Action offered on the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetAction {
    /// Acknowledge and begin
    Start,
    /// Propose a parameter change
    Edit,
    /// Ask to stop early
    EndEarly,
    /// Ask for a short break
    ShortBreak,
    /// Ask for a long break
    LongBreak,
}

/// Rendered assignment summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    /// Assignment the widget belongs to
    pub assignment: AssignmentId,
    /// Headline
    pub title: String,
    /// Task name
    pub task: String,
    /// Current status
    pub status: AssignmentStatus,
    /// Hour-slot
    pub hour: HourIndex,
    /// When the hour closes
    pub ends_at: Time,
    /// Template instructions, if any
    pub instructions: Option<String>,
    /// Whether a break is running
    pub on_break: bool,
    /// Colleague whose task this assignment holds during their break
    pub covering_for: Option<OperatorId>,
    /// Enabled actions
    pub actions: Vec<WidgetAction>,
}

/// Render the widget for an assignment. While covering, the covered task
/// is shown and `template` is expected to be that task's template.
pub fn render_widget(
    assignment: &Assignment,
    template: Option<&TaskTemplate>,
    long_break_hours: &[u8],
) -> Widget {
    let mut actions = Vec::new();
    match assignment.status {
        AssignmentStatus::Pending => actions.push(WidgetAction::Start),
        AssignmentStatus::Active if assignment.on_break.is_none() => {
            actions.extend([WidgetAction::Edit, WidgetAction::EndEarly, WidgetAction::ShortBreak]);
            if long_break_hours.contains(&assignment.hour.get()) {
                actions.push(WidgetAction::LongBreak);
            }
        }
        _ => {}
    }

    Widget {
        assignment: assignment.id,
        title: format!("Hour {} - {}", assignment.hour, assignment.current_task()),
        task: assignment.current_task().name().to_string(),
        status: assignment.status,
        hour: assignment.hour,
        ends_at: assignment.ends_at,
        instructions: template.and_then(|t| t.instructions.clone()),
        on_break: assignment.on_break.is_some(),
        covering_for: assignment.covering.as_ref().map(|c| c.operator.clone()),
        actions,
    }
}
