//! Task templates and the tasks an assignment can carry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::OperatorId;
use crate::Time;

/// Priority of the synthetic default task. Templates with a lower value are more urgent.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Name of the synthetic default task.
pub const DATA_LABELLING: &str = "Data Labelling";

/// Name of the rotating lead duty.
pub const LEAD: &str = "Lead";

/// Current parameters of an assignment.
pub type Params = BTreeMap<String, Value>;

/// The task an assignment carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TaskRef {
    /// The default task every operator can perform
    DataLabelling,
    /// The rotating lead duty
    Lead,
    /// An admin-defined template, by name
    Template(String),
}

impl TaskRef {
    /// Whether this is the default task (never escalated).
    pub fn is_default(&self) -> bool {
        matches!(self, Self::DataLabelling)
    }

    /// Display name of the task.
    pub fn name(&self) -> &str {
        match self {
            Self::DataLabelling => DATA_LABELLING,
            Self::Lead => LEAD,
            Self::Template(name) => name,
        }
    }

    /// Parse a task name as typed by an admin.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case(DATA_LABELLING) {
            Self::DataLabelling
        } else if name.eq_ignore_ascii_case(LEAD) {
            Self::Lead
        } else {
            Self::Template(name.to_string())
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hour-of-day range in the configured local time, `start` inclusive, `end` exclusive.
///
/// A range with `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    /// First local hour (0-23)
    pub start: u8,
    /// Hour the window closes (0-23)
    pub end: u8,
}

impl HourWindow {
    /// Whether a local hour falls inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        let (start, end) = (u32::from(self.start), u32::from(self.end));
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

impl std::str::FromStr for HourWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected START-END, got '{s}'"))?;
        let parse = |v: &str| -> Result<u8, String> {
            let hour: u8 = v.trim().parse().map_err(|_| format!("invalid hour '{v}'"))?;
            if hour > 23 {
                return Err(format!("hour {hour} is outside 0-23"));
            }
            Ok(hour)
        };
        Ok(Self { start: parse(start)?, end: parse(end)? })
    }
}

/// Type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Free text
    Text,
    /// Whole number
    Integer,
    /// Any number
    Number,
    /// true / false
    Bool,
}

impl ParamType {
    /// Whether a JSON value has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(Self::Text),
            "integer" | "int" => Ok(Self::Integer),
            "number" | "float" => Ok(Self::Number),
            "bool" | "boolean" => Ok(Self::Bool),
            other => Err(format!("unknown parameter type '{other}'")),
        }
    }
}

/// A named, typed parameter field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamField {
    /// Field name
    pub name: String,
    /// Value type
    pub kind: ParamType,
    /// Must stay present once set
    pub required: bool,
}

/// Parameter schema of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Declared fields
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a proposed field-diff against the schema.
    ///
    /// A `null` value in the diff removes the field. Unknown fields, type
    /// mismatches and removal of required fields are rejected.
    pub fn check_diff(&self, diff: &Params) -> Result<(), String> {
        for (name, value) in diff {
            let field = self
                .field(name)
                .ok_or_else(|| format!("unknown field '{name}'"))?;
            if value.is_null() {
                if field.required {
                    return Err(format!("field '{name}' is required and cannot be removed"));
                }
                continue;
            }
            if !field.kind.accepts(value) {
                return Err(format!("field '{name}' expects {}, got {value}", field.kind));
            }
        }
        Ok(())
    }
}

/// Admin-defined task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Unique name
    pub name: String,

    /// Lower = more urgent
    pub priority: i32,

    /// Soft hour-of-day constraint
    pub window: Option<HourWindow>,

    /// Schema used to validate edit proposals
    pub params_schema: Option<ParamSchema>,

    /// Instructions shown on the assignment widget
    pub instructions: Option<String>,

    /// Operator this template is force-bound to
    pub bound_operator: Option<OperatorId>,

    /// Tombstone; retired templates stay for the assignments that reference them
    pub retired: bool,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl TaskTemplate {
    /// Create a template with default priority and no constraints.
    pub fn new(name: impl Into<String>, now: Time) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            window: None,
            params_schema: None,
            instructions: None,
            bound_operator: None,
            retired: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the template definition itself.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("template name cannot be empty".to_string());
        }
        if TaskRef::from_name(name) != TaskRef::Template(name.to_string()) {
            return Err(format!("'{name}' is a reserved task name"));
        }
        if let Some(schema) = &self.params_schema {
            let mut seen = std::collections::BTreeSet::new();
            for field in &schema.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(format!("field '{}' is declared twice", field.name));
                }
            }
        }
        Ok(())
    }

    /// Whether the template applies at a local hour.
    pub fn in_window(&self, local_hour: u32) -> bool {
        self.window.map_or(true, |w| w.contains(local_hour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParamSchema {
        ParamSchema {
            fields: vec![
                ParamField { name: "queue".into(), kind: ParamType::Text, required: true },
                ParamField { name: "target".into(), kind: ParamType::Integer, required: false },
            ],
        }
    }

    fn diff(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn window_wraps_midnight() {
        let w: HourWindow = "22-2".parse().unwrap();
        assert!(w.contains(23));
        assert!(w.contains(1));
        assert!(!w.contains(2));
        assert!(!w.contains(12));

        let day: HourWindow = "9-17".parse().unwrap();
        assert!(day.contains(9));
        assert!(!day.contains(17));
    }

    #[test]
    fn window_parse_rejects_bad_hours() {
        assert!("9".parse::<HourWindow>().is_err());
        assert!("9-24".parse::<HourWindow>().is_err());
    }

    #[test]
    fn diff_with_known_fields_passes() {
        assert!(schema().check_diff(&diff(&[("queue", json!("vision")), ("target", json!(40))])).is_ok());
    }

    #[test]
    fn diff_rejects_unknown_field() {
        let err = schema().check_diff(&diff(&[("colour", json!("red"))])).unwrap_err();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn diff_rejects_type_mismatch() {
        assert!(schema().check_diff(&diff(&[("target", json!("forty"))])).is_err());
        assert!(schema().check_diff(&diff(&[("target", json!(4.5))])).is_err());
    }

    #[test]
    fn diff_rejects_removing_required_field() {
        assert!(schema().check_diff(&diff(&[("queue", Value::Null)])).is_err());
        assert!(schema().check_diff(&diff(&[("target", Value::Null)])).is_ok());
    }

    #[test]
    fn task_names_are_reserved() {
        let mut t = TaskTemplate::new("lead", chrono::Utc::now());
        assert!(t.validate().is_err());
        t.name = "Escalation Desk".into();
        assert!(t.validate().is_ok());
        assert_eq!(TaskRef::from_name("data labelling"), TaskRef::DataLabelling);
    }
}
