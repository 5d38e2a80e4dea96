//! Deployment-wide settings.

use chrono::{FixedOffset, Offset};
use serde::{Deserialize, Serialize};

/// Errors raised by settings validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// UTC offset outside ±14h
    #[error("UTC offset {0} minutes is out of range")]
    InvalidOffset(i32),

    /// A required text field is blank
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Unknown key on `set`
    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    /// Value could not be parsed for a key
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting key
        key: String,
        /// Rejected value
        value: String,
    },
}

/// Singleton configuration, mutated only by the admin configuration command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Channel where assignment notices go
    pub assignments_channel_id: Option<String>,

    /// Channel where approval requests go
    pub admin_channel_id: Option<String>,

    /// Role whose members are operators
    pub operator_role_id: Option<String>,

    /// Role whose members may decide requests
    pub admin_role_id: Option<String>,

    /// Timezone display name
    pub timezone: String,

    /// Fixed UTC offset used for local hours
    pub utc_offset_minutes: i32,

    /// Floor for operators on duty and not on break
    pub min_on_duty: u32,

    /// Cooldown between edit requests per operator
    pub cooldown_edit_sec: u64,

    /// Cooldown between end-early requests per operator
    pub cooldown_end_early_sec: u64,

    /// Cooldown between break requests per operator
    pub cooldown_break_sec: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assignments_channel_id: None,
            admin_channel_id: None,
            operator_role_id: None,
            admin_role_id: None,
            timezone: "America/Los_Angeles".to_string(),
            utc_offset_minutes: -8 * 60,
            min_on_duty: 3,
            cooldown_edit_sec: 300,
            cooldown_end_early_sec: 300,
            cooldown_break_sec: 300,
        }
    }
}

impl Settings {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.timezone.trim().is_empty() {
            return Err(SettingsError::Empty("timezone"));
        }
        self.try_offset()?;
        Ok(())
    }

    fn try_offset(&self) -> Result<FixedOffset, SettingsError> {
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(SettingsError::InvalidOffset(self.utc_offset_minutes));
        }
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or(SettingsError::InvalidOffset(self.utc_offset_minutes))
    }

    /// Offset used for local-hour arithmetic. Falls back to UTC for unvalidated values.
    pub fn offset(&self) -> FixedOffset {
        self.try_offset().unwrap_or_else(|_| chrono::Utc.fix())
    }

    /// Apply a `key=value` change as typed by an admin.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue { key: key.to_string(), value: value.to_string() };
        let optional = |v: &str| (!v.is_empty() && v != "none").then(|| v.to_string());
        match key {
            "assignments_channel_id" => self.assignments_channel_id = optional(value),
            "admin_channel_id" => self.admin_channel_id = optional(value),
            "operator_role_id" => self.operator_role_id = optional(value),
            "admin_role_id" => self.admin_role_id = optional(value),
            "timezone" => self.timezone = value.to_string(),
            "utc_offset_minutes" => self.utc_offset_minutes = value.parse().map_err(|_| invalid())?,
            "min_on_duty" => self.min_on_duty = value.parse().map_err(|_| invalid())?,
            "cooldown_edit_sec" => self.cooldown_edit_sec = value.parse().map_err(|_| invalid())?,
            "cooldown_end_early_sec" => {
                self.cooldown_end_early_sec = value.parse().map_err(|_| invalid())?
            }
            "cooldown_break_sec" => self.cooldown_break_sec = value.parse().map_err(|_| invalid())?,
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.min_on_duty, 3);
        assert_eq!(s.offset().local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn set_parses_typed_values() {
        let mut s = Settings::default();
        s.set("min_on_duty", "2").unwrap();
        s.set("admin_channel_id", "C042").unwrap();
        s.set("utc_offset_minutes", "330").unwrap();
        assert_eq!(s.min_on_duty, 2);
        assert_eq!(s.admin_channel_id.as_deref(), Some("C042"));
        assert_eq!(s.offset().local_minus_utc(), 330 * 60);

        assert!(matches!(s.set("min_on_duty", "-1"), Err(SettingsError::InvalidValue { .. })));
        assert!(matches!(s.set("colour", "red"), Err(SettingsError::UnknownKey(_))));
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let s = Settings { utc_offset_minutes: 15 * 60, ..Settings::default() };
        assert_eq!(s.validate(), Err(SettingsError::InvalidOffset(900)));
        assert_eq!(s.offset().local_minus_utc(), 0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let s: Settings = serde_json::from_str(r#"{"min_on_duty": 5}"#).unwrap();
        assert_eq!(s.min_on_duty, 5);
        assert_eq!(s.cooldown_edit_sec, 300);
    }
}
