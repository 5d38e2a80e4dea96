//! Shift model - a fixed nine-hour window with a roster.

use std::collections::BTreeSet;

use chrono::{Duration, FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::id::{OperatorId, ShiftId};
use crate::Time;

/// Number of hour-slots in a shift.
pub const SHIFT_HOURS: u8 = 9;

/// 1-based position of an hour within a shift (`1..=9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HourIndex(u8);

impl HourIndex {
    /// First hour of a shift.
    pub const FIRST: HourIndex = HourIndex(1);

    /// Create an hour index, `None` when outside `1..=9`.
    pub fn new(index: u8) -> Option<Self> {
        (1..=SHIFT_HOURS).contains(&index).then_some(Self(index))
    }

    /// Raw 1-based value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The hour-slot before this one, `None` for the first hour.
    pub fn previous(self) -> Option<Self> {
        Self::new(self.0.wrapping_sub(1))
    }
}

impl TryFrom<u8> for HourIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("hour index {value} is outside 1..={SHIFT_HOURS}"))
    }
}

impl From<HourIndex> for u8 {
    fn from(index: HourIndex) -> Self {
        index.0
    }
}

impl std::fmt::Display for HourIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A bounded duty window and the operators rostered for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    /// Unique identifier
    pub id: ShiftId,

    /// Start instant, always on a local hour boundary
    pub start_at: Time,

    /// Base timezone used for display
    pub tz_name: String,

    /// Operators valid for this window
    pub roster: BTreeSet<OperatorId>,

    /// Set once the shift has been closed
    pub ended_at: Option<Time>,

    /// Creation timestamp
    pub created_at: Time,
}

impl Shift {
    /// Create a shift starting at `start_at`.
    pub fn new(
        start_at: Time,
        tz_name: impl Into<String>,
        roster: impl IntoIterator<Item = OperatorId>,
        now: Time,
    ) -> Self {
        Self {
            id: ShiftId::new(),
            start_at,
            tz_name: tz_name.into(),
            roster: roster.into_iter().collect(),
            ended_at: None,
            created_at: now,
        }
    }

    /// Instant the last hour-slot closes.
    pub fn end_at(&self) -> Time {
        self.start_at + Duration::hours(i64::from(SHIFT_HOURS))
    }

    /// Whether the shift is running at `now`.
    pub fn is_open_at(&self, now: Time) -> bool {
        self.ended_at.is_none() && now >= self.start_at && now < self.end_at()
    }

    /// Hour-slot covering `now`, `None` outside the shift window.
    pub fn hour_index_at(&self, now: Time) -> Option<HourIndex> {
        if now < self.start_at || now >= self.end_at() {
            return None;
        }
        let elapsed = (now - self.start_at).num_seconds() / 3600;
        u8::try_from(elapsed + 1).ok().and_then(HourIndex::new)
    }

    /// Start and end instants of an hour-slot.
    pub fn hour_window(&self, index: HourIndex) -> (Time, Time) {
        let start = self.start_at + Duration::hours(i64::from(index.get() - 1));
        (start, start + Duration::hours(1))
    }

    /// Whether an operator is on this shift's roster.
    pub fn contains(&self, operator: &OperatorId) -> bool {
        self.roster.contains(operator)
    }
}

/// Floor an instant to the start of its hour in the given offset.
pub fn floor_to_local_hour(at: Time, offset: FixedOffset) -> Time {
    let local = at.with_timezone(&offset);
    let floored = local - Duration::minutes(i64::from(local.minute()))
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()));
    floored.with_timezone(&chrono::Utc)
}

/// The next local hour boundary strictly after `at`.
pub fn next_local_hour(at: Time, offset: FixedOffset) -> Time {
    floor_to_local_hour(at, offset) + Duration::hours(1)
}

/// Local hour-of-day (`0..24`) of an instant.
pub fn local_hour(at: Time, offset: FixedOffset) -> u32 {
    offset.from_utc_datetime(&at.naive_utc()).hour()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(s: &str) -> Time {
        s.parse().unwrap()
    }

    #[test]
    fn hour_index_bounds() {
        assert!(HourIndex::new(0).is_none());
        assert!(HourIndex::new(10).is_none());
        assert_eq!(HourIndex::new(9).unwrap().get(), 9);
        assert_eq!(HourIndex::FIRST.previous(), None);
        assert_eq!(HourIndex::new(4).unwrap().previous(), HourIndex::new(3));
    }

    #[test]
    fn hour_index_deserialization_rejects_out_of_range() {
        assert!(serde_json::from_str::<HourIndex>("0").is_err());
        assert_eq!(serde_json::from_str::<HourIndex>("7").unwrap().get(), 7);
    }

    #[test]
    fn shift_maps_instants_to_hour_slots() {
        let shift = Shift::new(at("2026-03-02T14:00:00Z"), "UTC", [], Utc::now());
        assert_eq!(shift.hour_index_at(at("2026-03-02T13:59:59Z")), None);
        assert_eq!(shift.hour_index_at(at("2026-03-02T14:00:00Z")).unwrap().get(), 1);
        assert_eq!(shift.hour_index_at(at("2026-03-02T16:30:00Z")).unwrap().get(), 3);
        assert_eq!(shift.hour_index_at(at("2026-03-02T22:59:59Z")).unwrap().get(), 9);
        assert_eq!(shift.hour_index_at(at("2026-03-02T23:00:00Z")), None);
    }

    #[test]
    fn hour_window_is_one_hour_long() {
        let shift = Shift::new(at("2026-03-02T06:00:00Z"), "UTC", [], Utc::now());
        let (start, end) = shift.hour_window(HourIndex::new(2).unwrap());
        assert_eq!(start, at("2026-03-02T07:00:00Z"));
        assert_eq!(end, at("2026-03-02T08:00:00Z"));
    }

    #[test]
    fn closed_shift_is_not_open() {
        let mut shift = Shift::new(at("2026-03-02T06:00:00Z"), "UTC", [], Utc::now());
        assert!(shift.is_open_at(at("2026-03-02T07:00:00Z")));
        shift.ended_at = Some(at("2026-03-02T07:00:00Z"));
        assert!(!shift.is_open_at(at("2026-03-02T07:00:00Z")));
    }

    #[test]
    fn local_hour_helpers_respect_offset() {
        let pst = FixedOffset::west_opt(8 * 3600).unwrap();
        let t = at("2026-03-02T14:25:10Z");
        assert_eq!(local_hour(t, pst), 6);
        assert_eq!(floor_to_local_hour(t, pst), at("2026-03-02T14:00:00Z"));
        assert_eq!(next_local_hour(t, pst), at("2026-03-02T15:00:00Z"));

        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        assert_eq!(floor_to_local_hour(t, ist), at("2026-03-02T13:30:00Z"));
    }
}
