//! Calendar windows and point-in-time events driving time-based rules.

mod calendar;
mod repeating;
mod time_event;

pub use calendar::CalendarItem;
pub use repeating::{RepeatingMode, RepeatingOption};
pub use time_event::TimeEventItem;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The time trigger/gate of a rule: calendar windows, discrete time events,
/// or both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDescriptor {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calendar_items: Vec<CalendarItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_event_items: Vec<TimeEventItem>,
}

impl TimeDescriptor {
    pub fn from_calendar_items(calendar_items: Vec<CalendarItem>) -> Self {
        Self {
            calendar_items,
            time_event_items: Vec::new(),
        }
    }

    pub fn from_time_event_items(time_event_items: Vec<TimeEventItem>) -> Self {
        Self {
            calendar_items: Vec::new(),
            time_event_items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calendar_items.is_empty() && self.time_event_items.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_empty()
    }

    /// True if any calendar item currently contains the clock.
    pub fn contains(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        self.calendar_items.iter().any(|item| item.contains(now, tz))
    }

    /// True if any time event item has an instance in `(last, now]`.
    pub fn fires_between(&self, last: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
        self.time_event_items
            .iter()
            .any(|item| item.fires_between(last, now, tz))
    }
}

/// Serde adapter for optional times of day in `HH:mm` form.
pub(crate) mod hhmm_option {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_str(&time.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|s| NaiveTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn descriptor_emptiness() {
        assert!(TimeDescriptor::default().is_empty());
        let descriptor = TimeDescriptor::from_time_event_items(vec![TimeEventItem::at_time(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        )]);
        assert!(!descriptor.is_empty());
        assert!(descriptor.is_valid());
    }

    #[test]
    fn start_time_round_trips_as_hhmm() {
        let item = CalendarItem::daily(NaiveTime::from_hms_opt(8, 5, 0).unwrap(), 60);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["startTime"], "08:05");
        let back: CalendarItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn date_time_round_trips_as_epoch_seconds() {
        use chrono::TimeZone;
        let item = TimeEventItem::at_date_time(
            chrono::Utc.with_ymd_and_hms(2017, 3, 6, 10, 0, 0).unwrap(),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["dateTime"], 1488794400);
        let back: TimeEventItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
