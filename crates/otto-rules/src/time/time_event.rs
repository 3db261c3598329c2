//! Time event items: discrete instants a rule can fire at.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::hhmm_option;
use super::repeating::{RepeatingMode, RepeatingOption};

/// A point-in-time trigger, anchored either on an absolute `dateTime` or a
/// local `time`, repeating per the repeating option. A time-of-day anchor
/// with mode `None` fires daily.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEventItem {
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "RepeatingOption::is_empty")]
    pub repeating_option: RepeatingOption,
}

impl TimeEventItem {
    pub fn at_date_time(date_time: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(date_time),
            time: None,
            repeating_option: RepeatingOption::none(),
        }
    }

    pub fn at_time(time: NaiveTime) -> Self {
        Self {
            date_time: None,
            time: Some(time),
            repeating_option: RepeatingOption::none(),
        }
    }

    pub fn with_repeating(mut self, repeating_option: RepeatingOption) -> Self {
        self.repeating_option = repeating_option;
        self
    }

    /// Exactly one of the anchors is set.
    pub fn has_single_anchor(&self) -> bool {
        self.date_time.is_some() != self.time.is_some()
    }

    /// Absolute anchors repeat never or yearly, time-of-day anchors take
    /// every mode but yearly.
    pub fn mode_fits_anchor(&self) -> bool {
        if self.date_time.is_some() {
            matches!(
                self.repeating_option.mode,
                RepeatingMode::None | RepeatingMode::Yearly
            )
        } else {
            self.repeating_option.mode != RepeatingMode::Yearly
        }
    }

    /// Exactly one anchor and a repeating mode that fits it.
    pub fn is_valid(&self) -> bool {
        self.has_single_anchor() && self.mode_fits_anchor()
    }

    /// True if an instance of this item lies in `(last, now]`, evaluated in
    /// the server's zone.
    pub fn fires_between(&self, last: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
        if now <= last {
            return false;
        }
        let last = last.with_timezone(&tz).naive_local();
        let now = now.with_timezone(&tz).naive_local();
        let in_window = |instant: NaiveDateTime| instant > last && instant <= now;

        if let Some(anchor) = self.date_time {
            let anchor = anchor.with_timezone(&tz).naive_local();
            return match self.repeating_option.mode {
                RepeatingMode::Yearly => (last.year()..=now.year())
                    .any(|year| anchor.with_year(year).is_some_and(in_window)),
                _ => in_window(anchor),
            };
        }

        let Some(time) = self.time else {
            return false;
        };

        if self.repeating_option.mode == RepeatingMode::Hourly {
            let hours = (now - last).num_hours() + 1;
            let Some(base) = now.date().and_hms_opt(now.hour(), time.minute(), 0) else {
                return false;
            };
            return (0..=hours).any(|h| in_window(base - Duration::hours(h)));
        }

        let days = (now.date() - last.date()).num_days();
        (0..=days).any(|d| {
            let date = now.date() - Duration::days(d);
            self.repeating_option.matches_date(date) && in_window(date.and_time(time))
        })
    }
}
