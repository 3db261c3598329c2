//! Calendar items: recurring intervals a rule can be active in.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::hhmm_option;
use super::repeating::{RepeatingMode, RepeatingOption};

/// A set of intervals, anchored either on an absolute `dateTime` or on a
/// local `startTime`, lasting `duration` minutes and repeating per the
/// repeating option. A time-of-day anchor with mode `None` recurs daily.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarItem {
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    /// Interval length in minutes.
    pub duration: u32,
    #[serde(default, skip_serializing_if = "RepeatingOption::is_empty")]
    pub repeating_option: RepeatingOption,
}

impl CalendarItem {
    pub fn starting_at(date_time: DateTime<Utc>, duration: u32) -> Self {
        Self {
            date_time: Some(date_time),
            start_time: None,
            duration,
            repeating_option: RepeatingOption::none(),
        }
    }

    pub fn daily(start_time: NaiveTime, duration: u32) -> Self {
        Self {
            date_time: None,
            start_time: Some(start_time),
            duration,
            repeating_option: RepeatingOption::none(),
        }
    }

    pub fn with_repeating(mut self, repeating_option: RepeatingOption) -> Self {
        self.repeating_option = repeating_option;
        self
    }

    /// Exactly one of the anchors is set.
    pub fn has_single_anchor(&self) -> bool {
        self.date_time.is_some() != self.start_time.is_some()
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

    /// Exactly one anchor, a positive duration, and a repeating mode that
    /// fits the anchor.
    pub fn is_valid(&self) -> bool {
        self.has_single_anchor() && self.duration >= 1 && self.mode_fits_anchor()
    }

    /// True if `now` lies inside any instance of this item, evaluated in
    /// the server's zone.
    pub fn contains(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        let now = now.with_timezone(&tz).naive_local();
        let duration = Duration::minutes(i64::from(self.duration));

        if let Some(anchor) = self.date_time {
            let anchor = anchor.with_timezone(&tz).naive_local();
            return match self.repeating_option.mode {
                RepeatingMode::Yearly => [now.year(), now.year() - 1].iter().any(|&year| {
                    anchor
                        .with_year(year)
                        .is_some_and(|start| now >= start && now < start + duration)
                }),
                _ => now >= anchor && now < anchor + duration,
            };
        }

        let Some(start_time) = self.start_time else {
            return false;
        };

        if self.repeating_option.mode == RepeatingMode::Hourly {
            // Instances start every hour at the anchor's minute.
            let Some(base) = now.date().and_hms_opt(now.hour(), start_time.minute(), 0) else {
                return false;
            };
            let hours_back = duration.num_hours() + 1;
            return (0..=hours_back).any(|h| {
                let start = base - Duration::hours(h);
                now >= start && now < start + duration
            });
        }

        // Day-anchored instance: look back far enough that a window spanning
        // midnight (or several days) is still found.
        let days_back = duration.num_days() + 1;
        (0..=days_back).any(|d| {
            let date = now.date() - Duration::days(d);
            if !self.repeating_option.matches_date(date) {
                return false;
            }
            let start = date.and_time(start_time);
            now >= start && now < start + duration
        })
    }
}
