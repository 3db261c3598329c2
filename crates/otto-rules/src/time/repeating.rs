//! Repetition rules for calendar and time event items.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// How an item repeats over the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepeatingMode {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Repetition rule: a mode plus the week days (1 = Monday … 7 = Sunday)
/// or month days (1..31) it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatingOption {
    #[serde(default)]
    pub mode: RepeatingMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub week_days: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub month_days: Vec<u8>,
}

impl RepeatingOption {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn weekly(week_days: Vec<u8>) -> Self {
        Self {
            mode: RepeatingMode::Weekly,
            week_days,
            month_days: Vec::new(),
        }
    }

    pub fn monthly(month_days: Vec<u8>) -> Self {
        Self {
            mode: RepeatingMode::Monthly,
            week_days: Vec::new(),
            month_days,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mode == RepeatingMode::None && self.week_days.is_empty() && self.month_days.is_empty()
    }

    /// Weekly requires week days, monthly requires month days; every other
    /// mode requires both lists empty. Day numbers must be in range.
    pub fn is_valid(&self) -> bool {
        if !self.week_days.iter().all(|d| (1..=7).contains(d)) {
            return false;
        }
        if !self.month_days.iter().all(|d| (1..=31).contains(d)) {
            return false;
        }
        match self.mode {
            RepeatingMode::Weekly => !self.week_days.is_empty() && self.month_days.is_empty(),
            RepeatingMode::Monthly => !self.month_days.is_empty() && self.week_days.is_empty(),
            _ => self.week_days.is_empty() && self.month_days.is_empty(),
        }
    }

    /// True if an occurrence may start on the given date.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        match self.mode {
            RepeatingMode::Weekly => self
                .week_days
                .contains(&(date.weekday().number_from_monday() as u8)),
            RepeatingMode::Monthly => self.month_days.contains(&(date.day() as u8)),
            _ => true,
        }
    }
}
