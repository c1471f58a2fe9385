//! Application usage rollups
//!
//! Inventory systems report foreground minutes per computer, day and
//! application. [`aggregate_usage`] totals one application across the fleet
//! over a look-back window; [`minutes_by_app`] ranks everything one computer
//! ran. Application names are matched through [`normalize_app_name`], the
//! same key staleness grouping uses.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::record::normalize_key;
use crate::staleness::normalize_app_name;

/// Foreground time of one application on one computer on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub computer: String,
    pub date: NaiveDate,
    pub app_name: String,
    pub foreground_minutes: u32,
}

impl UsageSample {
    pub fn new(
        computer: impl Into<String>,
        date: NaiveDate,
        app_name: impl Into<String>,
        foreground_minutes: u32,
    ) -> Self {
        Self {
            computer: computer.into(),
            date,
            app_name: app_name.into(),
            foreground_minutes,
        }
    }
}

/// Inclusive date range `[end - days, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl UsageWindow {
    /// Window reaching `days` back from `end`, saturating at the earliest
    /// representable date.
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        (self.start..=self.end).contains(&date)
    }
}

/// One computer's use of one application over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputerUsage {
    /// Normalized computer key
    pub computer: String,
    pub total_minutes: u64,
    /// Days with any foreground time
    pub days_used: usize,
    /// `total_minutes / days_used`, rounded to two decimals
    pub average_minutes_per_day: f64,
    pub first_used: NaiveDate,
    pub last_used: NaiveDate,
}

/// Output of [`aggregate_usage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    /// Normalized application name
    pub app: String,
    pub window: UsageWindow,
    /// Computers that used the application, sorted by key
    pub computers: Vec<ComputerUsage>,
    /// Samples skipped for a blank computer key
    pub unkeyed: usize,
}

impl UsageReport {
    pub fn total_minutes(&self) -> u64 {
        self.computers.iter().map(|c| c.total_minutes).sum()
    }
}

/// Minutes one application ran on one computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppMinutes {
    /// First spelling seen
    pub app: String,
    pub minutes: u64,
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Total `app_name` usage per computer inside `window`.
///
/// Computers with no foreground time are left out.
pub fn aggregate_usage(samples: &[UsageSample], app_name: &str, window: UsageWindow) -> UsageReport {
    let app = normalize_app_name(app_name);
    let mut per_day: BTreeMap<String, BTreeMap<NaiveDate, u64>> = BTreeMap::new();
    let mut unkeyed = 0;

    for sample in samples
        .iter()
        .filter(|s| window.contains(s.date) && normalize_app_name(&s.app_name) == app)
    {
        let Some(computer) = normalize_key(&sample.computer) else {
            unkeyed += 1;
            continue;
        };
        *per_day
            .entry(computer)
            .or_default()
            .entry(sample.date)
            .or_default() += u64::from(sample.foreground_minutes);
    }

    let computers: Vec<ComputerUsage> = per_day
        .into_iter()
        .filter_map(|(computer, days)| {
            let used: Vec<(NaiveDate, u64)> = days.into_iter().filter(|(_, m)| *m > 0).collect();
            let (first_used, _) = *used.first()?;
            let (last_used, _) = *used.last()?;
            let total_minutes: u64 = used.iter().map(|(_, m)| m).sum();
            Some(ComputerUsage {
                computer,
                total_minutes,
                days_used: used.len(),
                average_minutes_per_day: round_hundredths(total_minutes as f64 / used.len() as f64),
                first_used,
                last_used,
            })
        })
        .collect();

    tracing::debug!(
        app = %app,
        computers = computers.len(),
        unkeyed,
        "Aggregated application usage"
    );
    UsageReport {
        app,
        window,
        computers,
        unkeyed,
    }
}

/// Every application `computer` ran inside `window`, most minutes first.
/// Ties are ordered by normalized name.
pub fn minutes_by_app(samples: &[UsageSample], computer: &str, window: UsageWindow) -> Vec<AppMinutes> {
    let Some(computer) = normalize_key(computer) else {
        return Vec::new();
    };

    let mut totals: BTreeMap<String, AppMinutes> = BTreeMap::new();
    for sample in samples.iter().filter(|s| {
        window.contains(s.date) && normalize_key(&s.computer).as_deref() == Some(computer.as_str())
    }) {
        totals
            .entry(normalize_app_name(&sample.app_name))
            .or_insert_with(|| AppMinutes {
                app: sample.app_name.trim().to_string(),
                minutes: 0,
            })
            .minutes += u64::from(sample.foreground_minutes);
    }

    // BTreeMap order makes the stable sort break ties by name
    let mut ranked: Vec<AppMinutes> = totals.into_values().filter(|a| a.minutes > 0).collect();
    ranked.sort_by(|a, b| b.minutes.cmp(&a.minutes));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn window_is_inclusive() {
        let window = UsageWindow::ending(day(10), 3);
        assert_eq!(window.start(), day(7));
        assert!(window.contains(day(7)));
        assert!(window.contains(day(10)));
        assert!(!window.contains(day(6)));
        assert!(!window.contains(day(11)));
    }

    #[test]
    fn window_saturates_at_earliest_date() {
        let window = UsageWindow::ending(NaiveDate::MIN, 30);
        assert_eq!(window.start(), NaiveDate::MIN);
    }

    #[test]
    fn average_is_rounded_per_used_day() {
        let samples = vec![
            UsageSample::new("C1", day(1), "Slack", 10),
            UsageSample::new("C1", day(1), "Slack.app", 5),
            UsageSample::new("C1", day(2), "Slack", 0),
            UsageSample::new("C1", day(3), "slack", 7),
            UsageSample::new("C1", day(4), "Zoom", 60),
        ];

        let report = aggregate_usage(&samples, "Slack", UsageWindow::ending(day(4), 30));

        assert_eq!(report.app, "slack");
        let usage = &report.computers[0];
        assert_eq!(usage.total_minutes, 22);
        assert_eq!(usage.days_used, 2);
        assert_eq!(usage.average_minutes_per_day, 11.0);
        assert_eq!((usage.first_used, usage.last_used), (day(1), day(3)));
    }

    #[test]
    fn idle_computers_are_left_out() {
        let samples = vec![
            UsageSample::new("C1", day(1), "Slack", 0),
            UsageSample::new("C2", day(1), "Slack", 3),
            UsageSample::new(" ", day(1), "Slack", 9),
        ];

        let report = aggregate_usage(&samples, "Slack", UsageWindow::ending(day(1), 1));

        let keys: Vec<_> = report.computers.iter().map(|c| c.computer.as_str()).collect();
        assert_eq!(keys, vec!["C2"]);
        assert_eq!(report.unkeyed, 1);
    }

    #[test]
    fn thirds_round_to_two_places() {
        assert_eq!(round_hundredths(10.0 / 3.0), 3.33);
        assert_eq!(round_hundredths(20.0 / 3.0), 6.67);
    }
}
