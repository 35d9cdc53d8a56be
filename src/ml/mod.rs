//! ML module - Split classification and workout analytics
//!
//! Features:
//! - Feature extraction from heart rate samples
//! - Labeled training table persisted as CSV
//! - Split classifier and per-split stat regressors (linfa)
//! - Per-split summaries over a timeframe

pub mod classifier;
pub mod features;
pub mod model_store;
pub mod regressor;
pub mod training_store;

pub use classifier::SplitClassifier;
pub use features::{FeatureVector, HeartRateStats, WorkoutFeatures};
pub use model_store::{ModelStore, SplitModels};
pub use regressor::StatRegressors;
pub use training_store::{TrainingDataStore, TrainingRow};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};

/// Window of history shown for a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timeframe {
    LastWeek,
    LastMonth,
    #[default]
    LastYear,
    AllTime,
}

impl Timeframe {
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::LastWeek,
            Timeframe::LastMonth,
            Timeframe::LastYear,
            Timeframe::AllTime,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::LastWeek => "Last Week",
            Timeframe::LastMonth => "Last Month",
            Timeframe::LastYear => "Last Year",
            Timeframe::AllTime => "All Time",
        }
    }

    /// Earliest start date included, `None` for no lower bound
    pub fn start_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::LastWeek => Some(now - chrono::Duration::weeks(1)),
            Timeframe::LastMonth => now.checked_sub_months(Months::new(1)),
            Timeframe::LastYear => now.checked_sub_months(Months::new(12)),
            Timeframe::AllTime => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = std::convert::Infallible;

    /// Accepts labels ("Last Week") and kebab-case ("last-week").
    /// Anything else is treated as the last month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "-");
        Ok(match normalized.as_str() {
            "last-week" => Timeframe::LastWeek,
            "last-year" => Timeframe::LastYear,
            "all-time" => Timeframe::AllTime,
            _ => Timeframe::LastMonth,
        })
    }
}

/// Chartable per-workout metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkoutMetric {
    Duration,
    AverageHeartRate,
    EnergyBurned,
    PercentInZone,
}

impl WorkoutMetric {
    pub fn all() -> &'static [WorkoutMetric] {
        &[
            WorkoutMetric::Duration,
            WorkoutMetric::AverageHeartRate,
            WorkoutMetric::EnergyBurned,
            WorkoutMetric::PercentInZone,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkoutMetric::Duration => "Duration",
            WorkoutMetric::AverageHeartRate => "Heart Rate",
            WorkoutMetric::EnergyBurned => "Calories",
            WorkoutMetric::PercentInZone => "% in Zone",
        }
    }

    /// Display value: minutes (rounded) and percent (0-100)
    pub fn value(&self, workout: &FeatureVector) -> f64 {
        match self {
            WorkoutMetric::Duration => (workout.duration / 60.0).round(),
            WorkoutMetric::AverageHeartRate => workout.average_heart_rate,
            WorkoutMetric::EnergyBurned => workout.total_energy_burned,
            WorkoutMetric::PercentInZone => workout.percent_in_zone * 100.0,
        }
    }
}

/// Averages over a split's workouts in a timeframe, 0 when there are none
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SplitSummary {
    pub workouts: usize,
    pub average_duration: f64,
    pub average_energy_burned: f64,
    pub average_heart_rate: f64,
    pub average_percent_in_zone: f64,
}

/// Workout analytics for one split
pub struct Analytics {
    workouts: Vec<FeatureVector>,
}

impl Analytics {
    pub fn new(workouts: Vec<FeatureVector>) -> Self {
        Self { workouts }
    }

    /// Restrict to workouts started within `timeframe` and not in the future
    pub fn within(&self, timeframe: Timeframe, now: DateTime<Utc>) -> Self {
        let start = timeframe.start_date(now);
        let workouts = self
            .workouts
            .iter()
            .filter(|w| start.is_none_or(|s| w.start_date >= s) && w.start_date <= now)
            .cloned()
            .collect();
        Self { workouts }
    }

    fn average(&self, field: impl Fn(&FeatureVector) -> f64) -> f64 {
        if self.workouts.is_empty() {
            return 0.0;
        }
        self.workouts.iter().map(field).sum::<f64>() / self.workouts.len() as f64
    }

    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            workouts: self.workouts.len(),
            average_duration: self.average(|w| w.duration),
            average_energy_burned: self.average(|w| w.total_energy_burned),
            average_heart_rate: self.average(|w| w.average_heart_rate),
            average_percent_in_zone: self.average(|w| w.percent_in_zone),
        }
    }

    /// Chart points, oldest first
    pub fn series(&self, metric: WorkoutMetric) -> Vec<(DateTime<Utc>, f64)> {
        let mut points: Vec<_> = self
            .workouts
            .iter()
            .map(|w| (w.start_date, metric.value(w)))
            .collect();
        points.sort_by_key(|(date, _)| *date);
        points
    }

    /// Largest value of the metric, 1 when there are no workouts
    pub fn max_value(&self, metric: WorkoutMetric) -> f64 {
        self.workouts
            .iter()
            .map(|w| metric.value(w))
            .reduce(f64::max)
            .unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn create_workout_days_ago(days_ago: i64, duration: f64, pct: f64) -> FeatureVector {
        FeatureVector {
            start_date: now() - chrono::Duration::days(days_ago),
            duration,
            total_energy_burned: duration / 10.0,
            total_distance: 0.0,
            average_heart_rate: 120.0,
            percent_in_zone: pct,
        }
    }

    #[test]
    fn test_summary_empty() {
        let summary = Analytics::new(vec![]).summary();
        assert_eq!(summary, SplitSummary::default());
    }

    #[test]
    fn test_summary_within_week() {
        let analytics = Analytics::new(vec![
            create_workout_days_ago(1, 3000.0, 0.5),
            create_workout_days_ago(3, 3600.0, 0.3),
            create_workout_days_ago(30, 6000.0, 0.9),
        ]);

        let summary = analytics.within(Timeframe::LastWeek, now()).summary();
        assert_eq!(summary.workouts, 2);
        assert_eq!(summary.average_duration, 3300.0);
        assert!((summary.average_percent_in_zone - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_future_workouts_excluded() {
        let analytics = Analytics::new(vec![create_workout_days_ago(-2, 3000.0, 0.5)]);
        assert_eq!(analytics.within(Timeframe::AllTime, now()).summary().workouts, 0);
    }

    #[test]
    fn test_timeframe_start_dates() {
        assert_eq!(Timeframe::AllTime.start_date(now()), None);
        assert_eq!(
            Timeframe::LastYear.start_date(now()),
            Some(Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap())
        );
        assert_eq!(
            Timeframe::LastMonth.start_date(now()),
            Some(Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("Last Week".parse::<Timeframe>().unwrap(), Timeframe::LastWeek);
        assert_eq!("all-time".parse::<Timeframe>().unwrap(), Timeframe::AllTime);
        assert_eq!("whenever".parse::<Timeframe>().unwrap(), Timeframe::LastMonth);
        assert_eq!(Timeframe::default(), Timeframe::LastYear);
    }

    #[test]
    fn test_series_and_max() {
        let analytics = Analytics::new(vec![
            create_workout_days_ago(1, 3630.0, 0.5),
            create_workout_days_ago(5, 1800.0, 0.25),
        ]);

        let series = analytics.series(WorkoutMetric::Duration);
        assert_eq!(series.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![30.0, 61.0]);
        assert_eq!(analytics.max_value(WorkoutMetric::PercentInZone), 50.0);
        assert_eq!(Analytics::new(vec![]).max_value(WorkoutMetric::Duration), 1.0);
        for metric in WorkoutMetric::all() {
            assert_eq!(analytics.series(*metric).len(), 2, "{}", metric.label());
        }
    }
}
