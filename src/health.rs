//! Health data source - workouts and heart rate samples
//!
//! The analytics core only needs a handful of queries from the platform
//! that records workouts. They are expressed by [`HealthSource`]; every
//! query degrades to a numeric default instead of failing.

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::zones;

/// Resting heart rate used when no statistic is available
pub const DEFAULT_RESTING_HR: f64 = 72.0;
/// Age assumed when no date of birth is stored
pub const DEFAULT_AGE_YEARS: i32 = 30;

/// Recorded strength training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub id: String,
    pub start_date: DateTime<Utc>,
    /// Seconds
    pub duration: f64,
    /// kcal
    #[serde(default)]
    pub total_energy_burned: f64,
    /// Meters
    #[serde(default)]
    pub total_distance: f64,
}

impl WorkoutRecord {
    /// Start plus duration. Negative, NaN or out-of-range durations end at
    /// the start.
    pub fn end_date(&self) -> DateTime<Utc> {
        let millis = (self.duration.max(0.0) * 1000.0) as i64;
        self.start_date
            .checked_add_signed(Duration::milliseconds(millis))
            .unwrap_or(self.start_date)
    }
}

/// Single heart rate reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: f64,
}

/// Time window of heart rate samples requested for a workout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SeriesWindow {
    /// Workout start to workout end
    #[default]
    Workout,
    /// One workout duration before the start to one after the end
    Expanded,
}

/// Queries the analytics core needs from the health data platform
pub trait HealthSource: Send + Sync {
    /// All strength training sessions, most recently finished first
    fn fetch_workouts(&self) -> impl Future<Output = Vec<WorkoutRecord>> + Send;

    /// Mean bpm over the workout, 0 if unavailable
    fn fetch_average_heart_rate(&self, workout: &WorkoutRecord) -> impl Future<Output = f64> + Send;

    /// Most recent resting bpm, [`DEFAULT_RESTING_HR`] if unavailable
    fn fetch_resting_heart_rate(&self) -> impl Future<Output = f64> + Send;

    /// Age-predicted maximum heart rate
    fn fetch_max_hr(&self) -> impl Future<Output = f64> + Send;

    /// Raw bpm samples for the workout
    fn fetch_heart_rate_series(&self, workout: &WorkoutRecord) -> impl Future<Output = Vec<f64>> + Send;
}

/// Workout together with its heart rate readings, as exported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedWorkout {
    #[serde(flatten)]
    pub workout: WorkoutRecord,
    #[serde(default)]
    pub heart_rate: Vec<HeartRateSample>,
}

/// Health data export file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthExport {
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub resting_heart_rate: Option<f64>,
    #[serde(default)]
    pub workouts: Vec<ExportedWorkout>,
}

/// Health source backed by an exported snapshot of the platform data
#[derive(Debug, Clone, Default)]
pub struct FixtureHealthSource {
    export: HealthExport,
    window: SeriesWindow,
    today: Option<NaiveDate>,
}

impl FixtureHealthSource {
    pub fn new(export: HealthExport) -> Self {
        Self {
            export,
            window: SeriesWindow::default(),
            today: None,
        }
    }

    /// Load a JSON export file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading health export {}", path.display()))?;
        let export: HealthExport = serde_json::from_str(&text)
            .with_context(|| format!("parsing health export {}", path.display()))?;
        debug!(workouts = export.workouts.len(), "loaded health export");
        Ok(Self::new(export))
    }

    pub fn with_window(mut self, window: SeriesWindow) -> Self {
        self.window = window;
        self
    }

    /// Pin the current date used for age calculation
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn samples_for(&self, workout: &WorkoutRecord) -> &[HeartRateSample] {
        self.export
            .workouts
            .iter()
            .find(|w| w.workout.id == workout.id)
            .map(|w| w.heart_rate.as_slice())
            .unwrap_or(&[])
    }

    fn samples_between(
        &self,
        workout: &WorkoutRecord,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<f64> {
        self.samples_for(workout)
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .map(|s| s.bpm)
            .collect()
    }
}

impl HealthSource for FixtureHealthSource {
    async fn fetch_workouts(&self) -> Vec<WorkoutRecord> {
        let mut workouts: Vec<_> = self
            .export
            .workouts
            .iter()
            .map(|w| w.workout.clone())
            .collect();
        workouts.sort_by(|a, b| b.end_date().cmp(&a.end_date()));
        workouts
    }

    async fn fetch_average_heart_rate(&self, workout: &WorkoutRecord) -> f64 {
        let samples = self.samples_between(workout, workout.start_date, workout.end_date());
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    async fn fetch_resting_heart_rate(&self) -> f64 {
        self.export.resting_heart_rate.unwrap_or(DEFAULT_RESTING_HR)
    }

    async fn fetch_max_hr(&self) -> f64 {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        match self.export.date_of_birth {
            Some(dob) => zones::max_heart_rate(dob, today),
            None => 220.0 - DEFAULT_AGE_YEARS as f64,
        }
    }

    async fn fetch_heart_rate_series(&self, workout: &WorkoutRecord) -> Vec<f64> {
        let (from, to) = match self.window {
            SeriesWindow::Workout => (workout.start_date, workout.end_date()),
            SeriesWindow::Expanded => {
                let (start, end) = (workout.start_date, workout.end_date());
                let span = end - start;
                (
                    start.checked_sub_signed(span).unwrap_or(start),
                    end.checked_add_signed(span).unwrap_or(end),
                )
            }
        };
        self.samples_between(workout, from, to)
    }
}
