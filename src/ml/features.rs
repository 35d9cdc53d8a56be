//! Per-workout feature extraction from heart rate samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::WorkoutRecord;
use crate::zones::{self, ZoneBounds};

/// Number of numeric features fed to the models
pub const FEATURE_COUNT: usize = 8;

/// Feature names, in the order of [`WorkoutFeatures::values`]
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "duration",
    "totalEnergyBurned",
    "totalDistance",
    "averageHeartRate",
    "percentInZone",
    "minHR",
    "maxHR",
    "stdHR",
];

/// Stored summary of one workout, identified by its start date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub start_date: DateTime<Utc>,
    pub duration: f64,
    pub total_energy_burned: f64,
    pub total_distance: f64,
    pub average_heart_rate: f64,
    pub percent_in_zone: f64,
}

impl FeatureVector {
    pub fn from_workout(workout: &WorkoutRecord, average_heart_rate: f64, percent_in_zone: f64) -> Self {
        Self {
            start_date: workout.start_date,
            duration: workout.duration,
            total_energy_burned: workout.total_energy_burned,
            total_distance: workout.total_distance,
            average_heart_rate,
            percent_in_zone,
        }
    }
}

/// Spread of the heart rate samples, all 0 for an empty sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartRateStats {
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl HeartRateStats {
    /// Min, max and population standard deviation around `average`.
    ///
    /// `average` is taken as given (it may come from a separate platform
    /// query), not recomputed from `samples`.
    pub fn around(samples: &[f64], average: f64) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance = samples
            .iter()
            .map(|bpm| (bpm - average).powi(2))
            .sum::<f64>()
            / samples.len() as f64;

        Self {
            min,
            max,
            std: variance.sqrt(),
        }
    }
}

/// Everything the models know about a workout
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutFeatures {
    pub vector: FeatureVector,
    pub stats: HeartRateStats,
    pub sample_count: usize,
}

impl WorkoutFeatures {
    /// No heart rate samples: averages and zone share are placeholders
    pub fn low_confidence(&self) -> bool {
        self.sample_count == 0
    }

    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        feature_values(&self.vector, &self.stats)
    }
}

/// Model input in [`FEATURE_NAMES`] order
pub fn feature_values(vector: &FeatureVector, stats: &HeartRateStats) -> [f64; FEATURE_COUNT] {
    [
        vector.duration,
        vector.total_energy_burned,
        vector.total_distance,
        vector.average_heart_rate,
        vector.percent_in_zone,
        stats.min,
        stats.max,
        stats.std,
    ]
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Summarize a workout and its heart rate samples
pub fn extract(workout: &WorkoutRecord, samples: &[f64], bounds: ZoneBounds) -> WorkoutFeatures {
    let average = mean(samples);
    let percent = zones::percent_in_zone(samples, bounds);

    WorkoutFeatures {
        vector: FeatureVector::from_workout(workout, average, percent),
        stats: HeartRateStats::around(samples, average),
        sample_count: samples.len(),
    }
}
