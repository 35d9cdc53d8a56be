//! Split classifier: nearest standardized centroid

use std::collections::BTreeSet;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use super::training_store::TrainingRow;

/// Predicts the split of an unlabeled workout.
///
/// Features are standardized with the training mean and standard deviation,
/// then the workout is assigned to the split whose mean standardized feature
/// vector is closest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitClassifier {
    labels: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    /// One centroid per label, same order as `labels`
    centroids: Vec<Vec<f64>>,
}

impl SplitClassifier {
    /// Train from labeled rows. No rows, no model.
    pub fn train(rows: &[TrainingRow]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }

        let labels: Vec<String> = rows
            .iter()
            .map(|r| r.split.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let flat: Vec<f64> = rows.iter().flat_map(|r| r.values()).collect();
        let records = Array2::from_shape_vec((rows.len(), FEATURE_COUNT), flat).ok()?;

        let means = records.mean_axis(Axis(0))?;
        // Constant features would divide by zero
        let scales = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        let standardized = (&records - &means) / &scales;

        let centroids = labels
            .iter()
            .map(|label| {
                let members: Vec<usize> = rows
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| &r.split == label)
                    .map(|(i, _)| i)
                    .collect();
                standardized
                    .select(Axis(0), &members)
                    .mean_axis(Axis(0))
                    .map(|c| c.to_vec())
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            labels,
            means: means.to_vec(),
            scales: scales.to_vec(),
            centroids,
        })
    }

    /// Splits seen during training, sorted
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn predict(&self, values: &[f64; FEATURE_COUNT]) -> Option<String> {
        // One observed split: nothing to choose between
        if self.labels.len() == 1 {
            return self.labels.first().cloned();
        }

        let point = (Array1::from_vec(values.to_vec()) - Array1::from_vec(self.means.clone()))
            / Array1::from_vec(self.scales.clone());

        self.centroids
            .iter()
            .zip(&self.labels)
            .map(|(centroid, label)| {
                let distance: f64 = point
                    .iter()
                    .zip(centroid)
                    .map(|(p, c)| (p - c).powi(2))
                    .sum();
                (distance, label)
            })
            .filter(|(distance, _)| distance.is_finite())
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, label)| label.clone())
    }
}
