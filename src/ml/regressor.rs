//! Per-split expected workout stats (linear regression, linfa)
//!
//! Each feature gets its own regressor with the split label as the only
//! input. The label is one-hot encoded and fitted without intercept, so the
//! coefficient of each split is the mean of that feature over the split's
//! workouts.

use std::collections::{BTreeMap, BTreeSet};

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::FEATURE_NAMES;
use super::training_store::TrainingRow;

/// Expected value of one feature for each split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRegressor {
    feature: String,
    estimates: BTreeMap<String, f64>,
}

impl StatRegressor {
    /// Fit the regressor for feature number `index` in [`FEATURE_NAMES`]
    pub fn train(rows: &[TrainingRow], index: usize) -> Option<Self> {
        let feature = FEATURE_NAMES.get(index)?.to_string();
        if rows.is_empty() {
            return None;
        }

        let labels: Vec<&str> = rows
            .iter()
            .map(|r| r.split.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| r.values()[index]).collect();

        let estimates = match fit_one_hot(rows, &labels, &targets) {
            Some(coefficients) => labels
                .iter()
                .zip(coefficients)
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
            None => {
                debug!(feature = %feature, "linear fit failed, using group means");
                group_means(rows, &targets)
            }
        };

        Some(Self { feature, estimates })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn predict(&self, split: &str) -> Option<f64> {
        self.estimates.get(split).copied()
    }
}

fn fit_one_hot(rows: &[TrainingRow], labels: &[&str], targets: &[f64]) -> Option<Vec<f64>> {
    let mut records = Array2::<f64>::zeros((rows.len(), labels.len()));
    for (i, row) in rows.iter().enumerate() {
        let column = labels.binary_search(&row.split.as_str()).ok()?;
        records[[i, column]] = 1.0;
    }

    let dataset = Dataset::new(records, Array1::from_vec(targets.to_vec()));
    let model = LinearRegression::new()
        .with_intercept(false)
        .fit(&dataset)
        .ok()?;

    let params = model.params();
    if params.iter().any(|p| !p.is_finite()) {
        return None;
    }
    Some(params.to_vec())
}

fn group_means(rows: &[TrainingRow], targets: &[f64]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (row, value) in rows.iter().zip(targets) {
        let entry = sums.entry(row.split.clone()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(label, (sum, count))| (label, sum / count as f64))
        .collect()
}

/// One [`StatRegressor`] per feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRegressors {
    regressors: Vec<StatRegressor>,
}

impl StatRegressors {
    pub fn train(rows: &[TrainingRow]) -> Option<Self> {
        let regressors: Vec<_> = (0..FEATURE_NAMES.len())
            .filter_map(|index| StatRegressor::train(rows, index))
            .collect();

        if regressors.is_empty() {
            None
        } else {
            Some(Self { regressors })
        }
    }

    pub fn from_parts(regressors: Vec<StatRegressor>) -> Self {
        Self { regressors }
    }

    pub fn regressors(&self) -> &[StatRegressor] {
        &self.regressors
    }

    /// Feature name to expected value; empty for a split never trained on
    pub fn predict(&self, split: &str) -> BTreeMap<String, f64> {
        self.regressors
            .iter()
            .filter_map(|r| r.predict(split).map(|v| (r.feature.clone(), v)))
            .collect()
    }
}
