//! Trained model bundle and its on-disk artifacts

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::classifier::SplitClassifier;
use super::features::{FEATURE_COUNT, FEATURE_NAMES};
use super::regressor::{StatRegressor, StatRegressors};
use super::training_store::{self, TrainingRow};

const CLASSIFIER_FILE: &str = "classifier.json";
const REGRESSOR_DIR: &str = "regressors";

/// Classifier and regressors trained from one snapshot of the training table
#[derive(Debug, Clone)]
pub struct SplitModels {
    pub classifier: SplitClassifier,
    pub regressors: StatRegressors,
    pub trained_at: DateTime<Utc>,
    pub rows: usize,
    /// Digest of the training rows these models were fit on
    pub digest: String,
}

impl SplitModels {
    pub fn train(rows: &[TrainingRow]) -> Option<Self> {
        Some(Self {
            classifier: SplitClassifier::train(rows)?,
            regressors: StatRegressors::train(rows)?,
            trained_at: Utc::now(),
            rows: rows.len(),
            digest: training_store::digest(rows),
        })
    }

    pub fn predict_split(&self, values: &[f64; FEATURE_COUNT]) -> Option<String> {
        self.classifier.predict(values)
    }
}

#[derive(Serialize, Deserialize)]
struct ClassifierArtifact {
    trained_at: DateTime<Utc>,
    rows: usize,
    /// Empty for artifacts written without one, which never match a table
    #[serde(default)]
    digest: String,
    classifier: SplitClassifier,
}

/// Directory holding `classifier.json` and `regressors/<feature>.json`
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn regressor_path(&self, feature: &str) -> PathBuf {
        self.dir.join(REGRESSOR_DIR).join(format!("{feature}.json"))
    }

    /// Write every artifact, each one atomically
    pub async fn save(&self, models: &SplitModels) -> Result<()> {
        tokio::fs::create_dir_all(self.dir.join(REGRESSOR_DIR)).await?;

        let artifact = ClassifierArtifact {
            trained_at: models.trained_at,
            rows: models.rows,
            digest: models.digest.clone(),
            classifier: models.classifier.clone(),
        };
        write_json(&self.dir.join(CLASSIFIER_FILE), &artifact).await?;

        for regressor in models.regressors.regressors() {
            write_json(&self.regressor_path(regressor.feature()), regressor).await?;
        }
        debug!(dir = %self.dir.display(), rows = models.rows, "saved models");
        Ok(())
    }

    /// Reload saved models. Any missing or unreadable artifact means no model.
    pub fn load(&self) -> Option<SplitModels> {
        match self.try_load() {
            Ok(models) => Some(models),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "no usable saved models");
                None
            }
        }
    }

    fn try_load(&self) -> Result<SplitModels> {
        let artifact: ClassifierArtifact = read_json(&self.dir.join(CLASSIFIER_FILE))?;
        let regressors = FEATURE_NAMES
            .iter()
            .map(|feature| read_json::<StatRegressor>(&self.regressor_path(feature)))
            .collect::<Result<Vec<_>>>()?;

        Ok(SplitModels {
            classifier: artifact.classifier,
            regressors: StatRegressors::from_parts(regressors),
            trained_at: artifact.trained_at,
            rows: artifact.rows,
            digest: artifact.digest,
        })
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("publishing {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
