//! Labeled training table, one row per workout
//!
//! Rows are keyed by workout start date. The table lives in memory and is
//! mirrored to a CSV file that is rewritten (temp file + rename) after
//! every upsert. Its digest identifies the exact content models were
//! trained on, across restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::features::{FEATURE_COUNT, FeatureVector, HeartRateStats, feature_values};

/// Labeled workout: the unit the models are trained on
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub split: String,
    pub features: FeatureVector,
    pub stats: HeartRateStats,
}

impl TrainingRow {
    pub fn new(split: impl Into<String>, features: FeatureVector, stats: HeartRateStats) -> Self {
        Self {
            split: split.into(),
            features,
            stats,
        }
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.features.start_date
    }

    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        feature_values(&self.features, &self.stats)
    }
}

/// On-disk layout of a row
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    split: String,
    #[serde(rename = "startDate")]
    start_date: DateTime<Utc>,
    duration: f64,
    #[serde(rename = "totalEnergyBurned")]
    total_energy_burned: f64,
    #[serde(rename = "totalDistance")]
    total_distance: f64,
    #[serde(rename = "averageHeartRate")]
    average_heart_rate: f64,
    #[serde(rename = "percentInZone")]
    percent_in_zone: f64,
    #[serde(rename = "minHR")]
    min_hr: f64,
    #[serde(rename = "maxHR")]
    max_hr: f64,
    #[serde(rename = "stdHR")]
    std_hr: f64,
}

impl From<&TrainingRow> for CsvRow {
    fn from(row: &TrainingRow) -> Self {
        Self {
            split: row.split.clone(),
            start_date: row.features.start_date,
            duration: row.features.duration,
            total_energy_burned: row.features.total_energy_burned,
            total_distance: row.features.total_distance,
            average_heart_rate: row.features.average_heart_rate,
            percent_in_zone: row.features.percent_in_zone,
            min_hr: row.stats.min,
            max_hr: row.stats.max,
            std_hr: row.stats.std,
        }
    }
}

impl From<CsvRow> for TrainingRow {
    fn from(row: CsvRow) -> Self {
        Self {
            split: row.split,
            features: FeatureVector {
                start_date: row.start_date,
                duration: row.duration,
                total_energy_burned: row.total_energy_burned,
                total_distance: row.total_distance,
                average_heart_rate: row.average_heart_rate,
                percent_in_zone: row.percent_in_zone,
            },
            stats: HeartRateStats {
                min: row.min_hr,
                max: row.max_hr,
                std: row.std_hr,
            },
        }
    }
}

/// Durable training table
pub struct TrainingDataStore {
    path: PathBuf,
    rows: RwLock<BTreeMap<DateTime<Utc>, TrainingRow>>,
    /// Single writer for the backing file
    file_lock: Mutex<()>,
}

impl TrainingDataStore {
    /// Open the table at `path`. A missing or unreadable file gives an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rows = match read_rows(&path) {
            Ok(rows) => {
                debug!(path = %path.display(), rows = rows.len(), "loaded training data");
                rows
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "training data unavailable, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            path,
            rows: RwLock::new(rows),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the row for `row.start_date()` and rewrite the file.
    ///
    /// The in-memory table is updated even if the file write fails.
    pub async fn upsert(&self, row: TrainingRow) -> Result<()> {
        {
            let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
            rows.insert(row.start_date(), row);
        }
        self.persist().await
    }

    /// Copy of every row, ordered by start date
    pub fn all(&self) -> Vec<TrainingRow> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.values().cloned().collect()
    }

    pub fn get(&self, start_date: DateTime<Utc>) -> Option<TrainingRow> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.get(&start_date).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Digest of the current table, see [`digest`]
    pub fn digest(&self) -> String {
        digest(&self.all())
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        // Snapshot under the file lock so the last writer always writes the latest table
        let bytes = encode_rows(&self.all())?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("publishing {}", self.path.display()))?;
        Ok(())
    }
}

/// Hex SHA-256 over every row in start date order. Equal tables give equal
/// digests in every process.
pub fn digest(rows: &[TrainingRow]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(row.split.as_bytes());
        hasher.update([0u8]);
        hasher.update(row.start_date().to_rfc3339().as_bytes());
        for value in row.values() {
            hasher.update(value.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

fn encode_rows(rows: &[TrainingRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(CsvRow::from(row))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing training rows: {}", e.error()))
}

fn read_rows(path: &Path) -> Result<BTreeMap<DateTime<Utc>, TrainingRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = BTreeMap::new();
    for record in reader.deserialize::<CsvRow>() {
        let row = TrainingRow::from(record?);
        rows.insert(row.start_date(), row);
    }
    Ok(rows)
}
