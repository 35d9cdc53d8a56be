//! Split manager - owns the split index, training data and models
//!
//! All mutation goes through [`SplitManager`]. Relabeling is serialized per
//! workout start date; every new training row schedules a background
//! retrain. Predictions read whatever models are currently published and
//! never wait for training.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Database, SplitIndex};
use crate::health::{HealthSource, WorkoutRecord};
use crate::ml::features::{self, FeatureVector, HeartRateStats, WorkoutFeatures};
use crate::ml::{Analytics, ModelStore, SplitModels, SplitSummary, Timeframe, TrainingDataStore, TrainingRow};
use crate::zones::{self, ZoneBounds};

type WorkoutLocks = std::sync::Mutex<HashMap<DateTime<Utc>, Arc<Mutex<()>>>>;

struct Inner {
    db: Mutex<Database>,
    /// Mirror of the database, readable without awaiting
    splits: RwLock<SplitIndex>,
    store: TrainingDataStore,
    model_store: ModelStore,
    models: RwLock<Option<Arc<SplitModels>>>,
    /// Held for the whole of a training run
    training: Mutex<()>,
    workout_locks: WorkoutLocks,
    retrain_tx: watch::Sender<u64>,
}

/// Shared handle to the split service. Cloning is cheap.
#[derive(Clone)]
pub struct SplitManager {
    inner: Arc<Inner>,
}

impl SplitManager {
    /// Open the stores under `config.data_dir` and start the retrain worker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(config: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("creating {}", config.data_dir.display()))?;

        let db_path = config.splits_db_path();
        let training_path = config.training_data_path();
        let model_store = ModelStore::new(config.models_dir());
        let (db, splits, store, model_store, models) = tokio::task::spawn_blocking(move || -> Result<_> {
            let db = Database::open(&db_path)?;
            let splits = db.get_splits()?;
            let store = TrainingDataStore::open(training_path);
            let models = model_store.load().map(Arc::new);
            Ok((db, splits, store, model_store, models))
        })
        .await
        .context("loading split manager state failed")??;

        // Saved models may lag the table if the process stopped before a retrain
        let stale = match &models {
            Some(models) => models.digest != store.digest(),
            None => !store.is_empty(),
        };
        info!(
            splits = splits.len(),
            training_rows = store.len(),
            models = models.is_some(),
            stale,
            "split manager ready"
        );

        let (retrain_tx, retrain_rx) = watch::channel(0);
        let inner = Arc::new(Inner {
            db: Mutex::new(db),
            splits: RwLock::new(splits),
            store,
            model_store,
            models: RwLock::new(models),
            training: Mutex::new(()),
            workout_locks: std::sync::Mutex::new(HashMap::new()),
            retrain_tx,
        });
        spawn_retrain_worker(Arc::downgrade(&inner), retrain_rx);

        let manager = Self { inner };
        if stale {
            manager.request_retrain();
        }
        Ok(manager)
    }

    /// Create an empty split. Empty names and existing splits are left alone.
    pub async fn add_split(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            debug!("ignoring empty split name");
            return Ok(());
        }

        let db = self.inner.db.lock().await;
        db.add_split(name)?;
        self.write_splits().entry(name.to_string()).or_default();
        info!(split = name, "split added");
        Ok(())
    }

    /// Remove a split and its workout list. Training rows keep their label.
    pub async fn delete_split(&self, name: &str) -> Result<()> {
        let mut db = self.inner.db.lock().await;
        db.delete_split(name)?;
        if self.write_splits().remove(name).is_some() {
            info!(split = name, "split deleted");
        }
        Ok(())
    }

    /// Move a workout to `new_split`, or clear its label with `None`.
    ///
    /// Labeling writes a training row and schedules a retrain. Clearing only
    /// removes the workout from its split; an existing training row stays.
    pub async fn update_workout_split<S: HealthSource>(
        &self,
        source: &S,
        workout: &WorkoutRecord,
        new_split: Option<&str>,
        percent_in_zone: f64,
    ) -> Result<()> {
        if new_split.is_some_and(str::is_empty) {
            debug!("ignoring empty split name");
            return Ok(());
        }

        let _lease = self.lease_workout(workout.start_date).await;
        self.relabel(source, workout, new_split, percent_in_zone).await
    }

    async fn relabel<S: HealthSource>(
        &self,
        source: &S,
        workout: &WorkoutRecord,
        new_split: Option<&str>,
        percent_in_zone: f64,
    ) -> Result<()> {
        let average = source.fetch_average_heart_rate(workout).await;
        let samples = source.fetch_heart_rate_series(workout).await;
        let vector = FeatureVector::from_workout(workout, average, percent_in_zone);
        let stats = HeartRateStats::around(&samples, average);

        {
            let mut db = self.inner.db.lock().await;
            db.move_workout(workout.start_date, new_split.map(|split| (split, &vector)))?;

            // Committed; mirror it
            let mut splits = self.write_splits();
            for workouts in splits.values_mut() {
                if let Some(idx) = workouts.iter().position(|w| w.start_date == workout.start_date) {
                    workouts.remove(idx);
                    break;
                }
            }
            if let Some(split) = new_split {
                splits.entry(split.to_string()).or_default().push(vector.clone());
            }
        }

        let Some(split) = new_split else {
            info!(workout = %workout.id, "workout label cleared");
            return Ok(());
        };

        info!(workout = %workout.id, split, samples = samples.len(), "workout labeled");
        let row = TrainingRow::new(split, vector, stats);
        if let Err(e) = self.inner.store.upsert(row).await {
            error!(error = %e, "failed to persist training data");
        }
        self.request_retrain();
        Ok(())
    }

    /// Wait for exclusive use of the workout started at `start`
    async fn lease_workout(&self, start: DateTime<Utc>) -> WorkoutLease<'_> {
        let lock = self
            .inner
            .workout_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(start)
            .or_default()
            .clone();
        let mut lease = WorkoutLease {
            locks: &self.inner.workout_locks,
            start,
            lock,
            guard: None,
        };
        lease.guard = Some(lease.lock.clone().lock_owned().await);
        lease
    }

    #[cfg(test)]
    fn workout_lock_count(&self) -> usize {
        self.inner
            .workout_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn read_splits(&self) -> std::sync::RwLockReadGuard<'_, SplitIndex> {
        self.inner.splits.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_splits(&self) -> std::sync::RwLockWriteGuard<'_, SplitIndex> {
        self.inner.splits.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every split and its workouts
    pub fn splits(&self) -> SplitIndex {
        self.read_splits().clone()
    }

    /// Split currently holding the workout started at `start`
    pub fn split_of(&self, start: DateTime<Utc>) -> Option<String> {
        self.read_splits()
            .iter()
            .find(|(_, workouts)| workouts.iter().any(|w| w.start_date == start))
            .map(|(name, _)| name.clone())
    }

    /// Split names, most recently trained first. Empty splits go last.
    pub fn sorted_splits_by_last_modified_date(&self) -> Vec<String> {
        let splits = self.read_splits();
        let mut names: Vec<(&String, Option<DateTime<Utc>>)> = splits
            .iter()
            .map(|(name, workouts)| (name, workouts.iter().map(|w| w.start_date).max()))
            .collect();
        // None < Some, so reversing puts empty splits at the back
        names.sort_by(|a, b| b.1.cmp(&a.1));
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Every workout from the source with its current split
    pub async fn list_workouts<S: HealthSource>(&self, source: &S) -> Vec<(WorkoutRecord, Option<String>)> {
        source
            .fetch_workouts()
            .await
            .into_iter()
            .map(|workout| {
                let split = self.split_of(workout.start_date);
                (workout, split)
            })
            .collect()
    }

    /// Analytics over a split's workouts, `None` for an unknown split
    pub fn analytics(&self, split: &str) -> Option<Analytics> {
        self.read_splits()
            .get(split)
            .map(|workouts| Analytics::new(workouts.clone()))
    }

    pub fn summary(&self, split: &str, timeframe: Timeframe, now: DateTime<Utc>) -> Option<SplitSummary> {
        self.analytics(split).map(|a| a.within(timeframe, now).summary())
    }

    /// Training zone for the user behind `source`
    pub async fn zone_bounds<S: HealthSource>(&self, source: &S) -> ZoneBounds {
        let resting = source.fetch_resting_heart_rate().await;
        let max = source.fetch_max_hr().await;
        zones::zone_bounds(resting, max)
    }

    pub async fn percent_in_zone_for<S: HealthSource>(&self, source: &S, workout: &WorkoutRecord) -> f64 {
        let bounds = self.zone_bounds(source).await;
        let samples = source.fetch_heart_rate_series(workout).await;
        zones::percent_in_zone(&samples, bounds)
    }

    /// Extract the features of an unlabeled workout
    pub async fn workout_features<S: HealthSource>(&self, source: &S, workout: &WorkoutRecord) -> WorkoutFeatures {
        let bounds = self.zone_bounds(source).await;
        let samples = source.fetch_heart_rate_series(workout).await;
        let features = features::extract(workout, &samples, bounds);
        if features.low_confidence() {
            debug!(workout = %workout.id, "no heart rate samples, features are placeholders");
        }
        features
    }

    /// Most likely split for a workout, `None` without a model
    pub async fn predict_split<S: HealthSource>(&self, source: &S, workout: &WorkoutRecord) -> Option<String> {
        self.models()?;
        let features = self.workout_features(source, workout).await;
        self.predict_features(&features)
    }

    pub fn predict_features(&self, features: &WorkoutFeatures) -> Option<String> {
        self.models()?.predict_split(&features.values())
    }

    /// Expected value of each feature for a split; empty without a model
    pub fn predict_stats(&self, split: &str) -> BTreeMap<String, f64> {
        match self.models() {
            Some(models) => models.regressors.predict(split),
            None => BTreeMap::new(),
        }
    }

    /// Currently published models
    pub fn models(&self) -> Option<Arc<SplitModels>> {
        self.inner
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn training_rows(&self) -> Vec<TrainingRow> {
        self.inner.store.all()
    }

    /// Ask the background worker to retrain
    pub fn request_retrain(&self) {
        self.inner.retrain_tx.send_modify(|generation| *generation += 1);
    }

    /// Retrain now from the current training data
    pub async fn retrain(&self) -> Result<Option<Arc<SplitModels>>> {
        self.inner.retrain().await
    }

    /// Whether the published models reflect every training row written so far
    pub fn models_current(&self) -> bool {
        self.inner.is_current()
    }
}

/// Per-workout lock held by one relabel. Dropping it, also while still
/// waiting, forgets the map entry once no one else holds the lock.
struct WorkoutLease<'a> {
    locks: &'a WorkoutLocks,
    start: DateTime<Utc>,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WorkoutLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this lease hold it: nobody is waiting
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.start);
        }
    }
}

impl Inner {
    async fn retrain(&self) -> Result<Option<Arc<SplitModels>>> {
        let _slot = self.training.lock().await;

        let rows = self.store.all();
        let row_count = rows.len();
        let trained = tokio::task::spawn_blocking(move || SplitModels::train(&rows))
            .await
            .context("training task failed")?;

        let Some(models) = trained else {
            debug!("no training data, keeping current models");
            return Ok(self.models.read().unwrap_or_else(PoisonError::into_inner).clone());
        };

        let models = Arc::new(models);
        if let Err(e) = self.model_store.save(&models).await {
            warn!(error = %e, "failed to save models");
        }
        *self.models.write().unwrap_or_else(PoisonError::into_inner) = Some(models.clone());
        info!(
            rows = row_count,
            splits = models.classifier.labels().len(),
            digest = %models.digest,
            "models retrained"
        );
        Ok(Some(models))
    }

    fn is_current(&self) -> bool {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|m| m.digest == self.store.digest())
    }
}

/// Retrain whenever the generation changes. Requests that arrive during a
/// run are folded into one follow-up run.
fn spawn_retrain_worker(inner: Weak<Inner>, mut rx: watch::Receiver<u64>) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.is_current() {
                continue;
            }
            if let Err(e) = inner.retrain().await {
                error!(error = %e, "retrain failed");
            }
        }
        debug!("retrain worker stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::tests::{create_exported, create_workout};
    use crate::db::tests::reject_split;
    use crate::health::{FixtureHealthSource, HealthExport};
    use crate::ml::training_store::tests::create_row;
    use std::time::Duration;

    fn create_source(workouts: Vec<(&WorkoutRecord, Vec<f64>)>) -> FixtureHealthSource {
        FixtureHealthSource::new(HealthExport {
            resting_heart_rate: Some(60.0),
            workouts: workouts
                .into_iter()
                .map(|(w, bpms)| create_exported(w.clone(), &bpms))
                .collect(),
            ..Default::default()
        })
    }

    async fn open_manager(dir: &tempfile::TempDir) -> SplitManager {
        SplitManager::open(&Config::for_dir(dir.path())).await.unwrap()
    }

    async fn wait_until_current(manager: &SplitManager) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !manager.models_current() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("models never caught up with training data");
    }

    #[tokio::test]
    async fn test_add_split() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;

        manager.add_split("Legs").await.unwrap();
        manager.add_split("").await.unwrap();
        manager.add_split("Legs").await.unwrap();

        let splits = manager.splits();
        assert_eq!(splits.keys().collect::<Vec<_>>(), vec!["Legs"]);
        assert!(splits["Legs"].is_empty());
    }

    #[tokio::test]
    async fn test_relabel_moves_workout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0, 120.0])]);

        manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
        manager.update_workout_split(&source, &w, Some("Push"), 0.4).await.unwrap();

        let splits = manager.splits();
        assert!(splits["Legs"].is_empty());
        assert_eq!(splits["Push"].len(), 1);
        assert_eq!(splits["Push"][0].average_heart_rate, 110.0);
        assert_eq!(manager.split_of(w.start_date).as_deref(), Some("Push"));

        let rows = manager.training_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].split, "Push");
        assert_eq!(rows[0].stats.min, 100.0);
    }

    #[tokio::test]
    async fn test_clear_label_keeps_training_row() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
        manager.update_workout_split(&source, &w, None, 0.4).await.unwrap();

        assert!(manager.splits()["Legs"].is_empty());
        assert_eq!(manager.split_of(w.start_date), None);
        assert_eq!(manager.training_rows()[0].split, "Legs");
    }

    #[tokio::test]
    async fn test_delete_split_keeps_training_rows() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
        manager.delete_split("Legs").await.unwrap();
        manager.delete_split("Missing").await.unwrap();

        assert!(manager.splits().is_empty());
        assert_eq!(manager.training_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_sorted_splits_by_last_modified_date() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let t1 = create_workout("w1", 1_000, 60.0);
        let t2 = create_workout("w2", 2_000, 60.0);
        let source = create_source(vec![(&t1, vec![]), (&t2, vec![])]);

        manager.add_split("C").await.unwrap();
        manager.update_workout_split(&source, &t1, Some("A"), 0.0).await.unwrap();
        manager.update_workout_split(&source, &t2, Some("B"), 0.0).await.unwrap();

        assert_eq!(manager.sorted_splits_by_last_modified_date(), vec!["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_no_model_no_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        assert_eq!(manager.predict_split(&source, &w).await, None);
        assert!(manager.predict_stats("Legs").is_empty());
        assert!(manager.retrain().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_split_always_predicted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w1 = create_workout("w1", 1_000, 3000.0);
        let w2 = create_workout("w2", 2_000, 3600.0);
        let other = create_workout("w3", 3_000, 400.0);
        let source = create_source(vec![(&w1, vec![110.0]), (&w2, vec![120.0]), (&other, vec![180.0])]);

        manager.update_workout_split(&source, &w1, Some("Legs"), 0.5).await.unwrap();
        manager.update_workout_split(&source, &w2, Some("Legs"), 0.5).await.unwrap();
        manager.retrain().await.unwrap();

        assert_eq!(manager.predict_split(&source, &other).await.as_deref(), Some("Legs"));
    }

    #[tokio::test]
    async fn test_predict_stats_group_mean() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w1 = create_workout("w1", 1_000, 1000.0);
        let w2 = create_workout("w2", 2_000, 1200.0);
        let source = create_source(vec![(&w1, vec![110.0]), (&w2, vec![120.0])]);

        manager.update_workout_split(&source, &w1, Some("Legs"), 0.5).await.unwrap();
        manager.update_workout_split(&source, &w2, Some("Legs"), 0.5).await.unwrap();
        manager.retrain().await.unwrap();

        let stats = manager.predict_stats("Legs");
        assert!((stats["duration"] - 1100.0).abs() < 1e-6, "stats: {:?}", stats);
        assert!((stats["averageHeartRate"] - 115.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_background_retrain_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let workouts: Vec<_> = (0..6)
            .map(|i| create_workout(&format!("w{i}"), 1_000 * (i + 1), 1000.0 + 500.0 * i as f64))
            .collect();
        let source = create_source(workouts.iter().map(|w| (w, vec![100.0])).collect());

        for (i, w) in workouts.iter().enumerate() {
            let split = if i % 2 == 0 { "Even" } else { "Odd" };
            manager.update_workout_split(&source, w, Some(split), 0.3).await.unwrap();
        }

        wait_until_current(&manager).await;
        let models = manager.models().unwrap();
        assert_eq!(models.rows, 6);
        assert_eq!(models.classifier.labels(), ["Even".to_string(), "Odd".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_relabels_same_workout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = Arc::new(create_source(vec![(&w, vec![100.0, 140.0])]));

        let mut handles = Vec::new();
        for i in 0..16 {
            let manager = manager.clone();
            let source = source.clone();
            let w = w.clone();
            let split = ["Legs", "Push", "Pull", "Arms"][i % 4];
            handles.push(tokio::spawn(async move {
                manager.update_workout_split(&*source, &w, Some(split), 0.5).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let splits = manager.splits();
        let holders: Vec<_> = splits
            .iter()
            .filter(|(_, workouts)| workouts.iter().any(|x| x.start_date == w.start_date))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].1.len(), 1);

        let rows = manager.training_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0].split, holders[0].0);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let w1 = create_workout("w1", 1_000, 1000.0);
        let w2 = create_workout("w2", 2_000, 4000.0);
        let source = create_source(vec![(&w1, vec![100.0]), (&w2, vec![150.0])]);

        {
            let manager = open_manager(&dir).await;
            manager.add_split("Empty").await.unwrap();
            manager.update_workout_split(&source, &w1, Some("Arms"), 0.2).await.unwrap();
            manager.update_workout_split(&source, &w2, Some("Legs"), 0.7).await.unwrap();
            manager.retrain().await.unwrap();
        }

        let manager = open_manager(&dir).await;
        let splits = manager.splits();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits["Legs"][0].percent_in_zone, 0.7);
        assert_eq!(manager.training_rows().len(), 2);

        // Saved models answer before any retrain
        let models = manager.models().unwrap();
        assert_eq!(models.rows, 2);
        assert!((manager.predict_stats("Legs")["duration"] - 4000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reopen_retrains_stale_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_dir(dir.path());
        let w = create_workout("w1", 1_000, 1000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        {
            let manager = open_manager(&dir).await;
            manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
            manager.retrain().await.unwrap();
        }
        // A row the saved models never saw, as after a stop before retraining
        TrainingDataStore::open(config.training_data_path())
            .upsert(create_row("Push", 5_000, 4000.0))
            .await
            .unwrap();

        let manager = open_manager(&dir).await;
        assert_eq!(manager.models().unwrap().rows, 1);
        assert!(!manager.models_current());

        wait_until_current(&manager).await;
        let models = manager.models().unwrap();
        assert_eq!(models.rows, manager.training_rows().len());
        assert_eq!(models.classifier.labels(), ["Legs".to_string(), "Push".to_string()]);
        assert!((manager.predict_stats("Push")["duration"] - 4000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reopen_with_matching_models_is_current() {
        let dir = tempfile::tempdir().unwrap();
        let w = create_workout("w1", 1_000, 1000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        {
            let manager = open_manager(&dir).await;
            manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
            manager.retrain().await.unwrap();
        }

        let manager = open_manager(&dir).await;
        assert!(manager.models_current());
    }

    #[tokio::test]
    async fn test_failed_index_write_keeps_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
        reject_split(manager.inner.db.lock().await.connection(), "Broken");

        assert!(manager.update_workout_split(&source, &w, Some("Broken"), 0.4).await.is_err());

        assert_eq!(manager.split_of(w.start_date).as_deref(), Some("Legs"));
        let stored = manager.inner.db.lock().await.get_splits().unwrap();
        assert_eq!(manager.splits(), stored);
        assert_eq!(manager.training_rows()[0].split, "Legs");
    }

    #[tokio::test]
    async fn test_abandoned_relabel_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        let source = create_source(vec![(&w, vec![100.0])]);

        let held = manager.lease_workout(w.start_date).await;
        let waiting = manager.update_workout_split(&source, &w, Some("Legs"), 0.4);
        assert!(tokio::time::timeout(Duration::from_millis(50), waiting).await.is_err());
        drop(held);
        assert_eq!(manager.workout_lock_count(), 0);

        manager.update_workout_split(&source, &w, Some("Legs"), 0.4).await.unwrap();
        assert_eq!(manager.workout_lock_count(), 0);
        assert_eq!(manager.split_of(w.start_date).as_deref(), Some("Legs"));
    }

    #[tokio::test]
    async fn test_summary_and_list_workouts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w1 = create_workout("w1", 1_700_000_000, 3000.0);
        let w2 = create_workout("w2", 1_700_100_000, 3000.0);
        let source = create_source(vec![(&w1, vec![100.0]), (&w2, vec![120.0])]);

        manager.update_workout_split(&source, &w1, Some("Legs"), 0.5).await.unwrap();

        let listed = manager.list_workouts(&source).await;
        assert_eq!(listed[0].0.id, "w2");
        assert_eq!(listed[0].1, None);
        assert_eq!(listed[1].1.as_deref(), Some("Legs"));

        let summary = manager.summary("Legs", Timeframe::AllTime, Utc::now()).unwrap();
        assert_eq!(summary.workouts, 1);
        assert_eq!(summary.average_heart_rate, 100.0);
        assert!(manager.summary("Nope", Timeframe::AllTime, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_percent_in_zone_for_workout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir).await;
        let w = create_workout("w1", 1_700_000_000, 3000.0);
        // resting 60, max 190 (no date of birth): zone 125..=151
        let source = create_source(vec![(&w, vec![100.0, 125.0, 150.0, 170.0])]);

        let bounds = manager.zone_bounds(&source).await;
        assert_eq!(bounds.lower, 125.0);
        assert_eq!(manager.percent_in_zone_for(&source, &w).await, 0.5);
    }
}
