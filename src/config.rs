//! Runtime configuration from flags and environment

use std::path::PathBuf;

use clap::Args;

use crate::health::SeriesWindow;
use crate::ml::Timeframe;

const SPLITS_DB: &str = "splits.db";
const TRAINING_DATA: &str = "training_data.csv";
const MODELS_DIR: &str = "models";

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Directory for the split database, training data and models
    #[arg(long, env = "LIFT_DATA_DIR", default_value = "liftanalyzer-data", global = true)]
    pub data_dir: PathBuf,

    /// Health data export (JSON) used as the workout source
    #[arg(long, env = "LIFT_HEALTH_EXPORT", global = true)]
    pub health_export: Option<PathBuf>,

    /// Default window for split summaries
    #[arg(long, env = "LIFT_TIMEFRAME", default_value = "last-year", global = true)]
    pub timeframe: Timeframe,

    /// Heart rate samples taken for a workout
    #[arg(long, env = "LIFT_SERIES_WINDOW", value_enum, default_value = "workout", global = true)]
    pub series_window: SeriesWindow,
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn for_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            health_export: None,
            timeframe: Timeframe::default(),
            series_window: SeriesWindow::default(),
        }
    }

    pub fn splits_db_path(&self) -> PathBuf {
        self.data_dir.join(SPLITS_DB)
    }

    pub fn training_data_path(&self) -> PathBuf {
        self.data_dir.join(TRAINING_DATA)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join(MODELS_DIR)
    }
}
