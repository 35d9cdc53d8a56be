//! liftanalyzer - Strength workout split classification
//!
//! Labels workouts with user-defined splits, learns to predict the split of
//! new workouts and the expected stats of each split, and measures time spent
//! in the Karvonen heart rate zone.

pub mod config;
pub mod db;
pub mod health;
pub mod manager;
pub mod ml;
pub mod zones;

pub use config::Config;
pub use db::Database;
pub use health::{FixtureHealthSource, HealthSource, WorkoutRecord};
pub use manager::SplitManager;
