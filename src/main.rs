//! liftanalyzer - Strength workout split classification

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use liftanalyzer::Config;
use liftanalyzer::health::{FixtureHealthSource, HealthSource, WorkoutRecord};
use liftanalyzer::manager::SplitManager;
use liftanalyzer::ml::{Timeframe, WorkoutMetric};

#[derive(Parser)]
#[command(name = "liftanalyzer")]
#[command(author, version, about = "Workout splits, predictions and heart rate zones")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List splits, most recently trained first
    Splits,

    /// Create a new split
    AddSplit {
        /// Split name (e.g., "Legs", "Push")
        name: String,
    },

    /// Delete a split
    DeleteSplit { name: String },

    /// List workouts from the health export with their split
    Workouts,

    /// Label a workout with a split
    Label {
        /// Workout id or start date (RFC 3339)
        workout: String,

        /// Split name
        #[arg(required_unless_present = "clear")]
        split: Option<String>,

        /// Remove the workout from its split instead
        #[arg(long, conflicts_with = "split")]
        clear: bool,
    },

    /// Predict the split of a workout
    Predict {
        /// Workout id or start date (RFC 3339)
        workout: String,
    },

    /// Show AI benchmarks for the next workout of a split
    Stats { name: String },

    /// Show averages for a split over --timeframe
    Summary { name: String },

    /// Show the heart rate training zone
    Zones,

    /// Retrain the models from the training data
    Retrain,
}

fn load_source(config: &Config) -> FixtureHealthSource {
    let source = match &config.health_export {
        Some(path) => match FixtureHealthSource::load(path) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "health export unavailable, no workouts");
                FixtureHealthSource::default()
            }
        },
        None => FixtureHealthSource::default(),
    };
    source.with_window(config.series_window)
}

async fn find_workout(source: &FixtureHealthSource, key: &str) -> Result<WorkoutRecord> {
    let start = DateTime::parse_from_rfc3339(key).ok().map(|d| d.with_timezone(&Utc));
    let found = source
        .fetch_workouts()
        .await
        .into_iter()
        .find(|w| w.id == key || Some(w.start_date) == start);

    match found {
        Some(workout) => Ok(workout),
        None => bail!("no workout matching {}", key),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    let manager = SplitManager::open(&config).await?;
    let source = load_source(&config);

    match cli.command {
        Some(Commands::Splits) | None => {
            let splits = manager.splits();
            println!("Splits:");
            println!("{:-<40}", "");
            for name in manager.sorted_splits_by_last_modified_date() {
                let count = splits.get(&name).map_or(0, Vec::len);
                println!("{:25} | {} workouts", name, count);
            }
        }

        Some(Commands::AddSplit { name }) => {
            manager.add_split(&name).await?;
            println!("Added split: {}", name);
        }

        Some(Commands::DeleteSplit { name }) => {
            manager.delete_split(&name).await?;
            println!("Deleted split: {}", name);
        }

        Some(Commands::Workouts) => {
            println!("Recent workouts:");
            println!("{:-<60}", "");
            for (workout, split) in manager.list_workouts(&source).await {
                println!(
                    "{} | {:10} | {:>5.0} min | {}",
                    workout.start_date.format("%Y-%m-%d %H:%M"),
                    workout.id,
                    workout.duration / 60.0,
                    split.as_deref().unwrap_or("NO SPLIT")
                );
            }
        }

        Some(Commands::Label { workout, split, clear }) => {
            let record = find_workout(&source, &workout).await?;
            let percent = manager.percent_in_zone_for(&source, &record).await;
            let split = if clear { None } else { split };
            manager
                .update_workout_split(&source, &record, split.as_deref(), percent)
                .await?;
            // Leave consistent models behind before the process exits
            manager.retrain().await?;
            match split {
                Some(split) => println!("Labeled {} as {} ({:.0}% in zone)", record.id, split, percent * 100.0),
                None => println!("Cleared label of {}", record.id),
            }
        }

        Some(Commands::Predict { workout }) => {
            let record = find_workout(&source, &workout).await?;
            match manager.predict_split(&source, &record).await {
                Some(split) => println!("Predicted split: {}", split),
                None => println!("No prediction available"),
            }
        }

        Some(Commands::Stats { name }) => {
            let stats = manager.predict_stats(&name);
            if stats.is_empty() {
                println!("No benchmarks for {}", name);
            } else {
                println!("AI benchmarks for next {} workout", name);
                println!("{:-<40}", "");
                for (feature, value) in stats {
                    println!("{:20} {:.1}", feature, value);
                }
            }
        }

        Some(Commands::Summary { name }) => {
            let timeframe = config.timeframe;
            let now = Utc::now();
            let (Some(summary), Some(analytics)) = (manager.summary(&name, timeframe, now), manager.analytics(&name)) else {
                println!("Unknown split: {}", name);
                return Ok(());
            };

            println!("{} ({})", name, timeframe);
            println!("{:-<40}", "");
            println!("Workouts: {}", summary.workouts);
            println!("Avg duration: {:.0} min", summary.average_duration / 60.0);
            println!("Avg calories: {:.0} kcal", summary.average_energy_burned);
            println!("Avg heart rate: {:.0} bpm", summary.average_heart_rate);
            println!("Percent in zone: {:.0}%", summary.average_percent_in_zone * 100.0);

            let recent = analytics.within(timeframe, now);
            for metric in WorkoutMetric::all() {
                let max = recent.max_value(*metric);
                println!();
                println!("{}", metric.label());
                for (date, value) in recent.series(*metric) {
                    let width = if max > 0.0 { (value / max * 30.0).round() as usize } else { 0 };
                    println!("  {} {:>6.0} {}", date.format("%Y-%m-%d"), value, "#".repeat(width));
                }
            }

            println!();
            println!("Workouts by timeframe:");
            for other in Timeframe::all() {
                println!("  {:12} {}", other.label(), analytics.within(*other, now).summary().workouts);
            }
        }

        Some(Commands::Zones) => {
            let bounds = manager.zone_bounds(&source).await;
            println!("Heart rate zone: {:.0}-{:.0} bpm", bounds.lower, bounds.upper);
        }

        Some(Commands::Retrain) => match manager.retrain().await? {
            Some(models) => println!(
                "Trained on {} workouts across {} splits",
                models.rows,
                models.classifier.labels().len()
            ),
            None => println!("No training data yet"),
        },
    }

    Ok(())
}
