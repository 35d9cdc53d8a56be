//! Database module - SQLite storage for the split index

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::ml::FeatureVector;

/// Split name to its workouts, in the order they were labeled
pub type SplitIndex = BTreeMap<String, Vec<FeatureVector>>;

/// Database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS splits (
                name TEXT PRIMARY KEY NOT NULL
            );
            CREATE TABLE IF NOT EXISTS split_workouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                split TEXT NOT NULL REFERENCES splits(name) ON DELETE CASCADE,
                start_date TEXT NOT NULL,
                duration REAL NOT NULL,
                total_energy_burned REAL NOT NULL,
                total_distance REAL NOT NULL,
                average_heart_rate REAL NOT NULL,
                percent_in_zone REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_split_workouts_start ON split_workouts(start_date);
            PRAGMA foreign_keys = ON;",
        )?;

        Ok(())
    }

    /// Create a split if it does not exist
    pub fn add_split(&self, name: &str) -> Result<()> {
        insert_split(&self.conn, name)
    }

    /// Remove a split and its workout index
    pub fn delete_split(&mut self, name: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM split_workouts WHERE split = ?1", params![name])?;
        tx.execute("DELETE FROM splits WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(())
    }

    /// Take the workout started at `start_date` out of whichever split holds
    /// it and, with `to`, append it to that split (created if needed).
    ///
    /// Runs as one transaction: on error nothing changes. Returns how many
    /// placements were removed.
    pub fn move_workout(
        &mut self,
        start_date: DateTime<Utc>,
        to: Option<(&str, &FeatureVector)>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM split_workouts WHERE start_date = ?1",
            params![start_date.to_rfc3339()],
        )?;
        if let Some((split, workout)) = to {
            insert_split(&tx, split)?;
            insert_workout(&tx, split, workout)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Load every split with its workouts
    pub fn get_splits(&self) -> Result<SplitIndex> {
        let mut splits = SplitIndex::new();

        let mut stmt = self.conn.prepare("SELECT name FROM splits")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for name in names {
            splits.insert(name, Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT split, start_date, duration, total_energy_burned, total_distance, average_heart_rate, percent_in_zone FROM split_workouts ORDER BY id"
        )?;
        let rows = stmt
            .query_map([], |row| {
                let split: String = row.get(0)?;
                let date_str: String = row.get(1)?;
                // Rows with an unreadable date have no identity; skip them
                let workout = DateTime::parse_from_rfc3339(&date_str).ok().map(|date| -> rusqlite::Result<FeatureVector> {
                    Ok(FeatureVector {
                        start_date: date.with_timezone(&Utc),
                        duration: row.get(2)?,
                        total_energy_burned: row.get(3)?,
                        total_distance: row.get(4)?,
                        average_heart_rate: row.get(5)?,
                        percent_in_zone: row.get(6)?,
                    })
                });
                Ok((split, workout.transpose()?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (split, workout) in rows {
            if let Some(workout) = workout {
                splits.entry(split).or_default().push(workout);
            }
        }

        Ok(splits)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn insert_split(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO splits (name) VALUES (?1)", params![name])?;
    Ok(())
}

fn insert_workout(conn: &Connection, split: &str, workout: &FeatureVector) -> Result<()> {
    conn.execute(
        "INSERT INTO split_workouts (split, start_date, duration, total_energy_burned, total_distance, average_heart_rate, percent_in_zone) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            split,
            workout.start_date.to_rfc3339(),
            workout.duration,
            workout.total_energy_burned,
            workout.total_distance,
            workout.average_heart_rate,
            workout.percent_in_zone,
        ],
    )?;
    Ok(())
}
