//! SQLite-backed history via `sqlx`.
//!
//! One row per reading. Timestamps are stored as fixed-width RFC3339 UTC
//! text so that lexical order is chronological order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::HistoryStore;
use crate::types::{AirError, GeoPoint, Reading, UserId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS aqi_history (
    id                 TEXT PRIMARY KEY,
    project_id         TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    timestamp          TEXT NOT NULL,
    aqi                INTEGER,
    category           TEXT,
    dominant_pollutant TEXT,
    region_code        TEXT,
    latitude           REAL,
    longitude          REAL,
    pollutants         TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_aqi_history_user_time
    ON aqi_history (project_id, user_id, timestamp);
";

pub struct SqliteHistoryStore {
    pool: SqlitePool,
    project_id: String,
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    timestamp: String,
    aqi: Option<i64>,
    category: Option<String>,
    dominant_pollutant: Option<String>,
    region_code: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    pollutants: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = AirError;

    fn try_from(row: ReadingRow) -> Result<Self, AirError> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| AirError::Store(format!("bad stored timestamp {:?}: {e}", row.timestamp)))?
            .with_timezone(&Utc);
        let pollutants = serde_json::from_str(&row.pollutants)
            .map_err(|e| AirError::Store(format!("bad stored pollutants: {e}")))?;
        let location = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        };

        Ok(Reading {
            aqi: row.aqi.and_then(|v| u32::try_from(v).ok()),
            category: row.category,
            dominant_pollutant: row.dominant_pollutant,
            pollutants,
            timestamp,
            region_code: row.region_code,
            location,
        })
    }
}

fn store_err(e: sqlx::Error) -> AirError {
    AirError::Store(e.to_string())
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `database_url` and ensure
    /// the schema exists.
    pub async fn connect(database_url: &str, project_id: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true);

        // An in-memory database lives and dies with its connection.
        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create history schema")?;

        let project_id = project_id.into();
        info!(database_url, project_id = %project_id, "History store ready");
        Ok(Self { pool, project_id })
    }

    pub async fn in_memory(project_id: impl Into<String>) -> Result<Self> {
        Self::connect("sqlite::memory:", project_id).await
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, user: &UserId, reading: &Reading) -> Result<(), AirError> {
        let id = uuid::Uuid::new_v4().to_string();
        let pollutants = serde_json::to_string(&reading.pollutants)
            .map_err(|e| AirError::Store(format!("failed to encode pollutants: {e}")))?;

        sqlx::query(
            "INSERT INTO aqi_history
                (id, project_id, user_id, timestamp, aqi, category, dominant_pollutant,
                 region_code, latitude, longitude, pollutants)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&self.project_id)
        .bind(user.as_str())
        .bind(reading.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(reading.aqi.map(i64::from))
        .bind(reading.category.as_deref())
        .bind(reading.dominant_pollutant.as_deref())
        .bind(reading.region_code.as_deref())
        .bind(reading.location.map(|l| l.latitude))
        .bind(reading.location.map(|l| l.longitude))
        .bind(pollutants)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(uid = %user, id = %id, "Reading stored");
        Ok(())
    }

    async fn recent(&self, user: &UserId, limit: usize) -> Result<Vec<Reading>, AirError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            "SELECT timestamp, aqi, category, dominant_pollutant, region_code,
                    latitude, longitude, pollutants
             FROM aqi_history
             WHERE project_id = ? AND user_id = ?
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&self.project_id)
        .bind(user.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(Reading::try_from).collect()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
