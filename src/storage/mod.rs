//! Per-user AQI history.
//!
//! [`HistoryStore`] is the seam the HTTP layer writes readings through and
//! the trend model reads them back from. Two backends:
//! - [`MemoryHistoryStore`]: process-local, lost on restart
//! - [`SqliteHistoryStore`]: `sqlx` SQLite, namespaced by project id

pub mod sqlite;

pub use sqlite::SqliteHistoryStore;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{AirError, Reading, UserId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one reading to the user's history.
    async fn append(&self, user: &UserId, reading: &Reading) -> Result<(), AirError>;

    /// At most `limit` readings, newest first.
    async fn recent(&self, user: &UserId, limit: usize) -> Result<Vec<Reading>, AirError>;

    fn backend(&self) -> &'static str;
}

/// In-process history, keyed by user id.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<UserId, Vec<Reading>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, user: &UserId, reading: &Reading) -> Result<(), AirError> {
        let mut records = self.records.write().await;
        let history = records.entry(user.clone()).or_default();
        history.push(reading.clone());
        debug!(uid = %user, total = history.len(), "Reading stored in memory");
        Ok(())
    }

    async fn recent(&self, user: &UserId, limit: usize) -> Result<Vec<Reading>, AirError> {
        let records = self.records.read().await;
        let mut history = records.get(user).cloned().unwrap_or_default();
        // Stable sort keeps insertion order among equal timestamps; reverse
        // afterwards so the latest insert wins ties.
        history.sort_by_key(|r| r.timestamp);
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
