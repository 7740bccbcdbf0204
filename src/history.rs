//! Run history kept in the cache under a single key.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::metrics::SuiteExecutionRecord;
use crate::report::Summary;

pub const HISTORY_KEY: &str = "test_history";
pub const HISTORY_LIMIT: usize = 100;
pub const HISTORY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub summary: Summary,
    pub records: Vec<SuiteExecutionRecord>,
}

/// Stored history, oldest first. A missing or unreadable value is an empty history.
pub async fn load(cache: &dyn CacheStore) -> Result<Vec<HistoryEntry>> {
    let Some(value) = cache.get(HISTORY_KEY).await.context("Failed to read test history")? else {
        return Ok(Vec::new());
    };

    match serde_json::from_value(value) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            debug!(error = %e, "Discarding unreadable test history");
            Ok(Vec::new())
        }
    }
}

/// Drop the oldest entries beyond `HISTORY_LIMIT`.
pub fn trim(entries: &mut Vec<HistoryEntry>) {
    if entries.len() > HISTORY_LIMIT {
        let excess = entries.len() - HISTORY_LIMIT;
        entries.drain(..excess);
    }
}

pub async fn store(cache: &dyn CacheStore, entries: &[HistoryEntry]) -> Result<()> {
    cache
        .put(HISTORY_KEY, serde_json::to_value(entries)?, HISTORY_TTL)
        .await
        .context("Failed to store test history")
}

/// Append an entry, keep the newest `HISTORY_LIMIT`, and write back.
pub async fn append(cache: &dyn CacheStore, entry: HistoryEntry) -> Result<usize> {
    let mut entries = load(cache).await?;
    entries.push(entry);
    trim(&mut entries);

    store(cache, &entries).await?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn entry() -> HistoryEntry {
        HistoryEntry {
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            summary: Summary::default(),
            records: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_history_is_trimmed_to_limit() {
        let store = MemoryStore::new();
        let mut last = None;
        for _ in 0..(HISTORY_LIMIT + 5) {
            let e = entry();
            last = Some(e.session_id);
            append(&store, e).await.unwrap();
        }

        let entries = load(&store).await.unwrap();
        assert_eq!(entries.len(), HISTORY_LIMIT);
        assert_eq!(entries.last().map(|e| e.session_id), last);
    }

    #[tokio::test]
    async fn test_garbage_history_reads_as_empty() {
        let store = MemoryStore::new();
        store
            .put(HISTORY_KEY, serde_json::json!("not a list"), HISTORY_TTL)
            .await
            .unwrap();

        assert!(load(&store).await.unwrap().is_empty());
    }
}
