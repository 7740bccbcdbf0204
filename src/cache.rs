//! Key-value cache interface and the in-memory (`array`) store.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Driver name reported in environment snapshots
    fn driver(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;
    async fn forget(&self, key: &str) -> Result<()>;
}

/// Reachability probe for the persistent backend.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    fn driver(&self) -> &str;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Value, Instant)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn driver(&self) -> &str {
        "array"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStore {
    fn driver(&self) -> &str {
        "array"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store
            .put("k", json!({"a": 1}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));

        store.forget("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_expires_entries() {
        let store = MemoryStore::new();
        store.put("k", json!(true), Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
