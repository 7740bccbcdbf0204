#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use suiterun::cache::{CacheStore, MemoryStore, Storage};
use suiterun::config::RunOptions;
use suiterun::database::Database;
use suiterun::environment::EnvironmentGuard;
use suiterun::memory::StaticMemoryProbe;
use suiterun::registry::{ResultMap, SuiteRegistry};

/// Guard over in-memory stores with unlimited memory reported
pub fn memory_guard() -> Arc<EnvironmentGuard> {
    Arc::new(EnvironmentGuard::in_memory(Arc::new(StaticMemoryProbe::with_available(u64::MAX))))
}

/// Create a sqlite database in a temporary directory
pub async fn setup_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let db = Database::new(temp_dir.path().join("test.db")).await?;
    Ok((temp_dir, db))
}

pub fn object(value: Value) -> ResultMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Result map with a single category in the shape the scorers read
pub fn category_result(category: &str, passed: u64, failed: u64, average_ms: f64) -> ResultMap {
    object(json!({
        category: {
            "suite_name": category,
            "total_tests": passed + failed,
            "passed": passed,
            "failed": failed,
            "average_execution_time": average_ms,
        }
    }))
}

pub fn options() -> RunOptions {
    RunOptions {
        max_processes: 2,
        ..RunOptions::default()
    }
}

pub fn succeeding_registry(names: &[&str]) -> SuiteRegistry {
    let mut registry = SuiteRegistry::new();
    for name in names {
        let result = category_result(name, 1, 0, 1.0);
        registry
            .register(*name, true, move || {
                let result = result.clone();
                async move { anyhow::Ok(result) }
            })
            .unwrap();
    }
    registry
}

/// Storage and cache stub that fails on demand
#[derive(Debug, Default)]
pub struct FlakyBackend {
    pub fail_ping: bool,
    pub fail_cache: bool,
    pub inner: MemoryStore,
}

impl FlakyBackend {
    pub fn failing_ping() -> Self {
        Self {
            fail_ping: true,
            ..Self::default()
        }
    }

    pub fn failing_cache() -> Self {
        Self {
            fail_cache: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Storage for FlakyBackend {
    fn driver(&self) -> &str {
        "flaky"
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyBackend {
    fn driver(&self) -> &str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if self.fail_cache {
            bail!("cache store unreachable");
        }
        self.inner.put(key, value, ttl).await
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.inner.forget(key).await
    }
}

pub fn flaky_guard(backend: FlakyBackend) -> Arc<EnvironmentGuard> {
    let backend = Arc::new(backend);
    Arc::new(EnvironmentGuard::new(
        backend.clone(),
        backend,
        Arc::new(StaticMemoryProbe::with_available(u64::MAX)),
    ))
}
