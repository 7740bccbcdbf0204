//! Environment guard
//!
//! Holds the settings a run may tweak as an explicit value. `optimize` swaps in
//! run settings and an in-memory cache; the returned handle puts the previous
//! ones back when dropped. The log channel is pushed to an optional `LogSwitch`
//! so the binary can retune its subscriber; the remaining settings are recorded
//! in the snapshot only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, MemoryStore, Storage};
use crate::config::RunOptions;
use crate::error::{Result, SuiteError};
use crate::memory::MemoryProbe;

pub const CACHE_PROBE_KEY: &str = "suiterun_connection_probe";

/// Receives the log channel name each time the applied settings change.
#[derive(Clone)]
pub struct LogSwitch(Arc<dyn Fn(&str) + Send + Sync>);

impl LogSwitch {
    pub fn new(apply: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(apply))
    }

    fn apply(&self, channel: &str) {
        (self.0)(channel)
    }
}

impl fmt::Debug for LogSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSwitch")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    pub persistent_connections: bool,
    pub emulate_prepares: bool,
    pub cache_driver: String,
    pub memory_limit_mb: u64,
    /// 0 means unlimited
    pub max_execution_secs: u64,
    pub debug: bool,
    pub log_channel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub timestamp: DateTime<Utc>,
    pub runtime_version: String,
    pub os: String,
    pub arch: String,
    pub hostname: String,
    pub environment: String,
    pub memory_limit_mb: u64,
    pub max_execution_secs: u64,
    pub storage_driver: String,
    pub cache_driver: String,
    pub available_memory_bytes: Option<u64>,
}

#[derive(Debug)]
struct GuardState {
    settings: EnvironmentSettings,
    overlay: Option<Arc<MemoryStore>>,
}

#[derive(Debug)]
pub struct EnvironmentGuard {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn CacheStore>,
    probe: Arc<dyn MemoryProbe>,
    baseline: EnvironmentSettings,
    state: Arc<Mutex<GuardState>>,
    log_switch: Option<LogSwitch>,
    optimizations: AtomicUsize,
    teardowns: AtomicUsize,
}

impl EnvironmentGuard {
    pub fn new(storage: Arc<dyn Storage>, cache: Arc<dyn CacheStore>, probe: Arc<dyn MemoryProbe>) -> Self {
        let baseline = EnvironmentSettings {
            persistent_connections: false,
            emulate_prepares: true,
            cache_driver: cache.driver().to_string(),
            memory_limit_mb: 128,
            max_execution_secs: 0,
            debug: false,
            log_channel: "stack".to_string(),
        };

        Self {
            storage,
            cache,
            probe,
            state: Arc::new(Mutex::new(GuardState {
                settings: baseline.clone(),
                overlay: None,
            })),
            baseline,
            log_switch: None,
            optimizations: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
        }
    }

    /// Guard backed entirely by an in-memory store
    pub fn in_memory(probe: Arc<dyn MemoryProbe>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, probe)
    }

    pub fn with_log_switch(mut self, switch: LogSwitch) -> Self {
        self.log_switch = Some(switch);
        self
    }

    /// Check storage, cache and memory in that order; the first failure is returned.
    pub async fn validate(&self, memory_floor_bytes: u64) -> Result<()> {
        info!("Validating test environment");

        self.check_storage().await?;
        self.check_cache().await?;
        self.check_memory(memory_floor_bytes)?;

        info!("Test environment validation completed");
        Ok(())
    }

    pub async fn check_storage(&self) -> Result<()> {
        self.storage
            .ping()
            .await
            .map_err(|e| SuiteError::validation("storage", format!("Database connection failed: {:#}", e)))
    }

    /// Put then forget a sentinel key with a one second TTL.
    pub async fn check_cache(&self) -> Result<()> {
        let cache = self.cache();
        let round_trip = async {
            cache
                .put(CACHE_PROBE_KEY, json!(true), Duration::from_secs(1))
                .await?;
            cache.forget(CACHE_PROBE_KEY).await
        };
        round_trip
            .await
            .map_err(|e| SuiteError::validation("cache", format!("Cache connection failed: {:#}", e)))
    }

    /// Passes when the host reports no figure.
    pub fn check_memory(&self, memory_floor_bytes: u64) -> Result<()> {
        match self.probe.available_bytes() {
            Some(available) if available < memory_floor_bytes => Err(SuiteError::validation(
                "memory",
                format!(
                    "Insufficient memory available: {} bytes (need {})",
                    available, memory_floor_bytes
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Apply run settings. They stay in force until the handle is dropped.
    pub fn optimize(&self, options: &RunOptions) -> OptimizationHandle {
        self.optimizations.fetch_add(1, Ordering::SeqCst);

        if !options.optimization {
            return OptimizationHandle {
                state: Arc::clone(&self.state),
                log_switch: None,
                previous: None,
            };
        }

        info!("Optimizing test environment");

        let mut state = self.lock();
        let overlay = Arc::new(MemoryStore::new());
        let optimized = EnvironmentSettings {
            persistent_connections: true,
            emulate_prepares: false,
            cache_driver: CacheStore::driver(overlay.as_ref()).to_string(),
            memory_limit_mb: options.memory_limit_mb,
            max_execution_secs: options.timeout_seconds,
            debug: options.debug,
            log_channel: if options.debug { "single" } else { "null" }.to_string(),
        };

        if let Some(switch) = &self.log_switch {
            switch.apply(&optimized.log_channel);
        }
        let previous_settings = std::mem::replace(&mut state.settings, optimized);
        let previous_overlay = state.overlay.replace(overlay);

        OptimizationHandle {
            state: Arc::clone(&self.state),
            log_switch: self.log_switch.clone(),
            previous: Some((previous_settings, previous_overlay)),
        }
    }

    /// Release whatever is still applied. Runs once at the end of every run.
    pub fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        if state.settings != self.baseline || state.overlay.is_some() {
            warn!("Environment settings still applied at teardown, restoring baseline");
            state.settings = self.baseline.clone();
            state.overlay = None;
            if let Some(switch) = &self.log_switch {
                switch.apply(&self.baseline.log_channel);
            }
        }
    }

    pub fn snapshot(&self, at: DateTime<Utc>) -> EnvironmentSnapshot {
        let settings = self.settings();

        EnvironmentSnapshot {
            timestamp: at,
            runtime_version: format!("suiterun {}", crate::VERSION),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            environment: std::env::var("SUITERUN_ENV").unwrap_or_else(|_| "testing".to_string()),
            memory_limit_mb: settings.memory_limit_mb,
            max_execution_secs: settings.max_execution_secs,
            storage_driver: self.storage.driver().to_string(),
            cache_driver: settings.cache_driver,
            available_memory_bytes: self.probe.available_bytes(),
        }
    }

    pub fn settings(&self) -> EnvironmentSettings {
        self.lock().settings.clone()
    }

    pub fn baseline(&self) -> &EnvironmentSettings {
        &self.baseline
    }

    /// The cache currently in force: the run overlay while optimized, the persistent one otherwise
    pub fn cache(&self) -> Arc<dyn CacheStore> {
        match &self.lock().overlay {
            Some(overlay) => overlay.clone(),
            None => Arc::clone(&self.cache),
        }
    }

    pub fn persistent_cache(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.cache)
    }

    pub fn probe(&self) -> Arc<dyn MemoryProbe> {
        Arc::clone(&self.probe)
    }

    /// Number of `optimize` calls so far
    pub fn optimizations(&self) -> usize {
        self.optimizations.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Restores the settings that were in force before `optimize` when dropped.
#[must_use = "dropping the handle immediately restores the previous settings"]
#[derive(Debug)]
pub struct OptimizationHandle {
    state: Arc<Mutex<GuardState>>,
    log_switch: Option<LogSwitch>,
    previous: Option<(EnvironmentSettings, Option<Arc<MemoryStore>>)>,
}

impl OptimizationHandle {
    pub fn is_active(&self) -> bool {
        self.previous.is_some()
    }

    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some((settings, overlay)) = self.previous.take() {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(switch) = &self.log_switch {
                switch.apply(&settings.log_channel);
            }
            state.settings = settings;
            state.overlay = overlay;
            debug!("Environment settings restored");
        }
    }
}

impl Drop for OptimizationHandle {
    fn drop(&mut self) {
        self.restore();
    }
}
