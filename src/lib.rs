//! suiterun - Test-suite orchestration and aggregate scoring
//!
//! Runs named suites sequentially or in a bounded worker pool, records timing,
//! memory and status per suite, and reduces the results into scores and
//! recommendations, all inside a validate / optimize / teardown lifecycle.

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod database;
pub mod environment;
pub mod error;
pub mod execution;
pub mod history;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod scoring;
pub mod suite;

// Re-export commonly used types
pub use cache::{CacheStore, MemoryStore, Storage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, RunOptions, Thresholds};
pub use database::Database;
pub use environment::{EnvironmentGuard, LogSwitch, OptimizationHandle};
pub use error::{Result, SuiteError};
pub use execution::{ExecutionStrategy, SuiteRunner};
pub use memory::{MemoryProbe, StaticMemoryProbe, SystemMemoryProbe};
pub use metrics::{MetricsRecorder, SuiteExecutionRecord, SuiteStatus};
pub use orchestrator::{Orchestrator, RunState};
pub use registry::{ResultMap, SuiteDescriptor, SuiteRegistry};
pub use report::{AggregateReport, FailureReport, RunReport};
pub use scoring::Scores;
pub use suite::{Category, TestCase};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default database filename
    pub const DEFAULT_DB_NAME: &str = "suiterun.db";

    /// Default config filename
    pub const DEFAULT_CONFIG_NAME: &str = "config.toml";

    /// Default report directory
    pub const DEFAULT_REPORT_DIR: &str = "test_reports";
}
