use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::memory::MemoryProbe;
use crate::metrics::SuiteExecutionRecord;
use crate::scoring::Scores;

/// Environment variables that may be copied into failure reports
pub const SAFE_ENV_VARS: [&str; 5] = ["SUITERUN_ENV", "RUST_LOG", "RUST_BACKTRACE", "CI", "TOKIO_WORKER_THREADS"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub memory_usage_bytes: u64,
    pub peak_memory_bytes: u64,
    pub environment: BTreeMap<String, String>,
}

impl FailureContext {
    pub fn capture(probe: &dyn MemoryProbe) -> Self {
        Self {
            memory_usage_bytes: probe.current_bytes(),
            peak_memory_bytes: probe.peak_bytes(),
            environment: safe_environment(),
        }
    }
}

pub fn safe_environment() -> BTreeMap<String, String> {
    SAFE_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub suite_name: String,
    pub message: String,
    pub trace: String,
    pub context: FailureContext,
    pub suggestions: Vec<String>,
}

/// Remedies keyed off words in the failure message.
pub fn suggestions_for(message: &str) -> Vec<String> {
    let message = message.to_lowercase();
    let mut suggestions = Vec::new();

    if message.contains("memory") {
        suggestions.push("Increase the memory limit or reduce memory usage in tests".to_string());
    }
    if message.contains("timeout") || message.contains("timed out") {
        suggestions.push("Increase the timeout or optimize slow tests".to_string());
    }
    if message.contains("database") {
        suggestions.push("Check the database connection and configuration".to_string());
    }

    suggestions
}

pub fn analyze_failures(records: &[SuiteExecutionRecord], context: &FailureContext) -> Vec<FailureAnalysis> {
    records
        .iter()
        .filter_map(|record| {
            let error = record.error()?;
            Some(FailureAnalysis {
                suite_name: record.suite_name.clone(),
                message: error.message.clone(),
                trace: error.trace.clone(),
                context: context.clone(),
                suggestions: suggestions_for(&error.message),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: Level,
    pub suggestion: String,
    pub impact: Level,
}

pub fn optimization_suggestions(
    scores: &Scores,
    performance_threshold: f64,
    peak_memory_bytes: u64,
    memory_limit_bytes: u64,
) -> Vec<OptimizationSuggestion> {
    let mut suggestions = Vec::new();

    if scores.performance < performance_threshold {
        suggestions.push(OptimizationSuggestion {
            kind: "performance".to_string(),
            priority: Level::High,
            suggestion: "Optimize slow database queries".to_string(),
            impact: Level::High,
        });
    }

    if memory_limit_bytes > 0 && peak_memory_bytes as f64 > memory_limit_bytes as f64 * 0.8 {
        suggestions.push(OptimizationSuggestion {
            kind: "memory".to_string(),
            priority: Level::Medium,
            suggestion: "Optimize memory usage in tests".to_string(),
            impact: Level::Medium,
        });
    }

    suggestions
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub suite_name: String,
    pub duration_ms: f64,
    pub threshold_ms: u64,
}

/// Suites that ran longer than `max_execution_time_ms`; each one is logged.
pub fn threshold_violations(records: &[SuiteExecutionRecord], max_execution_time_ms: u64) -> Vec<ThresholdViolation> {
    records
        .iter()
        .filter(|r| r.duration_ms > max_execution_time_ms as f64)
        .map(|r| {
            warn!(
                suite = %r.suite_name,
                duration_ms = r.duration_ms,
                threshold_ms = max_execution_time_ms,
                "Suite exceeded execution time threshold"
            );
            ThresholdViolation {
                suite_name: r.suite_name.clone(),
                duration_ms: r.duration_ms,
                threshold_ms: max_execution_time_ms,
            }
        })
        .collect()
}
