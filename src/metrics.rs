use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{Result, SuiteError};
use crate::registry::ResultMap;

/// Samples kept per real-time series
pub const REAL_TIME_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteFailure {
    pub message: String,
    pub trace: String,
}

impl From<SuiteError> for SuiteFailure {
    fn from(err: SuiteError) -> Self {
        match err {
            SuiteError::SuiteExecution { message, trace, .. } => Self { message, trace },
            other => Self {
                message: other.to_string(),
                trace: format!("{:?}", other),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SuiteOutcome {
    Success { result: ResultMap },
    Failed { error: SuiteFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteExecutionRecord {
    pub suite_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub memory_delta_bytes: i64,
    pub peak_memory_bytes: u64,
    #[serde(flatten)]
    pub outcome: SuiteOutcome,
}

impl SuiteExecutionRecord {
    pub fn status(&self) -> SuiteStatus {
        match self.outcome {
            SuiteOutcome::Success { .. } => SuiteStatus::Success,
            SuiteOutcome::Failed { .. } => SuiteStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == SuiteStatus::Success
    }

    pub fn result(&self) -> Option<&ResultMap> {
        match &self.outcome {
            SuiteOutcome::Success { result } => Some(result),
            SuiteOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&SuiteFailure> {
        match &self.outcome {
            SuiteOutcome::Failed { error } => Some(error),
            SuiteOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealTimeMetrics {
    pub memory_usage: VecDeque<Sample>,
    pub response_times: VecDeque<Sample>,
}

impl RealTimeMetrics {
    fn observe(&mut self, record: &SuiteExecutionRecord) {
        push_capped(
            &mut self.memory_usage,
            Sample {
                timestamp: record.ended_at,
                value: record.memory_delta_bytes as f64,
            },
        );
        push_capped(
            &mut self.response_times,
            Sample {
                timestamp: record.ended_at,
                value: record.duration_ms,
            },
        );
    }
}

fn push_capped(series: &mut VecDeque<Sample>, sample: Sample) {
    series.push_back(sample);
    while series.len() > REAL_TIME_WINDOW {
        series.pop_front();
    }
}

/// Append-only store of execution records, keyed by suite name.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    records: Vec<SuiteExecutionRecord>,
    index: HashMap<String, usize>,
    real_time: Option<RealTimeMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_real_time_monitoring(mut self) -> Self {
        self.real_time = Some(RealTimeMetrics::default());
        self
    }

    pub fn record(&mut self, record: SuiteExecutionRecord) -> Result<()> {
        if self.index.contains_key(&record.suite_name) {
            return Err(SuiteError::DuplicateSuite {
                name: record.suite_name,
            });
        }

        if let Some(real_time) = self.real_time.as_mut() {
            real_time.observe(&record);
        }

        self.index.insert(record.suite_name.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn get(&self, suite_name: &str) -> Option<&SuiteExecutionRecord> {
        self.index.get(suite_name).map(|&i| &self.records[i])
    }

    /// Records in the order they were appended
    pub fn records(&self) -> &[SuiteExecutionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn passed(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.passed()
    }

    pub fn real_time(&self) -> Option<&RealTimeMetrics> {
        self.real_time.as_ref()
    }

    pub fn into_parts(self) -> (Vec<SuiteExecutionRecord>, Option<RealTimeMetrics>) {
        (self.records, self.real_time)
    }
}
