//! Report assembly and rendering
//!
//! `assemble` is a pure merge of records, scores and run context. The markdown and
//! CSV renderings back `run --save`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::analysis::{FailureAnalysis, FailureContext, OptimizationSuggestion, ThresholdViolation};
use crate::config::{RunOptions, Thresholds};
use crate::environment::EnvironmentSnapshot;
use crate::metrics::{RealTimeMetrics, SuiteExecutionRecord};
use crate::registry::ResultMap;
use crate::scoring::{overall_success_rate, Scores};

pub const JSON_REPORT_FILE: &str = "comprehensive_test_report.json";
pub const MARKDOWN_REPORT_FILE: &str = "test_summary.md";
pub const CSV_REPORT_FILE: &str = "coverage_report.csv";

/// Test-case totals summed over the categories of successful suites. Sums saturate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseTotals {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
}

impl CaseTotals {
    fn from_records(records: &[SuiteExecutionRecord]) -> Self {
        let field = |category: &serde_json::Map<String, Value>, name: &str| {
            category.get(name).and_then(Value::as_u64).unwrap_or(0)
        };

        records
            .iter()
            .filter_map(SuiteExecutionRecord::result)
            .flat_map(|result| result.values().filter_map(Value::as_object))
            .fold(Self::default(), |acc, category| Self {
                total: acc.total.saturating_add(field(category, "total_tests")),
                passed: acc.passed.saturating_add(field(category, "passed")),
                failed: acc.failed.saturating_add(field(category, "failed")),
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub success_rate_percent: f64,
    pub performance_score: f64,
    pub security_score: f64,
    pub integration_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    pub cases: CaseTotals,
}

impl Summary {
    pub fn new(records: &[SuiteExecutionRecord], scores: &Scores, coverage: Option<f64>) -> Self {
        let total_tests = records.len();
        let passed = records.iter().filter(|r| r.is_success()).count();

        Self {
            total_tests,
            passed,
            failed: total_tests - passed,
            success_rate_percent: overall_success_rate(total_tests, passed),
            performance_score: scores.performance,
            security_score: scores.security,
            integration_score: scores.integration,
            coverage,
            cases: CaseTotals::from_records(records),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedMetrics {
    pub peak_memory_bytes: u64,
    pub optimization_suggestions: Vec<OptimizationSuggestion>,
    pub threshold_violations: Vec<ThresholdViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<Vec<FailureAnalysis>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_time: Option<RealTimeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub strategy: String,
    pub pools: usize,
    pub timed_out_suites: Vec<String>,
    pub environment: EnvironmentSnapshot,
    pub config: RunOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub summary: Summary,
    pub detailed_results: BTreeMap<String, ResultMap>,
    pub records: Vec<SuiteExecutionRecord>,
    pub recommendations: Vec<String>,
    pub advanced_metrics: AdvancedMetrics,
    pub execution_context: ExecutionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub error: String,
    pub trace: String,
    /// Lifecycle phase that failed
    pub phase: String,
    pub context: FailureContext,
    pub config: RunOptions,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of `Orchestrator::run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunReport {
    Completed(Box<AggregateReport>),
    Failed(Box<FailureReport>),
}

impl RunReport {
    pub fn session_id(&self) -> Uuid {
        match self {
            RunReport::Completed(report) => report.execution_context.session_id,
            RunReport::Failed(report) => report.session_id,
        }
    }

    /// True when the run completed and every suite succeeded
    pub fn is_success(&self) -> bool {
        match self {
            RunReport::Completed(report) => report.summary.failed == 0,
            RunReport::Failed(_) => false,
        }
    }

    pub fn completed(&self) -> Option<&AggregateReport> {
        match self {
            RunReport::Completed(report) => Some(report),
            RunReport::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            RunReport::Failed(report) => Some(report),
            RunReport::Completed(_) => None,
        }
    }
}

/// Threshold-driven advice, always in the same order.
pub fn recommendations(scores: &Scores, coverage: Option<f64>, thresholds: &Thresholds) -> Vec<String> {
    let mut out = Vec::new();

    if scores.performance < thresholds.performance {
        out.push("optimize performance".to_string());
    }
    if scores.security < thresholds.security {
        out.push("improve security".to_string());
    }
    if scores.integration < thresholds.integration {
        out.push("fix integration issues".to_string());
    }
    if let Some(coverage) = coverage {
        if coverage < thresholds.coverage {
            out.push("increase test coverage".to_string());
        }
    }

    out
}

pub fn assemble(
    records: Vec<SuiteExecutionRecord>,
    scores: Scores,
    coverage: Option<f64>,
    recommendations: Vec<String>,
    advanced_metrics: AdvancedMetrics,
    execution_context: ExecutionContext,
) -> AggregateReport {
    let summary = Summary::new(&records, &scores, coverage);
    let detailed_results = records
        .iter()
        .filter_map(|r| r.result().map(|result| (r.suite_name.clone(), result.clone())))
        .collect();

    AggregateReport {
        summary,
        detailed_results,
        records,
        recommendations,
        advanced_metrics,
        execution_context,
    }
}

pub fn to_markdown(report: &AggregateReport) -> String {
    let mut md = String::new();
    // Writing into a String cannot fail
    let _ = write_markdown(&mut md, report);
    md
}

fn write_markdown(md: &mut String, report: &AggregateReport) -> std::fmt::Result {
    let summary = &report.summary;
    let context = &report.execution_context;

    writeln!(md, "# Comprehensive Test Report\n")?;
    writeln!(md, "**Session:** {}", context.session_id)?;
    writeln!(md, "**Generated:** {}", context.end_time.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(md, "**Execution Time:** {:.0} ms", context.duration_ms)?;
    writeln!(md, "**Strategy:** {}\n", context.strategy)?;

    writeln!(md, "## Summary\n")?;
    writeln!(md, "- **Suites:** {}/{} passed ({:.1}%)", summary.passed, summary.total_tests, summary.success_rate_percent)?;
    writeln!(md, "- **Test Cases:** {}/{} passed", summary.cases.passed, summary.cases.total)?;
    writeln!(md, "- **Performance Score:** {:.1}", summary.performance_score)?;
    writeln!(md, "- **Security Score:** {:.1}", summary.security_score)?;
    writeln!(md, "- **Integration Score:** {:.1}", summary.integration_score)?;
    if let Some(coverage) = summary.coverage {
        writeln!(md, "- **Coverage:** {:.1}%", coverage)?;
    }
    md.push('\n');

    writeln!(md, "## Suites\n")?;
    writeln!(md, "| Suite | Status | Duration (ms) | Error |")?;
    writeln!(md, "|-------|--------|---------------|-------|")?;
    for record in &report.records {
        let status = if record.is_success() { "✅ success" } else { "❌ failed" };
        let error = record.error().map(|e| e.message.replace('|', "\\|")).unwrap_or_default();
        writeln!(md, "| {} | {} | {:.1} | {} |", record.suite_name, status, record.duration_ms, error)?;
    }
    md.push('\n');

    if !context.timed_out_suites.is_empty() {
        writeln!(md, "## Timed Out\n")?;
        for suite in &context.timed_out_suites {
            writeln!(md, "- {}", suite)?;
        }
        md.push('\n');
    }

    if !report.recommendations.is_empty() {
        writeln!(md, "## Recommendations\n")?;
        for (i, recommendation) in report.recommendations.iter().enumerate() {
            writeln!(md, "{}. {}", i + 1, recommendation)?;
        }
        md.push('\n');
    }

    md.push_str("---\n*Generated by suiterun*\n");
    Ok(())
}

/// One row per suite plus an overall row.
pub fn to_csv(report: &AggregateReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Suite", "Status", "DurationMs", "Cases", "Passed", "Failed"])?;

    for record in &report.records {
        let totals = CaseTotals::from_records(std::slice::from_ref(record));
        let status = if record.is_success() { "success" } else { "failed" };
        writer.write_record([
            record.suite_name.clone(),
            status.to_string(),
            format!("{:.1}", record.duration_ms),
            totals.total.to_string(),
            totals.passed.to_string(),
            totals.failed.to_string(),
        ])?;
    }

    let summary = &report.summary;
    writer.write_record([
        "OVERALL".to_string(),
        format!("{:.1}%", summary.success_rate_percent),
        format!("{:.1}", report.execution_context.duration_ms),
        summary.cases.total.to_string(),
        summary.cases.passed.to_string(),
        summary.cases.failed.to_string(),
    ])?;

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV report: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

/// Write the JSON, markdown and CSV renderings into `dir`.
pub async fn save(report: &AggregateReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

    let files = [
        (JSON_REPORT_FILE, serde_json::to_string_pretty(report)?),
        (MARKDOWN_REPORT_FILE, to_markdown(report)),
        (CSV_REPORT_FILE, to_csv(report)?),
    ];

    let mut written = Vec::new();
    for (name, contents) in files {
        let path = dir.join(name);
        fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
