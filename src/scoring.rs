//! Aggregate scores
//!
//! Each scorer reads a suite result map whose values are per-category objects
//! (see [`crate::suite::CategoryReport`]). Categories missing the fields a scorer
//! needs are skipped rather than counted as zero.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::SuiteExecutionRecord;
use crate::registry::ResultMap;

pub const PERFORMANCE_SUITE: &str = "performance";
pub const SECURITY_SUITE: &str = "security";
pub const INTEGRATION_SUITE: &str = "integration";

fn categories(results: &ResultMap) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
    results.values().filter_map(Value::as_object)
}

fn number(category: &serde_json::Map<String, Value>, field: &str) -> Option<f64> {
    category.get(field).and_then(Value::as_f64).filter(|v| v.is_finite())
}

/// Mean of `max(0, 100 - ms / 10)` over categories reporting an average time.
pub fn performance_score(results: &ResultMap) -> f64 {
    let scores: Vec<f64> = categories(results)
        .filter_map(|c| number(c, "average_execution_time"))
        .map(|ms| (100.0 - ms / 10.0).max(0.0))
        .collect();

    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

pub fn security_score(results: &ResultMap) -> f64 {
    let (passed, total) = categories(results)
        .filter_map(|c| Some((number(c, "passed")?, number(c, "failed")?)))
        .fold((0.0, 0.0), |(p, t), (passed, failed)| (p + passed, t + passed + failed));

    ratio(passed, total)
}

pub fn integration_score(results: &ResultMap) -> f64 {
    let (passed, total) = categories(results)
        .filter_map(|c| Some((number(c, "passed")?, number(c, "total_tests")?)))
        .fold((0.0, 0.0), |(p, t), (passed, total)| (p + passed, t + total));

    ratio(passed, total)
}

pub fn overall_success_rate(total: usize, passed: usize) -> f64 {
    ratio(passed as f64, total as f64)
}

fn ratio(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// First top-level `overall_coverage` number among successful suites, in record order.
pub fn coverage(records: &[SuiteExecutionRecord]) -> Option<f64> {
    records
        .iter()
        .filter_map(SuiteExecutionRecord::result)
        .find_map(|result| result.get("overall_coverage").and_then(Value::as_f64))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub performance: f64,
    pub security: f64,
    pub integration: f64,
}

impl Scores {
    /// Score the performance, security and integration suites. A suite that is
    /// missing or failed contributes an empty result map.
    pub fn from_records(records: &[SuiteExecutionRecord]) -> Self {
        let empty = ResultMap::new();
        let result_of = |name: &str| {
            records
                .iter()
                .find(|r| r.suite_name == name)
                .and_then(SuiteExecutionRecord::result)
                .unwrap_or(&empty)
        };

        Self {
            performance: performance_score(result_of(PERFORMANCE_SUITE)),
            security: security_score(result_of(SECURITY_SUITE)),
            integration: integration_score(result_of(INTEGRATION_SUITE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ResultMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_performance_score_clamps_at_zero() {
        let results = map(json!({
            "fast": {"average_execution_time": 100.0},
            "slow": {"average_execution_time": 5000.0},
            "no_timing": {"passed": 3},
        }));

        assert_eq!(performance_score(&results), 45.0);
    }

    #[test]
    fn test_security_score_skips_incomplete_categories() {
        let results = map(json!({
            "auth": {"passed": 3, "failed": 1},
            "csrf": {"passed": 5},
            "note": "not a category",
        }));

        assert_eq!(security_score(&results), 75.0);
    }

    #[test]
    fn test_integration_score() {
        let results = map(json!({
            "api": {"passed": 4, "total_tests": 5},
            "db": {"passed": 1, "total_tests": 5},
        }));

        assert_eq!(integration_score(&results), 50.0);
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let empty = ResultMap::new();
        assert_eq!(performance_score(&empty), 0.0);
        assert_eq!(security_score(&empty), 0.0);
        assert_eq!(integration_score(&empty), 0.0);
        assert_eq!(overall_success_rate(0, 0), 0.0);
        assert_eq!(overall_success_rate(4, 3), 75.0);
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let results = map(json!({
            "bad": {"passed": "three", "failed": null, "total_tests": [1]},
            "good": {"passed": 1, "failed": 1, "total_tests": 2},
        }));

        assert_eq!(security_score(&results), 50.0);
        assert_eq!(integration_score(&results), 50.0);
    }
}
