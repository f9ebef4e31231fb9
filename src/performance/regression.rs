//! Regression Detection
//!
//! Compares a fresh benchmark against its stored baseline on p95 only.
//! The median barely reacts to tail slowdowns and p99 is dominated by a
//! handful of samples at typical iteration counts, while p95 tracks the
//! tail without being driven by single spikes. Using one statistic
//! everywhere keeps verdicts comparable across runs.

use serde::{Deserialize, Serialize};

use super::baseline::BaselineData;
use super::error::{HarnessError, Result};
use super::stats::BenchmarkResult;

/// Multiplicative p95 tolerance: `current > baseline * threshold` regresses
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionResult {
    pub benchmark: String,
    /// Current p95 (ms)
    pub current: f64,
    /// Baseline p95 (ms)
    pub baseline: f64,
    pub percent_change: f64,
    pub is_regression: bool,
    pub threshold: f64,
    /// Sample counts behind `current` and `baseline`
    pub current_samples: usize,
    pub baseline_samples: usize,
}

impl RegressionResult {
    pub fn verdict(&self) -> String {
        if self.is_regression {
            format!(
                "REGRESSION: {} p95 {:+.1}% exceeds {:.0}% tolerance",
                self.benchmark,
                self.percent_change,
                (self.threshold - 1.0) * 100.0
            )
        } else {
            format!("OK: {} p95 {:+.1}%", self.benchmark, self.percent_change)
        }
    }
}

/// Compare `current.p95` against `baseline.benchmarks[name].p95`.
///
/// Fails with `BenchmarkNotFound` for names the baseline does not contain.
pub fn detect_regression(
    name: &str,
    current: &BenchmarkResult,
    baseline: &BaselineData,
    threshold: f64,
) -> Result<RegressionResult> {
    let entry = baseline
        .benchmarks
        .get(name)
        .ok_or_else(|| HarnessError::BenchmarkNotFound {
            name: name.to_string(),
        })?;

    let percent_change = if entry.p95 > 0.0 {
        (current.p95 - entry.p95) / entry.p95 * 100.0
    } else {
        0.0
    };

    Ok(RegressionResult {
        benchmark: name.to_string(),
        current: current.p95,
        baseline: entry.p95,
        percent_change,
        is_regression: current.p95 > entry.p95 * threshold,
        threshold,
        current_samples: current.iterations,
        baseline_samples: entry.samples,
    })
}

pub fn has_regressions(results: &[RegressionResult]) -> bool {
    results.iter().any(|r| r.is_regression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::baseline::{BaselineData, BaselineEntry, BaselineEnvironment};
    use crate::performance::stats::compute_stats;
    use std::collections::BTreeMap;

    fn baseline_with(name: &str, p95: f64) -> BaselineData {
        let mut benchmarks = BTreeMap::new();
        benchmarks.insert(
            name.to_string(),
            BaselineEntry {
                p50: p95 / 2.0,
                p95,
                p99: p95 * 1.5,
                unit: "ms".to_string(),
                samples: 50,
            },
        );
        BaselineData {
            version: "1.0.0".to_string(),
            generated: chrono::Utc::now(),
            environment: BaselineEnvironment::current(),
            benchmarks,
        }
    }

    #[test]
    fn test_equal_p95_is_not_regression() {
        let baseline = baseline_with("query", 100.0);
        let current = compute_stats("query", &vec![100.0; 20]).unwrap();
        let r = detect_regression("query", &current, &baseline, DEFAULT_REGRESSION_THRESHOLD).unwrap();
        assert!(!r.is_regression);
        assert_eq!(r.percent_change, 0.0);
        assert_eq!(r.current_samples, 20);
        assert_eq!(r.baseline_samples, 50);
    }

    #[test]
    fn test_over_threshold_is_regression() {
        let baseline = baseline_with("query", 100.0);
        let current = compute_stats("query", &vec![125.0; 20]).unwrap();
        let r = detect_regression("query", &current, &baseline, 1.2).unwrap();
        assert!(r.is_regression);
        assert!((r.percent_change - 25.0).abs() < 1e-9);
        assert!(r.verdict().starts_with("REGRESSION"));
    }

    #[test]
    fn test_exactly_at_threshold_passes() {
        let baseline = baseline_with("query", 100.0);
        let current = compute_stats("query", &vec![120.0; 20]).unwrap();
        let r = detect_regression("query", &current, &baseline, 1.2).unwrap();
        assert!(!r.is_regression);
    }

    #[test]
    fn test_improvement_reports_negative_change() {
        let baseline = baseline_with("query", 100.0);
        let current = compute_stats("query", &vec![80.0; 20]).unwrap();
        let r = detect_regression("query", &current, &baseline, 1.2).unwrap();
        assert!(!r.is_regression);
        assert!((r.percent_change + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_benchmark_fails() {
        let baseline = baseline_with("query", 100.0);
        let current = compute_stats("insert", &[1.0]).unwrap();
        let err = detect_regression("insert", &current, &baseline, 1.2).unwrap_err();
        assert!(matches!(err, HarnessError::BenchmarkNotFound { ref name } if name == "insert"));
    }

    #[test]
    fn test_only_p95_is_compared() {
        let baseline = baseline_with("query", 100.0);
        // p50 and mean regress badly, p95 does not
        let mut times = vec![90.0; 19];
        times.push(100.0);
        let current = compute_stats("query", &times).unwrap();
        let r = detect_regression("query", &current, &baseline, 1.2).unwrap();
        assert!(!r.is_regression);
        assert_eq!(r.current, 100.0);
    }
}
