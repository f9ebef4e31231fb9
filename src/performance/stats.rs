//! Stats Engine
//!
//! Pure reductions over raw sample arrays. Percentiles use the nearest-rank
//! index `floor(n * fraction)` on a sorted copy (no interpolation) and the
//! standard deviation is the population form (divide by `n`). Both choices
//! keep numbers comparable with previously recorded baselines.

use serde::{Deserialize, Serialize};

use super::error::{HarnessError, Result};

/// Summary statistics for one named benchmark. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub name: String,
    pub iterations: usize,
    /// Samples in collection order (not sorted)
    pub times: Vec<f64>,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl BenchmarkResult {
    pub fn display(&self) -> String {
        format!(
            "{}: {} iterations\n\
             - Mean: {:.3}ms, StdDev: {:.3}ms\n\
             - Min: {:.3}ms, Max: {:.3}ms\n\
             - p50: {:.3}ms, p95: {:.3}ms, p99: {:.3}ms",
            self.name,
            self.iterations,
            self.mean,
            self.std_dev,
            self.min,
            self.max,
            self.p50,
            self.p95,
            self.p99,
        )
    }
}

/// Reduce `times` to a [`BenchmarkResult`]. The input slice is never reordered.
///
/// NaN and infinite samples are rejected; they would poison every statistic.
pub fn compute_stats(name: &str, times: &[f64]) -> Result<BenchmarkResult> {
    if times.is_empty() {
        return Err(HarnessError::EmptyInput {
            name: name.to_string(),
        });
    }
    if let Some((index, &value)) = times.iter().enumerate().find(|(_, t)| !t.is_finite()) {
        return Err(HarnessError::InvalidSample {
            name: name.to_string(),
            index: Some(index),
            value,
        });
    }

    let mut sorted = times.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;

    Ok(BenchmarkResult {
        name: name.to_string(),
        iterations: n,
        times: times.to_vec(),
        p50: nearest_rank(&sorted, 0.50),
        p95: nearest_rank(&sorted, 0.95),
        p99: nearest_rank(&sorted, 0.99),
        mean,
        min: sorted[0],
        max: sorted[n - 1],
        std_dev: population_std_dev(&sorted, mean),
    })
}

/// Value at index `floor(n * fraction)` of an ascending slice.
///
/// Returns `0.0` for an empty slice; callers that must reject empty input
/// go through [`compute_stats`].
pub fn nearest_rank(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * fraction).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn population_std_dev(samples: &[f64], mean: f64) -> f64 {
    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

/// Operations per second for `count` operations over `duration_secs`
pub fn throughput(count: u64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        count as f64 / duration_secs
    } else {
        0.0
    }
}

/// Failure percentage in `[0, 100]`; zero when nothing was attempted
pub fn error_rate(failed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_scenario() {
        let result = compute_stats("t", &[10.0, 20.0, 30.0, 40.0, 100.0]).unwrap();
        assert_eq!(result.p50, 30.0);
        assert_eq!(result.p95, 100.0);
        assert_eq!(result.p99, 100.0);
        assert_eq!(result.mean, 40.0);
        assert_eq!(result.min, 10.0);
        assert_eq!(result.max, 100.0);
        assert_eq!(result.iterations, 5);
    }

    #[test]
    fn test_constant_samples_have_zero_spread() {
        let times = vec![100.0; 50];
        let result = compute_stats("flat", &times).unwrap();
        assert_eq!(result.p50, 100.0);
        assert_eq!(result.p95, 100.0);
        assert_eq!(result.p99, 100.0);
        assert_eq!(result.mean, 100.0);
        assert_eq!(result.std_dev, 0.0);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = compute_stats("nothing", &[]).unwrap_err();
        assert!(matches!(err, HarnessError::EmptyInput { ref name } if name == "nothing"));
    }

    #[test]
    fn test_non_finite_samples_are_rejected() {
        let err = compute_stats("q", &[1.0, f64::NAN, 3.0]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidSample { index: Some(1), .. }));

        let err = compute_stats("q", &[f64::INFINITY]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidSample { index: Some(0), .. }));
    }

    #[test]
    fn test_input_order_is_preserved() {
        let times = [5.0, 1.0, 4.0, 2.0, 3.0];
        let result = compute_stats("order", &times).unwrap();
        assert_eq!(result.times, times.to_vec());
        assert_eq!(result.min, 1.0);
        assert_eq!(result.p50, 3.0);
    }

    #[test]
    fn test_population_std_dev() {
        // mean 5, squared deviations sum to 32 over 8 samples
        let result = compute_stats("sd", &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((result.std_dev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ordering_invariant_on_varied_inputs() {
        let inputs: Vec<Vec<f64>> = vec![
            vec![1.0],
            vec![3.0, 1.0],
            (1..=100).map(|i| i as f64).rev().collect(),
            (0..37).map(|i| ((i * 7919) % 101) as f64 * 0.5).collect(),
            vec![0.001, 1000.0, 0.5, 0.5, 999.0, 12.25],
        ];
        for times in inputs {
            let r = compute_stats("prop", &times).unwrap();
            assert!(r.min <= r.p50 && r.p50 <= r.p95 && r.p95 <= r.p99 && r.p99 <= r.max);
            assert!(r.mean >= r.min && r.mean <= r.max);
            assert_eq!(r.iterations, times.len());
        }
    }

    #[test]
    fn test_hundred_samples_nearest_rank() {
        let times: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let r = compute_stats("hundred", &times).unwrap();
        assert_eq!(r.p50, 51.0);
        assert_eq!(r.p95, 96.0);
        assert_eq!(r.p99, 100.0);
    }

    #[test]
    fn test_derived_rates() {
        assert_eq!(error_rate(0, 0), 0.0);
        assert_eq!(error_rate(5, 200), 2.5);
        assert_eq!(throughput(500, 10.0), 50.0);
        assert_eq!(throughput(500, 0.0), 0.0);
    }
}
