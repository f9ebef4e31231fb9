//! Capacity Analyzer
//!
//! Derives sustainable limits and bottlenecks from a series of load-test
//! runs, one per concurrency level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{HarnessError, Result};
use super::load::{DriverKind, LoadTestResult};
use super::memory::bytes_to_mb;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityThresholds {
    /// Runs at or above this error rate (%) are not sustainable
    #[serde(default = "default_error_rate_ceiling")]
    pub error_rate_ceiling: f64,
    /// Relative p95 growth between adjacent runs that counts as degradation
    #[serde(default = "default_response_time_degradation")]
    pub response_time_degradation: f64,
    /// Mean per-run memory growth (MB) that counts as a memory bottleneck
    #[serde(default = "default_memory_growth_mb")]
    pub memory_growth_mb: f64,
    /// Sustainable concurrency below this is called out as low capacity
    #[serde(default = "default_low_capacity_users")]
    pub low_capacity_users: u32,
    /// Connection pool size of the target's database, reported as-is
    #[serde(default)]
    pub database_pool_size: Option<u32>,
}

fn default_error_rate_ceiling() -> f64 {
    5.0
}
fn default_response_time_degradation() -> f64 {
    0.5
}
fn default_memory_growth_mb() -> f64 {
    50.0
}
fn default_low_capacity_users() -> u32 {
    100
}

impl Default for CapacityThresholds {
    fn default() -> Self {
        Self {
            error_rate_ceiling: default_error_rate_ceiling(),
            response_time_degradation: default_response_time_degradation(),
            memory_growth_mb: default_memory_growth_mb(),
            low_capacity_users: default_low_capacity_users(),
            database_pool_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityLimits {
    pub max_concurrent_users: u32,
    #[serde(rename = "maxWebSocketConnections")]
    pub max_websocket_connections: Option<u32>,
    pub max_database_connections: Option<u32>,
    pub max_throughput: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckComponent {
    ResponseTime,
    ErrorHandling,
    Memory,
}

impl std::fmt::Display for BottleneckComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResponseTime => write!(f, "response time"),
            Self::ErrorHandling => write!(f, "error handling"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub component: BottleneckComponent,
    /// Last concurrency level before the degradation, when it is level-specific
    pub concurrency: Option<u32>,
    pub limit: String,
    pub recommendation: String,
}

/// Headline numbers of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    pub concurrency: u32,
    pub throughput: f64,
    pub p95: f64,
    pub p99: f64,
    pub error_rate: f64,
}

impl From<&LoadTestResult> for LoadSnapshot {
    fn from(r: &LoadTestResult) -> Self {
        Self {
            concurrency: r.concurrency,
            throughput: r.throughput,
            p95: r.response_time.p95,
            p99: r.response_time.p99,
            error_rate: r.error_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub normal_load: Option<LoadSnapshot>,
    pub peak_load: Option<LoadSnapshot>,
    pub stress_load: Option<LoadSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub scenario: String,
    pub timestamp: DateTime<Utc>,
    pub capacity_limits: CapacityLimits,
    /// False when no run stayed under the error ceiling and
    /// `maxConcurrentUsers` fell back to the first run
    pub capacity_validated: bool,
    pub bottlenecks: Vec<Bottleneck>,
    pub performance_metrics: PerformanceMetrics,
    pub recommendations: Vec<String>,
}

impl CapacityReport {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Persist the report; overwrites `path`
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self
            .to_json()
            .map_err(|e| HarnessError::Config(format!("cannot encode capacity report: {}", e)))?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "capacity report written");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapacityAnalyzer {
    pub thresholds: CapacityThresholds,
}

impl CapacityAnalyzer {
    pub fn new(thresholds: CapacityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn analyze(&self, results: &[LoadTestResult]) -> Result<CapacityReport> {
        let first = results.first().ok_or_else(|| {
            HarnessError::InsufficientData("capacity analysis needs at least one load test result".into())
        })?;
        let t = &self.thresholds;
        let sustainable = |r: &&LoadTestResult| r.error_rate < t.error_rate_ceiling;

        let (max_concurrency, validated) = match results.iter().filter(sustainable).map(|r| r.concurrency).max() {
            Some(c) => (c, true),
            None => {
                tracing::warn!(
                    ceiling = t.error_rate_ceiling,
                    fallback = first.concurrency,
                    "no run stayed under the error-rate ceiling; capacity is not validated"
                );
                (first.concurrency, false)
            }
        };

        let max_throughput = results.iter().map(|r| r.throughput).fold(0.0, f64::max);
        let max_websocket_connections = results
            .iter()
            .filter(|r| r.driver == DriverKind::VirtualUser)
            .filter(sustainable)
            .map(|r| r.concurrency)
            .max();

        let mut sorted: Vec<&LoadTestResult> = results.iter().collect();
        sorted.sort_by_key(|r| r.concurrency);

        let mut bottlenecks = Vec::new();
        for pair in sorted.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let (p95_prev, p95_next) = (prev.response_time.p95, next.response_time.p95);

            if p95_prev > 0.0 && p95_next > p95_prev * (1.0 + t.response_time_degradation) {
                bottlenecks.push(Bottleneck {
                    component: BottleneckComponent::ResponseTime,
                    concurrency: Some(prev.concurrency),
                    limit: format!(
                        "p95 {:.1}ms -> {:.1}ms between {} and {} concurrent users",
                        p95_prev, p95_next, prev.concurrency, next.concurrency
                    ),
                    recommendation: format!(
                        "Profile the slowest handlers and their downstream calls; latency degrades beyond {} concurrent users",
                        prev.concurrency
                    ),
                });
            }

            if prev.error_rate < t.error_rate_ceiling && next.error_rate >= t.error_rate_ceiling {
                bottlenecks.push(Bottleneck {
                    component: BottleneckComponent::ErrorHandling,
                    concurrency: Some(prev.concurrency),
                    limit: format!(
                        "error rate {:.1}% -> {:.1}% between {} and {} concurrent users",
                        prev.error_rate, next.error_rate, prev.concurrency, next.concurrency
                    ),
                    recommendation: format!(
                        "Add backpressure or rate limiting and review connection limits before {} concurrent users",
                        next.concurrency
                    ),
                });
            }
        }

        let mean_delta_mb = bytes_to_mb(
            results.iter().map(|r| r.resource_usage.memory_delta as f64).sum::<f64>()
                / results.len() as f64,
        );
        if mean_delta_mb > t.memory_growth_mb {
            bottlenecks.push(Bottleneck {
                component: BottleneckComponent::Memory,
                concurrency: None,
                limit: format!("average memory growth {:.1}MB per run", mean_delta_mb),
                recommendation: "Check for retained buffers or leaks; memory grows across load runs".to_string(),
            });
        }

        let peak = if validated {
            sorted
                .iter()
                .rev()
                .find(|r| r.concurrency == max_concurrency && r.error_rate < t.error_rate_ceiling)
                .copied()
        } else {
            Some(first)
        };
        let stress = sorted
            .last()
            .copied()
            .filter(|r| peak.map_or(true, |p| r.concurrency != p.concurrency));
        let performance_metrics = PerformanceMetrics {
            normal_load: sorted.first().map(|r| LoadSnapshot::from(*r)),
            peak_load: peak.map(LoadSnapshot::from),
            stress_load: stress.map(LoadSnapshot::from),
        };

        let recommendations = self.recommendations(
            max_concurrency,
            validated,
            &bottlenecks,
            performance_metrics.peak_load.as_ref(),
        );

        Ok(CapacityReport {
            scenario: scenario_label(results),
            timestamp: Utc::now(),
            capacity_limits: CapacityLimits {
                max_concurrent_users: max_concurrency,
                max_websocket_connections,
                max_database_connections: t.database_pool_size,
                max_throughput,
            },
            capacity_validated: validated,
            bottlenecks,
            performance_metrics,
            recommendations,
        })
    }

    fn recommendations(
        &self,
        max_concurrency: u32,
        validated: bool,
        bottlenecks: &[Bottleneck],
        peak: Option<&LoadSnapshot>,
    ) -> Vec<String> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        if !validated {
            out.push(format!(
                "No tested level stayed under {:.1}% errors; {} concurrent users is not a validated capacity",
                t.error_rate_ceiling, max_concurrency
            ));
        }
        if max_concurrency < t.low_capacity_users {
            out.push(format!(
                "Capacity below {} concurrent users; consider horizontal scaling or connection pooling",
                t.low_capacity_users
            ));
        }
        if let Some(first) = bottlenecks
            .iter()
            .find(|b| b.component == BottleneckComponent::ResponseTime)
        {
            if let Some(c) = first.concurrency {
                out.push(format!(
                    "Response time degrades first above {} concurrent users; add caching or optimize hot queries",
                    c
                ));
            }
        }
        if bottlenecks
            .iter()
            .any(|b| b.component == BottleneckComponent::ErrorHandling)
        {
            out.push("Error rate crosses the ceiling under load; add retries with backoff and graceful degradation".to_string());
        }
        if bottlenecks.iter().any(|b| b.component == BottleneckComponent::Memory) {
            out.push("Run a memory-leak check on the request path".to_string());
        }
        if let Some(peak) = peak.filter(|p| p.p95 > 500.0) {
            out.push(format!(
                "p95 at peak load is {:.1}ms; user-facing latency above 500ms needs attention",
                peak.p95
            ));
        }
        if out.is_empty() {
            out.push("All tested load levels stayed within thresholds; extend the test to higher concurrency".to_string());
        }
        out
    }
}

/// Analyze with default thresholds
pub fn analyze_capacity_limits(results: &[LoadTestResult]) -> Result<CapacityReport> {
    CapacityAnalyzer::default().analyze(results)
}

fn scenario_label(results: &[LoadTestResult]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for r in results {
        if !names.contains(&r.scenario.as_str()) {
            names.push(&r.scenario);
        }
    }
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::load::{RequestCounts, ResourceUsage, ResponseTimeSummary};

    fn run(concurrency: u32, error_rate: f64, p95: f64, throughput: f64) -> LoadTestResult {
        let total = 10_000;
        let failed = (total as f64 * error_rate / 100.0).round() as u64;
        LoadTestResult::new(
            "api",
            DriverKind::Http,
            concurrency,
            30.0,
            RequestCounts { total, failed },
            throughput,
            ResponseTimeSummary {
                p95,
                p99: p95 * 1.5,
                ..Default::default()
            },
            ResourceUsage::default(),
        )
    }

    #[test]
    fn test_empty_input_is_insufficient_data() {
        assert!(matches!(
            analyze_capacity_limits(&[]),
            Err(HarnessError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_error_inflection_scenario() {
        let results = vec![
            run(50, 0.5, 80.0, 900.0),
            run(100, 2.0, 100.0, 1500.0),
            run(500, 12.0, 130.0, 1700.0),
        ];
        let report = analyze_capacity_limits(&results).unwrap();

        assert_eq!(report.capacity_limits.max_concurrent_users, 100);
        assert!(report.capacity_validated);
        assert_eq!(report.capacity_limits.max_throughput, 1700.0);
        assert!(report.bottlenecks.iter().any(|b| {
            b.component == BottleneckComponent::ErrorHandling && b.concurrency == Some(100)
        }));
        let metrics = &report.performance_metrics;
        assert_eq!(metrics.normal_load.as_ref().unwrap().concurrency, 50);
        assert_eq!(metrics.peak_load.as_ref().unwrap().concurrency, 100);
        assert_eq!(metrics.stress_load.as_ref().unwrap().concurrency, 500);
    }

    #[test]
    fn test_response_time_degradation_uses_sorted_order() {
        // Input deliberately out of order
        let results = vec![
            run(200, 1.0, 400.0, 1000.0),
            run(100, 1.0, 100.0, 800.0),
        ];
        let report = analyze_capacity_limits(&results).unwrap();
        let rt: Vec<_> = report
            .bottlenecks
            .iter()
            .filter(|b| b.component == BottleneckComponent::ResponseTime)
            .collect();
        assert_eq!(rt.len(), 1);
        assert_eq!(rt[0].concurrency, Some(100));
    }

    #[test]
    fn test_no_sustainable_run_falls_back_to_first() {
        let results = vec![run(300, 20.0, 100.0, 10.0), run(100, 9.0, 90.0, 20.0)];
        let report = analyze_capacity_limits(&results).unwrap();
        assert_eq!(report.capacity_limits.max_concurrent_users, 300);
        assert!(!report.capacity_validated);
        assert!(report.recommendations[0].contains("not a validated capacity"));
    }

    #[test]
    fn test_memory_growth_bottleneck() {
        let mut a = run(10, 0.0, 10.0, 100.0);
        let mut b = run(20, 0.0, 11.0, 200.0);
        a.resource_usage.memory_delta = 80 * 1024 * 1024;
        b.resource_usage.memory_delta = 40 * 1024 * 1024;
        let report = analyze_capacity_limits(&[a, b]).unwrap();
        assert!(report
            .bottlenecks
            .iter()
            .any(|b| b.component == BottleneckComponent::Memory && b.concurrency.is_none()));
    }

    #[test]
    fn test_low_capacity_recommendation() {
        let report = analyze_capacity_limits(&[run(40, 0.0, 20.0, 300.0)]).unwrap();
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("Capacity below 100 concurrent users")));
        assert!(report.performance_metrics.stress_load.is_none());
    }

    #[test]
    fn test_websocket_limit_only_from_virtual_user_runs() {
        let mut vu = run(250, 1.0, 50.0, 100.0);
        vu.driver = DriverKind::VirtualUser;
        let report = analyze_capacity_limits(&[run(400, 1.0, 50.0, 500.0), vu]).unwrap();
        assert_eq!(report.capacity_limits.max_websocket_connections, Some(250));
        assert_eq!(report.capacity_limits.max_concurrent_users, 400);

        let http_only = analyze_capacity_limits(&[run(400, 1.0, 50.0, 500.0)]).unwrap();
        assert_eq!(http_only.capacity_limits.max_websocket_connections, None);
    }

    #[test]
    fn test_write_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacity.json");
        let report = analyze_capacity_limits(&[run(150, 0.0, 20.0, 300.0)]).unwrap();
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["capacityLimits"]["maxConcurrentUsers"], 150);
        assert!(value["capacityLimits"]
            .as_object()
            .unwrap()
            .contains_key("maxWebSocketConnections"));
    }
}
