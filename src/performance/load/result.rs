//! Normalized load-test result shared by every driver adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::performance::memory::{bytes_to_mb, MemorySnapshot};
use crate::performance::stats::error_rate;

/// Which adapter produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Http,
    VirtualUser,
}

/// Response-time distribution in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeSummary {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

/// Driver-process memory around the run. Measures the harness, not the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub memory_start: u64,
    pub memory_end: u64,
    pub memory_delta: i64,
    #[serde(rename = "memoryPeakMB")]
    pub memory_peak_mb: f64,
}

impl ResourceUsage {
    /// `peak` is the tracked high-water mark over the run. Without one the
    /// peak is the larger of the two snapshots.
    pub fn from_snapshots(start: &MemorySnapshot, end: &MemorySnapshot, peak: Option<u64>) -> Self {
        let delta = end.delta_since(start);
        let peak = peak
            .unwrap_or(0)
            .max(start.heap_used)
            .max(end.heap_used);
        Self {
            memory_start: start.heap_used,
            memory_end: end.heap_used,
            memory_delta: delta.heap_used,
            memory_peak_mb: bytes_to_mb(peak as f64),
        }
    }
}

/// Connection-level counters reported by virtual-user tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityMetrics {
    pub connections_opened: u64,
    pub connections_completed: u64,
    pub connections_failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub kind: String,
    pub count: u64,
}

/// Request totals before derivation of error rate and successes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestCounts {
    pub total: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestResult {
    pub scenario: String,
    pub driver: DriverKind,
    pub timestamp: DateTime<Utc>,
    pub concurrency: u32,
    /// Seconds
    pub duration: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage, `0.0` when no request was made
    pub error_rate: f64,
    /// Requests per second
    pub throughput: f64,
    pub response_time: ResponseTimeSummary,
    pub resource_usage: ResourceUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_metrics: Option<CapacityMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorCount>,
    /// `responseTime` fields estimated from neighbours instead of measured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approximated: Vec<String>,
}

impl LoadTestResult {
    /// Build a result from raw counts. Failures are capped at the total so
    /// `successful + failed == total` always holds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scenario: impl Into<String>,
        driver: DriverKind,
        concurrency: u32,
        duration: f64,
        counts: RequestCounts,
        throughput: f64,
        response_time: ResponseTimeSummary,
        resource_usage: ResourceUsage,
    ) -> Self {
        let failed = counts.failed.min(counts.total);
        Self {
            scenario: scenario.into(),
            driver,
            timestamp: Utc::now(),
            concurrency,
            duration,
            total_requests: counts.total,
            successful_requests: counts.total - failed,
            failed_requests: failed,
            error_rate: error_rate(failed, counts.total),
            throughput,
            response_time,
            resource_usage,
            capacity_metrics: None,
            errors: Vec::new(),
            approximated: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_capacity_metrics(mut self, metrics: CapacityMetrics) -> Self {
        self.capacity_metrics = Some(metrics);
        self
    }

    pub fn with_errors(mut self, errors: Vec<ErrorCount>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_approximated(mut self, fields: Vec<String>) -> Self {
        self.approximated = fields;
        self
    }

    pub fn is_approximated(&self, field: &str) -> bool {
        self.approximated.iter().any(|f| f == field)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
