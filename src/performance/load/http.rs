//! HTTP load adapter
//!
//! Drives an HTTP load generator (autocannon by default) and normalizes its
//! report into a [`LoadTestResult`]. All handling of fields the generator
//! may omit happens in [`normalize`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::process::ToolInvocation;
use super::result::{
    DriverKind, ErrorCount, LoadTestResult, RequestCounts, ResourceUsage, ResponseTimeSummary,
};
use crate::performance::error::{HarnessError, Result};
use crate::performance::memory::{MemorySource, ProcessMemory};
use crate::performance::stats;

/// Load profile for one HTTP run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpLoadConfig {
    pub url: String,
    pub connections: u32,
    /// Seconds
    pub duration: u64,
    #[serde(default)]
    pub pipelining: Option<u32>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Abort the run after this many errors
    #[serde(default)]
    pub bailout: Option<u64>,
    #[serde(default)]
    pub max_connection_requests: Option<u64>,
    #[serde(default)]
    pub max_overall_requests: Option<u64>,
}

impl HttpLoadConfig {
    pub fn new(url: impl Into<String>, connections: u32, duration: u64) -> Self {
        Self {
            url: url.into(),
            connections,
            duration,
            pipelining: None,
            headers: BTreeMap::new(),
            body: None,
            method: None,
            timeout: None,
            bailout: None,
            max_connection_requests: None,
            max_overall_requests: None,
        }
    }
}

/// Latency (ms) or request-rate histogram as autocannon reports it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutocannonHistogram {
    pub average: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    #[serde(rename = "p97_5")]
    pub p97_5: Option<f64>,
    pub p99: Option<f64>,
    #[serde(rename = "p99_9")]
    pub p99_9: Option<f64>,
    pub total: Option<u64>,
    pub sent: Option<u64>,
}

/// Raw autocannon `--json` report. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutocannonOutput {
    #[serde(default)]
    pub latency: AutocannonHistogram,
    #[serde(default)]
    pub requests: AutocannonHistogram,
    pub duration: Option<f64>,
    pub connections: Option<u32>,
    pub errors: Option<u64>,
    pub timeouts: Option<u64>,
    pub non2xx: Option<u64>,
}

impl AutocannonOutput {
    pub fn parse(raw: &str, origin: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| HarnessError::ResultParse {
            origin: origin.to_string(),
            message: e.to_string(),
        })
    }
}

/// Source of raw HTTP load reports
#[async_trait]
pub trait HttpLoadGenerator: Send + Sync {
    async fn generate(&self, config: &HttpLoadConfig) -> Result<AutocannonOutput>;
}

/// Runs the `autocannon` CLI with `--json`
#[derive(Debug, Clone)]
pub struct AutocannonCli {
    pub program: PathBuf,
    /// Added on top of the configured run duration before the process is killed
    pub timeout_slack: Duration,
}

impl Default for AutocannonCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("autocannon"),
            timeout_slack: Duration::from_secs(30),
        }
    }
}

impl AutocannonCli {
    pub fn invocation(&self, config: &HttpLoadConfig) -> ToolInvocation {
        let timeout = Duration::from_secs(config.duration) + self.timeout_slack;
        let mut inv = ToolInvocation::new("autocannon", &self.program, timeout)
            .arg("--json")
            .arg("--connections")
            .arg(config.connections.to_string())
            .arg("--duration")
            .arg(config.duration.to_string())
            .opt_arg("--pipelining", config.pipelining)
            .opt_arg("--method", config.method.as_ref())
            .opt_arg("--body", config.body.as_ref())
            .opt_arg("--timeout", config.timeout)
            .opt_arg("--bailout", config.bailout)
            .opt_arg("--maxConnectionRequests", config.max_connection_requests)
            .opt_arg("--maxOverallRequests", config.max_overall_requests);
        for (name, value) in &config.headers {
            inv = inv.arg("--headers").arg(format!("{}={}", name, value));
        }
        inv.arg(&config.url)
    }
}

#[async_trait]
impl HttpLoadGenerator for AutocannonCli {
    async fn generate(&self, config: &HttpLoadConfig) -> Result<AutocannonOutput> {
        let output = self.invocation(config).run().await?;
        AutocannonOutput::parse(&output.stdout, "autocannon stdout")
    }
}

pub struct HttpAdapter<G = AutocannonCli, M = ProcessMemory> {
    generator: G,
    memory: M,
}

impl HttpAdapter<AutocannonCli, ProcessMemory> {
    pub fn new() -> Self {
        Self::with_generator(AutocannonCli::default())
    }
}

impl Default for HttpAdapter<AutocannonCli, ProcessMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: HttpLoadGenerator> HttpAdapter<G, ProcessMemory> {
    pub fn with_generator(generator: G) -> Self {
        Self {
            generator,
            memory: ProcessMemory,
        }
    }
}

impl<G: HttpLoadGenerator, M: MemorySource> HttpAdapter<G, M> {
    pub fn with_memory<M2: MemorySource>(self, memory: M2) -> HttpAdapter<G, M2> {
        HttpAdapter {
            generator: self.generator,
            memory,
        }
    }

    /// Run one load test. Generator failures are returned, never papered over.
    pub async fn run(&self, scenario: &str, config: &HttpLoadConfig) -> Result<LoadTestResult> {
        tracing::info!(
            scenario,
            url = %config.url,
            connections = config.connections,
            duration_secs = config.duration,
            "starting HTTP load test"
        );

        self.memory.reset_peak();
        let memory_start = self.memory.snapshot();
        let raw = self.generator.generate(config).await?;
        let memory_end = self.memory.snapshot();
        let usage =
            ResourceUsage::from_snapshots(&memory_start, &memory_end, self.memory.peak_heap());

        let result = normalize(scenario, config, &raw, usage);
        tracing::info!(
            scenario,
            total = result.total_requests,
            failed = result.failed_requests,
            throughput = result.throughput,
            p95_ms = result.response_time.p95,
            "HTTP load test complete"
        );
        Ok(result)
    }
}

/// Map an autocannon report onto [`LoadTestResult`].
///
/// `requests.total` and `errors` map 1:1 onto total and failed requests.
/// Timeouts and non-2xx responses are reported in the error breakdown only.
pub fn normalize(
    scenario: &str,
    config: &HttpLoadConfig,
    raw: &AutocannonOutput,
    resource_usage: ResourceUsage,
) -> LoadTestResult {
    let total = raw.requests.total.or(raw.requests.sent).unwrap_or(0);
    let failed = raw.errors.unwrap_or(0).min(total);

    let duration = raw.duration.unwrap_or(config.duration as f64);
    let throughput = raw
        .requests
        .average
        .or(raw.requests.mean)
        .unwrap_or_else(|| stats::throughput(total, duration));

    let mut approximated = Vec::new();
    let lat = &raw.latency;
    let p50 = lat.p50.unwrap_or(0.0);
    let p99 = lat.p99.unwrap_or(0.0);

    let mut pick = |field: &str, measured: Option<f64>, fallback: f64| match measured {
        Some(v) => v,
        None => {
            approximated.push(field.to_string());
            fallback
        }
    };
    let p75 = pick("p75", lat.p75, p50);
    let p90 = pick("p90", lat.p90, lat.p97_5.unwrap_or(p99));
    let p95 = pick("p95", lat.p95, lat.p97_5.unwrap_or(p99));
    let p999 = pick("p999", lat.p99_9, p99);

    let response_time = ResponseTimeSummary {
        min: lat.min.unwrap_or(0.0),
        mean: lat.mean.or(lat.average).unwrap_or(0.0),
        p50,
        p75,
        p90,
        p95,
        p99,
        p999,
        max: lat.max.unwrap_or(0.0),
    };

    let mut error_counts = Vec::new();
    for (kind, count) in [
        ("errors", raw.errors),
        ("timeouts", raw.timeouts),
        ("non2xx", raw.non2xx),
    ] {
        if let Some(count) = count.filter(|&c| c > 0) {
            error_counts.push(ErrorCount {
                kind: kind.to_string(),
                count,
            });
        }
    }

    LoadTestResult::new(
        scenario,
        DriverKind::Http,
        raw.connections.unwrap_or(config.connections),
        duration,
        RequestCounts { total, failed },
        throughput,
        response_time,
        resource_usage,
    )
    .with_errors(error_counts)
    .with_approximated(approximated)
}
