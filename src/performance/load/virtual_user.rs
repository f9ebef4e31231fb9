//! Virtual-user (WebSocket / scenario) load adapter
//!
//! Runs a scenario runner (artillery by default) as a subprocess that writes
//! a JSON report to an explicit output path, then parses that report into a
//! [`LoadTestResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::ToolInvocation;
use super::result::{
    CapacityMetrics, DriverKind, ErrorCount, LoadTestResult, RequestCounts, ResourceUsage,
    ResponseTimeSummary,
};
use crate::performance::error::{HarnessError, Result};
use crate::performance::memory::{MemorySource, ProcessMemory};
use crate::performance::stats;

/// Summaries searched, in order, for the response-time distribution
const RESPONSE_TIME_KEYS: &[&str] = &[
    "http.response_time",
    "socketio.response_time",
    "websocket.response_time",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualUserConfig {
    /// Scenario description file handed to the runner
    pub config_path: PathBuf,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Where the runner writes its report; a temp path when unset
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Concurrency level this run represents; defaults to virtual users created
    #[serde(default)]
    pub concurrency: Option<u32>,
}

impl VirtualUserConfig {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            target: None,
            variables: BTreeMap::new(),
            output_path: None,
            concurrency: None,
        }
    }

    fn resolved_output_path(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!(
                "perf-harness-vu-{}-{}.json",
                std::process::id(),
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ))
        })
    }
}

/// One response-time summary from the runner report (milliseconds)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub p999: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerAggregate {
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub rates: BTreeMap<String, f64>,
    #[serde(default)]
    pub summaries: BTreeMap<String, RunnerSummary>,
    /// Epoch milliseconds
    pub first_counter_at: Option<i64>,
    pub last_counter_at: Option<i64>,
}

/// Raw artillery `--output` report
#[derive(Debug, Clone, Deserialize)]
pub struct ArtilleryReport {
    pub aggregate: RunnerAggregate,
}

impl ArtilleryReport {
    pub fn read(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|e| HarnessError::ResultParse {
            origin: origin.clone(),
            message: format!("cannot read result file: {}", e),
        })?;
        serde_json::from_str(&raw).map_err(|e| HarnessError::ResultParse {
            origin,
            message: e.to_string(),
        })
    }
}

/// Anything that can execute a scenario and leave a report at `output_path`
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(&self, config: &VirtualUserConfig, output_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ArtilleryCli {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl Default for ArtilleryCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("artillery"),
            timeout: Duration::from_secs(900),
        }
    }
}

impl ArtilleryCli {
    pub fn invocation(&self, config: &VirtualUserConfig, output_path: &Path) -> Result<ToolInvocation> {
        let mut inv = ToolInvocation::new("artillery", &self.program, self.timeout)
            .arg("run")
            .arg("--output")
            .arg(output_path)
            .opt_arg("--target", config.target.as_ref());
        if !config.variables.is_empty() {
            let vars = serde_json::to_string(&config.variables)
                .map_err(|e| HarnessError::Config(format!("cannot encode variables: {}", e)))?;
            inv = inv.arg("--variables").arg(vars);
        }
        Ok(inv.arg(&config.config_path))
    }
}

#[async_trait]
impl ScenarioRunner for ArtilleryCli {
    async fn run(&self, config: &VirtualUserConfig, output_path: &Path) -> Result<()> {
        let output = self.invocation(config, output_path)?.run().await?;
        tracing::debug!(stdout = %output.stdout.trim_end(), "artillery output");
        Ok(())
    }
}

pub struct VirtualUserAdapter<R = ArtilleryCli, M = ProcessMemory> {
    runner: R,
    memory: M,
}

impl VirtualUserAdapter<ArtilleryCli, ProcessMemory> {
    pub fn new() -> Self {
        Self::with_runner(ArtilleryCli::default())
    }
}

impl Default for VirtualUserAdapter<ArtilleryCli, ProcessMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ScenarioRunner> VirtualUserAdapter<R, ProcessMemory> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            memory: ProcessMemory,
        }
    }
}

impl<R: ScenarioRunner, M: MemorySource> VirtualUserAdapter<R, M> {
    pub fn with_memory<M2: MemorySource>(self, memory: M2) -> VirtualUserAdapter<R, M2> {
        VirtualUserAdapter {
            runner: self.runner,
            memory,
        }
    }

    pub async fn run(&self, scenario: &str, config: &VirtualUserConfig) -> Result<LoadTestResult> {
        let output_path = config.resolved_output_path();
        // A report left over from an earlier run must never be mistaken for this one
        match std::fs::remove_file(&output_path) {
            Ok(()) => tracing::debug!(path = %output_path.display(), "removed stale report"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            scenario,
            config = %config.config_path.display(),
            output = %output_path.display(),
            "starting virtual-user load test"
        );

        self.memory.reset_peak();
        let memory_start = self.memory.snapshot();
        let ran = self.runner.run(config, &output_path).await;
        let memory_end = self.memory.snapshot();
        let usage =
            ResourceUsage::from_snapshots(&memory_start, &memory_end, self.memory.peak_heap());

        let report = ran.and_then(|()| ArtilleryReport::read(&output_path));
        // Reports at a caller-chosen path are kept; temp reports are not
        if config.output_path.is_none() {
            discard_report(&output_path);
        }
        let report = report?;
        let result = normalize(scenario, config, &report, usage);
        tracing::info!(
            scenario,
            virtual_users = result.total_requests,
            failed = result.failed_requests,
            p95_ms = result.response_time.p95,
            approximated = ?result.approximated,
            "virtual-user load test complete"
        );
        Ok(result)
    }
}

fn discard_report(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed temporary report"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot remove temporary report"),
    }
}

/// Map a runner report onto [`LoadTestResult`].
///
/// Virtual users that were created but neither completed nor failed count
/// as failures. `p75`/`p90` fall back to `median`/`p95` and are listed in
/// `approximated` when that happens.
pub fn normalize(
    scenario: &str,
    config: &VirtualUserConfig,
    report: &ArtilleryReport,
    resource_usage: ResourceUsage,
) -> LoadTestResult {
    let agg = &report.aggregate;
    let counter = |key: &str| agg.counters.get(key).copied().unwrap_or(0);

    let created = counter("vusers.created");
    let completed = counter("vusers.completed");
    let failed_vus = counter("vusers.failed");

    let total = created.max(completed + failed_vus);
    let successful = completed.min(total);
    let incomplete = total - successful - failed_vus.min(total - successful);

    let duration = match (agg.first_counter_at, agg.last_counter_at) {
        (Some(first), Some(last)) if last > first => (last - first) as f64 / 1000.0,
        _ => 0.0,
    };

    let throughput = agg.rates.get("http.request_rate").copied().unwrap_or_else(|| {
        let requests = agg.counters.get("http.requests").copied().unwrap_or(total);
        stats::throughput(requests, duration)
    });

    let mut approximated = Vec::new();
    let summary = RESPONSE_TIME_KEYS
        .iter()
        .find_map(|key| agg.summaries.get(*key))
        .or_else(|| {
            agg.summaries
                .iter()
                .find(|(key, _)| key.ends_with(".response_time"))
                .map(|(_, s)| s)
        });

    let response_time = match summary {
        Some(s) => {
            let median = s.median.or(s.p50).unwrap_or(0.0);
            let p95 = s.p95.unwrap_or(0.0);
            let p99 = s.p99.unwrap_or(0.0);
            let p75 = s.p75.unwrap_or_else(|| {
                approximated.push("p75".to_string());
                median
            });
            let p90 = s.p90.unwrap_or_else(|| {
                approximated.push("p90".to_string());
                p95
            });
            let p999 = s.p999.unwrap_or_else(|| {
                approximated.push("p999".to_string());
                p99
            });
            ResponseTimeSummary {
                min: s.min.unwrap_or(0.0),
                mean: s.mean.unwrap_or(0.0),
                p50: median,
                p75,
                p90,
                p95,
                p99,
                p999,
                max: s.max.unwrap_or(0.0),
            }
        }
        None => {
            tracing::warn!(scenario, "runner report has no response-time summary");
            approximated.push("responseTime".to_string());
            ResponseTimeSummary::default()
        }
    };

    let mut errors: Vec<ErrorCount> = agg
        .counters
        .iter()
        .filter_map(|(key, &count)| {
            key.strip_prefix("errors.").map(|kind| ErrorCount {
                kind: kind.to_string(),
                count,
            })
        })
        .collect();
    if incomplete > 0 {
        errors.push(ErrorCount {
            kind: "vusers.incomplete".to_string(),
            count: incomplete,
        });
    }

    let concurrency = config
        .concurrency
        .unwrap_or_else(|| u32::try_from(created).unwrap_or(u32::MAX));

    LoadTestResult::new(
        scenario,
        DriverKind::VirtualUser,
        concurrency,
        duration,
        RequestCounts {
            total,
            failed: total - successful,
        },
        throughput,
        response_time,
        resource_usage,
    )
    .with_capacity_metrics(CapacityMetrics {
        connections_opened: created,
        connections_completed: completed,
        connections_failed: failed_vus,
    })
    .with_errors(errors)
    .with_approximated(approximated)
}
