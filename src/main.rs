//! perf-harness CLI
//!
//! Runs load tests through the external drivers, analyzes capacity across
//! saved runs, and manages benchmark baselines. Reports go to stdout, logs
//! to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use perf_harness::performance::{
    compute_stats, generate_capacity_report, generate_load_test_report, generate_regression_report,
    has_regressions, BaselineStore, BenchmarkCollector, BenchmarkResult, CapacityAnalyzer,
    HarnessConfig, HeapAccountingAllocator, HttpAdapter, HttpLoadConfig, LoadTestResult,
    VirtualUserAdapter, VirtualUserConfig,
};

#[global_allocator]
static ALLOC: HeapAccountingAllocator = HeapAccountingAllocator::new();

#[derive(Parser, Debug)]
#[command(name = "perf-harness")]
#[command(about = "Benchmark baselines, load tests and capacity analysis")]
struct Cli {
    /// Harness config file (TOML)
    #[arg(long, global = true, env = "PERF_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an HTTP load test with autocannon
    Http {
        #[arg(long)]
        url: String,

        #[arg(short, long, default_value = "10")]
        connections: u32,

        /// Seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,

        #[arg(long)]
        scenario: Option<String>,

        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        body: Option<String>,

        /// Request header as `name=value`; repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Write the result JSON here
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Run a virtual-user (HTTP/WebSocket) scenario with artillery
    Vu {
        /// Scenario file passed to the runner
        scenario_file: PathBuf,

        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        scenario: Option<String>,

        /// Concurrency level this run represents
        #[arg(long)]
        concurrency: Option<u32>,

        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Analyze capacity across saved load-test result files
    Capacity {
        #[arg(required = true)]
        results: Vec<PathBuf>,

        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Overwrite a category's baseline from benchmark results
    SaveBaseline {
        #[arg(long)]
        category: String,

        /// JSON file: benchmark results, or a map of name to sample times (ms)
        results: PathBuf,
    },

    /// Compare benchmark results with the stored baseline; exits 1 on regression
    Compare {
        #[arg(long)]
        category: String,

        results: PathBuf,

        /// Overrides `baseline.regression_threshold`
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

/// Accepted shapes for benchmark input files
#[derive(Deserialize)]
#[serde(untagged)]
enum BenchmarkInput {
    Results(Vec<BenchmarkResult>),
    Samples(BTreeMap<String, Vec<f64>>),
}

fn read_benchmarks(path: &Path) -> Result<Vec<BenchmarkResult>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read benchmark results: {:?}", path))?;
    let input: BenchmarkInput = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse benchmark results: {:?}", path))?;
    match input {
        BenchmarkInput::Results(results) => Ok(results),
        BenchmarkInput::Samples(samples) => samples
            .iter()
            .map(|(name, times)| {
                compute_stats(name, times).with_context(|| format!("benchmark '{}'", name))
            })
            .collect(),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!(path = %path.display(), "wrote JSON");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    ALLOC.install();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => HarnessConfig::from_env(),
    };

    match cli.command {
        Commands::Http {
            url,
            connections,
            duration,
            scenario,
            method,
            body,
            headers,
            json,
        } => {
            let mut load = HttpLoadConfig::new(&url, connections, duration);
            load.method = method;
            load.body = body;
            load.headers = headers.into_iter().collect();

            let scenario = scenario.unwrap_or_else(|| url.clone());
            let result = HttpAdapter::with_generator(config.http.generator())
                .run(&scenario, &load)
                .await?;
            emit_load_result(&result, json.as_deref())?;
        }
        Commands::Vu {
            scenario_file,
            target,
            scenario,
            concurrency,
            json,
        } => {
            let mut vu = VirtualUserConfig::new(&scenario_file);
            vu.target = target;
            vu.concurrency = concurrency;

            let scenario = scenario.unwrap_or_else(|| scenario_file.display().to_string());
            let result = VirtualUserAdapter::with_runner(config.virtual_user.runner())
                .run(&scenario, &vu)
                .await?;
            emit_load_result(&result, json.as_deref())?;
        }
        Commands::Capacity { results, json } => {
            let mut runs = Vec::with_capacity(results.len());
            for path in &results {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read load test result: {:?}", path))?;
                let run: LoadTestResult = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse load test result: {:?}", path))?;
                runs.push(run);
            }

            let report = CapacityAnalyzer::new(config.capacity.clone()).analyze(&runs)?;
            println!("{}", generate_capacity_report(&report));
            if let Some(path) = json {
                report
                    .write_json(&path)
                    .with_context(|| format!("Failed to write capacity report: {:?}", path))?;
            }
        }
        Commands::SaveBaseline { category, results } => {
            let benchmarks = read_benchmarks(&results)?;
            if benchmarks.is_empty() {
                bail!("no benchmarks in {:?}", results);
            }
            let mut collector = BenchmarkCollector::new(&category);
            for benchmark in benchmarks {
                collector.add(benchmark);
            }
            print!("{}", collector.display());

            let store = BaselineStore::new(&config.baseline.directory);
            let saved = store.save(&category, collector.results())?;
            println!(
                "Saved {} benchmarks to {:?}",
                saved.benchmarks.len(),
                store.path_for(&category)?
            );
        }
        Commands::Compare {
            category,
            results,
            threshold,
            json,
        } => {
            let benchmarks = read_benchmarks(&results)?;
            let threshold = threshold.unwrap_or(config.baseline.regression_threshold);
            let store = BaselineStore::new(&config.baseline.directory);

            let comparisons = store.compare(&category, &benchmarks, threshold);
            println!("{}", generate_regression_report(&comparisons));
            if let Some(path) = json {
                write_json(&path, &comparisons)?;
            }
            if has_regressions(&comparisons) {
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn emit_load_result(result: &LoadTestResult, json: Option<&Path>) -> Result<()> {
    println!("{}", generate_load_test_report(result));
    if let Some(path) = json {
        write_json(path, result)?;
    }
    Ok(())
}
