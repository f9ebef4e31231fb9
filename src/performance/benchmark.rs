//! Benchmark Harness
//!
//! Warm up, then time each iteration through the probe and reduce the
//! samples with the stats engine. Iterations never overlap: each one runs
//! (or is awaited) to completion before the next starts.

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::memory::{MemorySource, ProcessMemory};
use super::probe::PerformanceTimer;
use super::stats::{compute_stats, BenchmarkResult};

/// Iteration counts for [`run_benchmark`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkOptions {
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_warmup")]
    pub warmup_iterations: usize,
}

fn default_iterations() -> usize {
    10
}
fn default_warmup() -> usize {
    5
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            warmup_iterations: default_warmup(),
        }
    }
}

/// Benchmark runner
pub struct Benchmark<S = ProcessMemory> {
    name: String,
    options: BenchmarkOptions,
    timer: PerformanceTimer<S>,
}

impl Benchmark<ProcessMemory> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_source(name, ProcessMemory)
    }
}

impl<S: MemorySource> Benchmark<S> {
    pub fn with_source(name: impl Into<String>, source: S) -> Self {
        Self {
            name: name.into(),
            options: BenchmarkOptions::default(),
            timer: PerformanceTimer::with_source(source),
        }
    }

    pub fn warmup(mut self, iterations: usize) -> Self {
        self.options.warmup_iterations = iterations;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.options.iterations = iterations;
        self
    }

    pub fn options(mut self, options: BenchmarkOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the benchmark with a closure
    pub fn run<F: FnMut()>(mut self, mut f: F) -> Result<BenchmarkResult> {
        for _ in 0..self.options.warmup_iterations {
            f();
        }

        let mut times = Vec::with_capacity(self.options.iterations);
        for _ in 0..self.options.iterations {
            self.timer.start();
            f();
            times.push(self.timer.end()?.duration);
        }

        tracing::debug!(benchmark = %self.name, samples = times.len(), "benchmark complete");
        compute_stats(&self.name, &times)
    }

    /// Run async benchmark
    pub async fn run_async<F, Fut>(mut self, mut f: F) -> Result<BenchmarkResult>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        for _ in 0..self.options.warmup_iterations {
            f().await;
        }

        let mut times = Vec::with_capacity(self.options.iterations);
        for _ in 0..self.options.iterations {
            self.timer.start();
            f().await;
            times.push(self.timer.end()?.duration);
        }

        tracing::debug!(benchmark = %self.name, samples = times.len(), "async benchmark complete");
        compute_stats(&self.name, &times)
    }
}

/// Run `operation` with the given warmup and measured iteration counts.
///
/// No timeout is applied; a bounded run time is the operation's concern.
pub fn run_benchmark<F: FnMut()>(
    name: &str,
    operation: F,
    options: BenchmarkOptions,
) -> Result<BenchmarkResult> {
    Benchmark::new(name).options(options).run(operation)
}

/// Explicit collector for results produced during a suite.
///
/// Suites push into a collector they own and hand it to the baseline store
/// when they finish.
#[derive(Debug, Default, Clone)]
pub struct BenchmarkCollector {
    pub name: String,
    results: Vec<BenchmarkResult>,
}

impl BenchmarkCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
        }
    }

    /// Add a result, replacing any earlier one with the same name
    pub fn add(&mut self, result: BenchmarkResult) {
        if let Some(existing) = self.results.iter_mut().find(|r| r.name == result.name) {
            *existing = result;
        } else {
            self.results.push(result);
        }
    }

    pub fn get(&self, name: &str) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn results(&self) -> &[BenchmarkResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn display(&self) -> String {
        let mut output = format!("=== {} ===\n\n", self.name);
        for result in &self.results {
            output.push_str(&result.display());
            output.push_str("\n\n");
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::memory::MemorySnapshot;

    struct FixedSource;

    impl MemorySource for FixedSource {
        fn snapshot(&self) -> MemorySnapshot {
            MemorySnapshot::default()
        }
    }

    #[test]
    fn test_benchmark_basic() {
        let mut calls = 0;
        let result = Benchmark::with_source("test_add", FixedSource)
            .warmup(5)
            .iterations(100)
            .run(|| {
                calls += 1;
            })
            .unwrap();

        assert_eq!(result.iterations, 100);
        assert_eq!(result.times.len(), 100);
        assert_eq!(calls, 105);
        assert!(result.min <= result.p50 && result.p99 <= result.max);
    }

    #[test]
    fn test_zero_iterations_is_empty_input() {
        let err = Benchmark::with_source("noop", FixedSource)
            .iterations(0)
            .run(|| {})
            .unwrap_err();
        assert!(matches!(err, crate::performance::HarnessError::EmptyInput { .. }));
    }

    #[test]
    fn test_run_benchmark_defaults() {
        let mut calls = 0;
        let result = run_benchmark("defaults", || calls += 1, BenchmarkOptions::default()).unwrap();
        assert_eq!(result.iterations, 10);
        assert_eq!(calls, 15);
    }

    #[tokio::test]
    async fn test_async_iterations_are_sequential() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let result = Benchmark::with_source("sleep", FixedSource)
            .warmup(1)
            .iterations(5)
            .run_async(|| {
                let in_flight = in_flight.clone();
                let overlap = overlap.clone();
                async move {
                    if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert_eq!(result.iterations, 5);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert!(result.min >= 2.0);
    }

    #[test]
    fn test_collector_replaces_by_name() {
        let mut collector = BenchmarkCollector::new("api-routes");
        collector.add(compute_stats("a", &[1.0]).unwrap());
        collector.add(compute_stats("b", &[2.0]).unwrap());
        collector.add(compute_stats("a", &[3.0]).unwrap());
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.get("a").unwrap().p50, 3.0);
    }

    #[test]
    fn test_collector_display_lists_each_result() {
        let mut collector = BenchmarkCollector::new("db");
        collector.add(compute_stats("query", &[10.0, 20.0]).unwrap());
        collector.add(compute_stats("insert", &[5.0]).unwrap());

        let text = collector.display();
        assert!(text.starts_with("=== db ===\n\n"));
        assert!(text.contains("query: 2 iterations"));
        assert!(text.contains("insert: 1 iterations"));
        assert!(text.find("query").unwrap() < text.find("insert").unwrap());
    }
}
