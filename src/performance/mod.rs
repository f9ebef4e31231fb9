//! Performance Measurement Module
//!
//! Benchmarking and load-testing harness:
//! - Timing and memory probes around single operations
//! - Repeated benchmarks reduced to percentile statistics
//! - HTTP and virtual-user load tests driven through external tools
//! - Capacity analysis across concurrency levels
//! - Baselines on disk and p95 regression detection
//! - Memory-leak tracking over many iterations
//!
//! Integrates with:
//! - tracing ecosystem for structured logging
//! - Custom allocator tracking for live heap readings

pub mod allocator;
pub mod baseline;
pub mod benchmark;
pub mod capacity;
pub mod config;
pub mod error;
pub mod leak;
pub mod load;
pub mod memory;
pub mod probe;
pub mod regression;
pub mod report;
pub mod stats;

pub use allocator::{heap_counters, HeapAccountingAllocator, HeapCounters};
pub use baseline::{BaselineData, BaselineEntry, BaselineEnvironment, BaselineStore};
pub use benchmark::{run_benchmark, Benchmark, BenchmarkCollector, BenchmarkOptions};
pub use capacity::{
    analyze_capacity_limits, Bottleneck, BottleneckComponent, CapacityAnalyzer, CapacityLimits,
    CapacityReport, CapacityThresholds, LoadSnapshot,
};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use leak::{track_memory_usage, track_memory_usage_async, MemoryTracker, MemoryTrackingResult};
pub use load::{
    DriverKind, HttpAdapter, HttpLoadConfig, LoadTestResult, VirtualUserAdapter, VirtualUserConfig,
};
pub use memory::{GcHinter, MemorySnapshot, MemorySource, ProcessMemory};
pub use probe::PerformanceTimer;
pub use regression::{detect_regression, has_regressions, RegressionResult, DEFAULT_REGRESSION_THRESHOLD};
pub use report::{generate_capacity_report, generate_load_test_report, generate_regression_report};
pub use stats::{compute_stats, BenchmarkResult};
