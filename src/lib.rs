//! perf-harness
//!
//! Benchmark, load-test and capacity tooling for backend services.
//! Everything lives under [`performance`]; the binary is a thin CLI over it.

pub mod performance;

pub use performance::{HarnessConfig, HarnessError, Result};
