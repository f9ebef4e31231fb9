//! Timer/Memory probe
//!
//! Wraps one unit of work with a wall-clock measurement and a before/after
//! memory snapshot. A single probe is reused across iterations.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::error::{HarnessError, Result};
use super::memory::{MemoryDelta, MemorySnapshot, MemorySource, ProcessMemory};

/// Measurement for one start/end window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Wall-clock duration in milliseconds
    pub duration: f64,
    pub memory_usage: MemoryUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub before: MemorySnapshot,
    pub after: MemorySnapshot,
    pub delta: MemoryDelta,
}

#[derive(Debug)]
pub struct PerformanceTimer<S = ProcessMemory> {
    source: S,
    started: Option<(Instant, MemorySnapshot)>,
}

impl PerformanceTimer<ProcessMemory> {
    pub fn new() -> Self {
        Self::with_source(ProcessMemory)
    }
}

impl Default for PerformanceTimer<ProcessMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> PerformanceTimer<S> {
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            started: None,
        }
    }

    /// Open a measurement window. Calling again restarts the window.
    pub fn start(&mut self) {
        // Snapshot first so sampling cost stays outside the timed region
        let before = self.source.snapshot();
        self.started = Some((Instant::now(), before));
    }

    /// Close the window opened by [`start`](Self::start)
    pub fn end(&mut self) -> Result<PerformanceMetrics> {
        let (started_at, before) = self
            .started
            .take()
            .ok_or(HarnessError::IllegalState("timer end() called before start()"))?;
        let duration = started_at.elapsed().as_secs_f64() * 1000.0;
        let after = self.source.snapshot();

        Ok(PerformanceMetrics {
            duration,
            memory_usage: MemoryUsage {
                before,
                after,
                delta: after.delta_since(&before),
            },
        })
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Grows by 1KB on every snapshot
    struct GrowingSource(AtomicU64);

    impl MemorySource for GrowingSource {
        fn snapshot(&self) -> MemorySnapshot {
            let used = self.0.fetch_add(1024, Ordering::Relaxed) + 1024;
            MemorySnapshot {
                heap_used: used,
                heap_total: used * 2,
                external: 0,
            }
        }
    }

    #[test]
    fn test_end_without_start_fails() {
        let mut timer = PerformanceTimer::with_source(GrowingSource(AtomicU64::new(0)));
        assert!(matches!(timer.end(), Err(HarnessError::IllegalState(_))));
    }

    #[test]
    fn test_measures_duration_and_memory_delta() {
        let mut timer = PerformanceTimer::with_source(GrowingSource(AtomicU64::new(0)));
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        let metrics = timer.end().unwrap();

        assert!(metrics.duration >= 5.0);
        assert_eq!(metrics.memory_usage.delta.heap_used, 1024);
        assert_eq!(metrics.memory_usage.delta.heap_total, 2048);
    }

    #[test]
    fn test_reset_discards_open_window() {
        let mut timer = PerformanceTimer::with_source(GrowingSource(AtomicU64::new(0)));
        timer.start();
        assert!(timer.is_running());
        timer.reset();
        assert!(!timer.is_running());
        assert!(timer.end().is_err());
    }

    #[test]
    fn test_reusable_across_iterations() {
        let mut timer = PerformanceTimer::with_source(GrowingSource(AtomicU64::new(0)));
        for _ in 0..3 {
            timer.start();
            assert!(timer.end().is_ok());
        }
    }
}
