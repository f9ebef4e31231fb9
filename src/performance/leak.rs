//! Memory-Leak Tracker
//!
//! Repeats an operation and samples heap usage after every call, hinting
//! the allocator to release memory every `cleanup_every` iterations.

use serde::{Deserialize, Serialize};

use super::error::{HarnessError, Result};
use super::memory::{platform_gc_hinter, GcHinter, MemorySource, ProcessMemory};

/// Heap usage across a tracked run (bytes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrackingResult {
    pub initial_memory: u64,
    pub final_memory: u64,
    pub peak_memory: u64,
    pub average_memory: f64,
    /// `final - initial`; negative when more was reclaimed than retained
    pub memory_increase: i64,
    /// One sample per iteration, in iteration order
    pub samples: Vec<u64>,
}

pub struct MemoryTracker<S = ProcessMemory> {
    source: S,
    hinter: Box<dyn GcHinter>,
    cleanup_every: usize,
}

impl MemoryTracker<ProcessMemory> {
    pub fn new() -> Self {
        Self::with_source(ProcessMemory)
    }
}

impl Default for MemoryTracker<ProcessMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> MemoryTracker<S> {
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            hinter: platform_gc_hinter(),
            cleanup_every: 10,
        }
    }

    pub fn hinter(mut self, hinter: Box<dyn GcHinter>) -> Self {
        self.hinter = hinter;
        self
    }

    /// `0` disables hinting
    pub fn cleanup_every(mut self, every: usize) -> Self {
        self.cleanup_every = every;
        self
    }

    fn hint_due(&self, iteration: usize) -> bool {
        self.cleanup_every > 0 && (iteration + 1) % self.cleanup_every == 0
    }

    pub fn track<F: FnMut()>(&self, iterations: usize, mut operation: F) -> Result<MemoryTrackingResult> {
        let initial = self.source.snapshot().heap_used;
        let mut samples = Vec::with_capacity(iterations);
        for i in 0..iterations {
            operation();
            if self.hint_due(i) {
                self.hinter.hint();
            }
            samples.push(self.source.snapshot().heap_used);
        }
        summarize(initial, samples)
    }

    pub async fn track_async<F, Fut>(&self, iterations: usize, mut operation: F) -> Result<MemoryTrackingResult>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let initial = self.source.snapshot().heap_used;
        let mut samples = Vec::with_capacity(iterations);
        for i in 0..iterations {
            operation().await;
            if self.hint_due(i) {
                self.hinter.hint();
            }
            samples.push(self.source.snapshot().heap_used);
        }
        summarize(initial, samples)
    }
}

fn summarize(initial: u64, samples: Vec<u64>) -> Result<MemoryTrackingResult> {
    let final_memory = *samples
        .last()
        .ok_or_else(|| HarnessError::EmptyInput {
            name: "memory tracking".to_string(),
        })?;
    let peak = samples.iter().copied().max().unwrap_or(final_memory).max(initial);
    let average = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64;

    let result = MemoryTrackingResult {
        initial_memory: initial,
        final_memory,
        peak_memory: peak,
        average_memory: average,
        memory_increase: final_memory as i64 - initial as i64,
        samples,
    };
    tracing::debug!(
        iterations = result.samples.len(),
        increase = result.memory_increase,
        peak = result.peak_memory,
        "memory tracking complete"
    );
    Ok(result)
}

/// Track with the process memory source and the platform hinter
pub fn track_memory_usage<F: FnMut()>(
    iterations: usize,
    operation: F,
    cleanup_every: usize,
) -> Result<MemoryTrackingResult> {
    MemoryTracker::new().cleanup_every(cleanup_every).track(iterations, operation)
}

pub async fn track_memory_usage_async<F, Fut>(
    iterations: usize,
    operation: F,
    cleanup_every: usize,
) -> Result<MemoryTrackingResult>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    MemoryTracker::new()
        .cleanup_every(cleanup_every)
        .track_async(iterations, operation)
        .await
}
