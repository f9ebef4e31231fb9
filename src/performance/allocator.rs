//! Heap-accounting global allocator
//!
//! Wraps the system allocator and keeps live/peak byte counters so the
//! memory probe can report true heap usage instead of process RSS.
//! Binaries opt in by registering it and calling [`HeapAccountingAllocator::install`]
//! at startup:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: perf_harness::performance::allocator::HeapAccountingAllocator =
//!     perf_harness::performance::allocator::HeapAccountingAllocator::new();
//!
//! fn main() {
//!     ALLOC.install();
//! }
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_BYTES: AtomicUsize = AtomicUsize::new(0);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

pub struct HeapAccountingAllocator {
    inner: System,
}

impl HeapAccountingAllocator {
    pub const fn new() -> Self {
        Self { inner: System }
    }

    /// Publish the counters to [`heap_counters`]. Only call this on the
    /// static registered with `#[global_allocator]`; counts from any other
    /// instance miss most of the process's allocations.
    pub fn install(&'static self) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
}

impl Default for HeapAccountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn grow(size: usize) {
    let current = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    let mut peak = PEAK_BYTES.load(Ordering::Relaxed);
    while current > peak {
        match PEAK_BYTES.compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(p) => peak = p,
        }
    }
}

#[inline]
fn shrink(size: usize) {
    // fetch_update so a racing reset can never wrap the counter
    let _ = LIVE_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
        Some(live.saturating_sub(size))
    });
}

unsafe impl GlobalAlloc for HeapAccountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
            grow(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        shrink(layout.size());
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            if new_size > old_size {
                grow(new_size - old_size);
            } else {
                shrink(old_size - new_size);
            }
        }
        new_ptr
    }
}

/// Heap counters as seen by [`HeapAccountingAllocator`]
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HeapCounters {
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub allocations: usize,
}

/// Current counters, or `None` when the accounting allocator is not the
/// global allocator of this process.
pub fn heap_counters() -> Option<HeapCounters> {
    INSTALLED.load(Ordering::Relaxed).then(raw_counters)
}

fn raw_counters() -> HeapCounters {
    HeapCounters {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
        peak_bytes: PEAK_BYTES.load(Ordering::Relaxed),
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
    }
}

/// Restart peak tracking from the current live size
pub fn reset_peak() {
    PEAK_BYTES.store(LIVE_BYTES.load(Ordering::Relaxed), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    // This test binary never calls install(), so the public view stays hidden

    #[test]
    fn test_allocator_roundtrip_tracks_live_bytes() {
        let alloc = HeapAccountingAllocator::new();
        let layout = Layout::from_size_align(4096, 8).unwrap();
        unsafe {
            let ptr = alloc.alloc(layout);
            assert!(!ptr.is_null());
            assert!(raw_counters().peak_bytes >= 4096);
            alloc.dealloc(ptr, layout);
        }
    }

    #[test]
    fn test_direct_use_does_not_publish_counters() {
        let alloc = HeapAccountingAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = alloc.alloc(layout);
            alloc.dealloc(ptr, layout);
        }
        assert!(heap_counters().is_none());
    }
}
