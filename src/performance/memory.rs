//! Memory sampling
//!
//! Heap snapshots come from a [`MemorySource`]. The default
//! [`ProcessMemory`] combines sysinfo process stats with the accounting
//! allocator counters when that allocator is installed. Snapshots describe
//! this process only, never the system under test.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::allocator;

/// Point-in-time memory reading (bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Live heap bytes (accounting allocator), or resident set size without it
    pub heap_used: u64,
    /// Resident set size of the process
    pub heap_total: u64,
    /// Mapped but non-resident virtual memory
    pub external: u64,
}

impl MemorySnapshot {
    pub fn delta_since(&self, before: &MemorySnapshot) -> MemoryDelta {
        MemoryDelta {
            heap_used: signed_diff(self.heap_used, before.heap_used),
            heap_total: signed_diff(self.heap_total, before.heap_total),
            external: signed_diff(self.external, before.external),
        }
    }
}

/// Signed change between two snapshots; negative when memory was released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDelta {
    pub heap_used: i64,
    pub heap_total: i64,
    pub external: i64,
}

fn signed_diff(after: u64, before: u64) -> i64 {
    after as i64 - before as i64
}

/// Anything that can report the current memory usage
pub trait MemorySource: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;

    /// Restart peak tracking. A no-op for sources without one.
    fn reset_peak(&self) {}

    /// Highest heap usage since the last [`reset_peak`](Self::reset_peak),
    /// when the source tracks one
    fn peak_heap(&self) -> Option<u64> {
        None
    }
}

/// Memory usage of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl MemorySource for ProcessMemory {
    fn snapshot(&self) -> MemorySnapshot {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        // Creating a System is expensive; keep one around
        static CACHED_SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();
        let mut sys = CACHED_SYSTEM.get_or_init(|| Mutex::new(System::new())).lock();

        let pid = Pid::from_u32(std::process::id());
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );

        let (resident, virtual_mem) = sys
            .process(pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or((0, 0));

        let heap_used = allocator::heap_counters()
            .map(|c| c.live_bytes as u64)
            .unwrap_or(resident);

        MemorySnapshot {
            heap_used,
            heap_total: resident,
            external: virtual_mem.saturating_sub(resident),
        }
    }

    fn reset_peak(&self) {
        allocator::reset_peak();
    }

    fn peak_heap(&self) -> Option<u64> {
        allocator::heap_counters().map(|c| c.peak_bytes as u64)
    }
}

/// Capability to ask the runtime to give memory back.
///
/// Hints are best effort. Implementations that cannot do anything must be
/// silent no-ops rather than errors.
pub trait GcHinter: Send + Sync {
    fn hint(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGcHinter;

impl GcHinter for NoopGcHinter {
    fn hint(&self) {}
}

/// Returns freed heap pages to the OS via glibc `malloc_trim`
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MallocTrimHinter;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
impl GcHinter for MallocTrimHinter {
    fn hint(&self) {
        // SAFETY: malloc_trim only walks allocator-internal free lists.
        unsafe {
            libc::malloc_trim(0);
        }
    }
}

/// Best hinter available on this platform
pub fn platform_gc_hinter() -> Box<dyn GcHinter> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        Box::new(MallocTrimHinter)
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        Box::new(NoopGcHinter)
    }
}

/// Helper to format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn bytes_to_mb(bytes: f64) -> f64 {
    bytes / (1024.0 * 1024.0)
}
