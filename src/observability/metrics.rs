//! Metrics collection using metrics-rs.

use crate::error::ErrorKind;
use metrics::{Counter, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_ALLOCATED: &str = "gralloc_buffers_allocated";
const BYTES_ALLOCATED: &str = "gralloc_bytes_allocated";
const ALLOCATION_FAILURES: &str = "gralloc_allocation_failures";
const ALLOCATION_TIME_NS: &str = "gralloc_allocation_time_ns";
const BUFFERS_IMPORTED: &str = "gralloc_buffers_imported";
const BUFFERS_FREED: &str = "gralloc_buffers_freed";
const REGISTERED_BUFFERS: &str = "gralloc_registered_buffers";
const DIAGNOSTICS_SKIPPED: &str = "gralloc_diagnostics_skipped";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_ALLOCATED,
        Unit::Count,
        "Total number of buffers allocated"
    );
    metrics::describe_counter!(
        BYTES_ALLOCATED,
        Unit::Bytes,
        "Total memory-fd bytes allocated"
    );
    metrics::describe_counter!(
        ALLOCATION_FAILURES,
        Unit::Count,
        "Failed allocate calls, labelled by error kind"
    );
    metrics::describe_histogram!(
        ALLOCATION_TIME_NS,
        Unit::Nanoseconds,
        "Time to allocate one buffer, planes and attribute region"
    );
    metrics::describe_counter!(
        BUFFERS_IMPORTED,
        Unit::Count,
        "Total number of successful imports"
    );
    metrics::describe_counter!(BUFFERS_FREED, Unit::Count, "Total number of buffers torn down");
    metrics::describe_gauge!(
        REGISTERED_BUFFERS,
        Unit::Count,
        "Buffers currently held by the registry"
    );
    metrics::describe_counter!(
        DIAGNOSTICS_SKIPPED,
        Unit::Count,
        "Diagnostics entries dropped because the log was busy"
    );
}

/// Record a failed allocate call.
#[inline]
pub fn record_allocation_failure(kind: ErrorKind) {
    counter!(ALLOCATION_FAILURES, "kind" => format!("{kind:?}")).increment(1);
}

/// Record a successful import.
#[inline]
pub fn record_buffer_imported() {
    counter!(BUFFERS_IMPORTED).increment(1);
}

/// Record a buffer torn down by the registry.
#[inline]
pub fn record_buffer_freed() {
    counter!(BUFFERS_FREED).increment(1);
}

/// Record the number of registered buffers.
#[inline]
pub fn record_registered_buffers(count: usize) {
    gauge!(REGISTERED_BUFFERS).set(count as f64);
}

/// Record a diagnostics entry that was skipped.
#[inline]
pub fn record_diagnostics_skipped() {
    counter!(DIAGNOSTICS_SKIPPED).increment(1);
}

/// Allocation metrics labelled by heap.
#[derive(Clone)]
pub struct AllocationMetrics {
    heap: String,
    buffers: Counter,
    bytes: Counter,
    time: Histogram,
}

impl AllocationMetrics {
    /// Create a collector for allocations from `heap`.
    pub fn new(heap: &str) -> Self {
        Self {
            heap: heap.to_string(),
            buffers: counter!(BUFFERS_ALLOCATED, "heap" => heap.to_string()),
            bytes: counter!(BYTES_ALLOCATED, "heap" => heap.to_string()),
            time: histogram!(ALLOCATION_TIME_NS, "heap" => heap.to_string()),
        }
    }

    /// Record one allocated buffer of `bytes` bytes.
    #[inline]
    pub fn record_buffer(&self, bytes: u64) {
        self.buffers.increment(1);
        self.bytes.increment(bytes);
    }

    /// Record allocation time.
    #[inline]
    pub fn record_time(&self, duration: Duration) {
        self.time.record(duration.as_nanos() as f64);
    }

    /// Start a timer and return a guard that records on drop.
    pub fn start_timer(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            metrics: self,
        }
    }

    /// Get the heap name.
    pub fn heap(&self) -> &str {
        &self.heap
    }
}

/// Guard that records allocation time when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    metrics: &'a AllocationMetrics,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_time(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // Idempotent
        init_metrics();
    }

    #[test]
    fn test_allocation_metrics() {
        let metrics = AllocationMetrics::new("system");
        metrics.record_buffer(4096);
        {
            let _timer = metrics.start_timer();
        }
        assert_eq!(metrics.heap(), "system");
    }

    #[test]
    fn test_global_recording_functions() {
        // No recorder installed; these must not panic.
        record_allocation_failure(ErrorKind::NoResources);
        record_buffer_imported();
        record_buffer_freed();
        record_registered_buffers(3);
        record_diagnostics_skipped();
    }
}
