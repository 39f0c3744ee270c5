//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `gralloc_buffers_allocated` | Counter | Buffers handed out by the allocator |
//! | `gralloc_bytes_allocated` | Counter | Memory-fd bytes allocated |
//! | `gralloc_allocation_failures` | Counter | Failed allocate calls, by error kind |
//! | `gralloc_allocation_time_ns` | Histogram | Time to allocate one buffer |
//! | `gralloc_buffers_imported` | Counter | Successful imports |
//! | `gralloc_buffers_freed` | Counter | Buffers torn down |
//! | `gralloc_registered_buffers` | Gauge | Buffers currently registered |
//! | `gralloc_diagnostics_skipped` | Counter | Diagnostics entries dropped under contention |
//!
//! ## Tracing
//!
//! Spans are emitted for allocation, import and CPU lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gralloc::observability::init_metrics;
//!
//! // Describe metrics once at startup, then install any metrics exporter.
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    AllocationMetrics, TimerGuard, init_metrics, record_allocation_failure, record_buffer_freed,
    record_buffer_imported, record_diagnostics_skipped, record_registered_buffers,
};
pub use tracing_support::{
    instrument_allocate, instrument_import, instrument_lock, span_allocate, span_import,
    span_lock, trace_heap_selected,
};
