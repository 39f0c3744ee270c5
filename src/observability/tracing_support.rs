//! Tracing integration for structured logging and spans.

use crate::usage::BufferUsage;
use tracing::{Level, Span, span};

/// Create a span for one allocate call.
///
/// # Example
///
/// ```rust,ignore
/// use gralloc::observability::span_allocate;
///
/// let span = span_allocate("camera-preview", 3);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_allocate(name: &str, count: u32) -> Span {
    span!(Level::DEBUG, "allocate", name = %name, count = count)
}

/// Create a span for importing a buffer.
#[inline]
pub fn span_import(buffer_id: u64) -> Span {
    span!(Level::DEBUG, "import", buffer_id = buffer_id)
}

/// Create a span for a CPU lock.
#[inline]
pub fn span_lock(buffer_id: u64, usage: BufferUsage) -> Span {
    span!(Level::TRACE, "lock", buffer_id = buffer_id, usage = ?usage)
}

/// Enter an allocate span and return its guard.
pub fn instrument_allocate(name: &str, count: u32) -> tracing::span::EnteredSpan {
    span_allocate(name, count).entered()
}

/// Enter an import span and return its guard.
pub fn instrument_import(buffer_id: u64) -> tracing::span::EnteredSpan {
    span_import(buffer_id).entered()
}

/// Enter a lock span and return its guard.
pub fn instrument_lock(buffer_id: u64, usage: BufferUsage) -> tracing::span::EnteredSpan {
    span_lock(buffer_id, usage).entered()
}

/// Log the heap picked for a usage.
#[inline]
pub fn trace_heap_selected(usage: BufferUsage, heap: &str, size: u64) {
    tracing::debug!(usage = ?usage, heap = %heap, size = size, "heap selected");
}
