//! Allocation diagnostics log.
//!
//! A fixed ring of slots records every successful allocation. Appends take a
//! shared lock and claim a slot with an atomic counter, so concurrent appends
//! never contend on the same slot lock unless the ring has wrapped. The dump
//! takes the lock exclusively to see a stable table.
//!
//! Both sides wait a bounded time: an append that cannot get the lock is
//! dropped, and a dump that cannot get it returns an empty string.

use crate::config::GrallocConfig;
use crate::error::{Error, Result};
use crate::observability::record_diagnostics_skipped;
use crate::usage::BufferUsage;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ============================================================================
// Entry
// ============================================================================

/// One allocation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsEntry {
    /// Buffer identity.
    pub buffer_id: u64,
    /// Inode of each fd, attribute fd last.
    pub inodes: SmallVec<[u64; 4]>,
    /// Requested pixel format.
    pub format: u32,
    /// Producer usage.
    pub usage: BufferUsage,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Debug name.
    pub name: String,
}

impl DiagnosticsEntry {
    fn write_line(&self, out: &mut String) {
        let _ = write!(out, "buffer_id: {}, inodes: ", self.buffer_id);
        for (i, inode) in self.inodes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{inode}");
        }
        let _ = writeln!(
            out,
            ", format: {:#x}, usage: {:#x}, width: {}, height: {}, name: {}",
            self.format,
            self.usage.bits(),
            self.width,
            self.height,
            self.name
        );
    }
}

// ============================================================================
// Ring
// ============================================================================

/// Bounded ring of the most recent allocations.
pub struct DiagnosticsLog {
    slots: Box<[Mutex<Option<DiagnosticsEntry>>]>,
    mask: u64,
    next: AtomicU64,
    table: RwLock<()>,
    append_timeout: Duration,
    dump_timeout: Duration,
}

impl DiagnosticsLog {
    /// Create a log sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadValue`] if the capacity is not a power of two.
    pub fn new(config: &GrallocConfig) -> Result<Self> {
        let capacity = config.diagnostics_capacity;
        if !capacity.is_power_of_two() {
            return Err(Error::BadValue(format!(
                "diagnostics capacity must be a power of two, got {capacity}"
            )));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            mask: capacity as u64 - 1,
            next: AtomicU64::new(0),
            table: RwLock::new(()),
            append_timeout: config.append_timeout,
            dump_timeout: config.dump_timeout,
        })
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total entries ever recorded, including overwritten ones.
    #[inline]
    pub fn total(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Record an entry, or drop it if the log is busy.
    ///
    /// Returns whether the entry was recorded.
    pub fn append(&self, entry: DiagnosticsEntry) -> bool {
        let Some(_shared) = self.table.try_read_for(self.append_timeout) else {
            tracing::trace!(buffer_id = entry.buffer_id, "diagnostics log busy, entry dropped");
            record_diagnostics_skipped();
            return false;
        };
        let index = self.next.fetch_add(1, Ordering::AcqRel) & self.mask;
        *self.slots[index as usize].lock() = Some(entry);
        true
    }

    /// Text dump, one line per retained entry, oldest first.
    ///
    /// Returns an empty string if the log stays busy past the dump timeout.
    pub fn dump(&self) -> String {
        let Some(_exclusive) = self.table.try_write_for(self.dump_timeout) else {
            tracing::warn!(timeout = ?self.dump_timeout, "diagnostics dump timed out");
            return String::new();
        };

        let total = self.next.load(Ordering::Acquire);
        let retained = total.min(self.slots.len() as u64);
        let mut out = String::new();
        for seq in (total - retained)..total {
            if let Some(entry) = self.slots[(seq & self.mask) as usize].lock().as_ref() {
                entry.write_line(&mut out);
            }
        }
        out
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticsEntry> {
        let _exclusive = self.table.write();
        let total = self.next.load(Ordering::Acquire);
        let retained = total.min(self.slots.len() as u64);
        ((total - retained)..total)
            .filter_map(|seq| self.slots[(seq & self.mask) as usize].lock().clone())
            .collect()
    }
}

impl std::fmt::Debug for DiagnosticsLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsLog")
            .field("capacity", &self.slots.len())
            .field("total", &self.total())
            .finish()
    }
}
