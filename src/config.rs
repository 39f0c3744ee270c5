//! Allocator configuration and default limits.
//!
//! ```rust,ignore
//! use gralloc::config::GrallocConfig;
//! use std::time::Duration;
//!
//! let config = GrallocConfig::default()
//!     .with_diagnostics_capacity(512)
//!     .with_dump_timeout(Duration::from_millis(20));
//! config.validate()?;
//! ```

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default limits.
///
/// These match what graphics clients expect from the platform allocator and
/// are what [`GrallocConfig::default`] uses.
pub mod defaults {
    use std::time::Duration;

    // =========================================================================
    // Attribute region
    // =========================================================================

    /// Largest reserved region a client may request (8 MiB).
    ///
    /// One byte per pixel at 4K is roughly 7.9 MB, which covers dynamic HDR
    /// payloads, the largest known use of the reserved region.
    pub const MAX_RESERVED_REGION_SIZE: u64 = 8 * 1024 * 1024;

    /// Extra attribute bytes when the region-of-interest usage bit is set.
    pub const ROI_INFO_EXTRA_SIZE: u64 = 32 * 1024;

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Most buffers one allocate call may request.
    pub const MAX_BUFFER_COUNT: u32 = 128;

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Number of recent allocations kept for dumps. Must be a power of two.
    pub const DIAGNOSTICS_CAPACITY: usize = 2048;

    /// How long a dump waits for the diagnostics table before giving up.
    pub const DIAGNOSTICS_DUMP_TIMEOUT: Duration = Duration::from_millis(100);

    /// How long an allocation waits to record its diagnostics entry.
    pub const DIAGNOSTICS_APPEND_TIMEOUT: Duration = Duration::from_millis(1);

    // =========================================================================
    // Handles
    // =========================================================================

    /// Maximum number of memory fds per buffer, excluding the attribute fd.
    pub const MAX_BUFFER_FDS: usize = 3;

    /// Maximum number of planes described per buffer.
    pub const MAX_PLANES: usize = 3;

    /// Directory holding the kernel DMA-BUF heap device nodes.
    pub const DMA_HEAP_ROOT: &str = "/dev/dma_heap";
}

/// Configuration for a [`Gralloc`](crate::Gralloc) service.
#[derive(Debug, Clone)]
pub struct GrallocConfig {
    /// Cap on the client-requested reserved region, in bytes.
    pub max_reserved_region_size: u64,
    /// Bonus attribute bytes for region-of-interest buffers.
    pub roi_info_extra_size: u64,
    /// Cap on the buffer count of one allocate call.
    pub max_buffer_count: u32,
    /// Diagnostics ring capacity (power of two).
    pub diagnostics_capacity: usize,
    /// Bounded wait for the diagnostics dump.
    pub dump_timeout: Duration,
    /// Bounded wait for recording a diagnostics entry.
    pub append_timeout: Duration,
    /// DMA-BUF heap device directory.
    pub dma_heap_root: PathBuf,
}

impl Default for GrallocConfig {
    fn default() -> Self {
        Self {
            max_reserved_region_size: defaults::MAX_RESERVED_REGION_SIZE,
            roi_info_extra_size: defaults::ROI_INFO_EXTRA_SIZE,
            max_buffer_count: defaults::MAX_BUFFER_COUNT,
            diagnostics_capacity: defaults::DIAGNOSTICS_CAPACITY,
            dump_timeout: defaults::DIAGNOSTICS_DUMP_TIMEOUT,
            append_timeout: defaults::DIAGNOSTICS_APPEND_TIMEOUT,
            dma_heap_root: PathBuf::from(defaults::DMA_HEAP_ROOT),
        }
    }
}

impl GrallocConfig {
    /// Set the reserved region cap.
    pub fn with_max_reserved_region_size(mut self, size: u64) -> Self {
        self.max_reserved_region_size = size;
        self
    }

    /// Set the per-call buffer count cap.
    pub fn with_max_buffer_count(mut self, count: u32) -> Self {
        self.max_buffer_count = count;
        self
    }

    /// Set the diagnostics ring capacity.
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Set the diagnostics dump timeout.
    pub fn with_dump_timeout(mut self, timeout: Duration) -> Self {
        self.dump_timeout = timeout;
        self
    }

    /// Set the diagnostics append timeout.
    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    /// Set the DMA-BUF heap directory.
    pub fn with_dma_heap_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dma_heap_root = root.into();
        self
    }

    /// Check the configuration for values the services cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.diagnostics_capacity.is_power_of_two() {
            return Err(Error::BadValue(format!(
                "diagnostics capacity must be a power of two, got {}",
                self.diagnostics_capacity
            )));
        }
        if self.max_buffer_count == 0 {
            return Err(Error::BadValue("buffer count cap must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GrallocConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reserved_region_size, 8 * 1024 * 1024);
        assert_eq!(config.diagnostics_capacity, 2048);
        assert_eq!(config.max_buffer_count, 128);
    }

    #[test]
    fn test_non_power_of_two_capacity_rejected() {
        let config = GrallocConfig::default().with_diagnostics_capacity(1000);
        assert!(matches!(config.validate(), Err(Error::BadValue(_))));
    }

    #[test]
    fn test_zero_buffer_count_cap_rejected() {
        let config = GrallocConfig::default().with_max_buffer_count(0);
        assert!(matches!(config.validate(), Err(Error::BadValue(_))));
    }
}
