//! # gralloc
//!
//! A graphics buffer allocator: producers describe an image buffer, the
//! allocator backs it with DMA-BUF heap memory, and every process that
//! receives the buffer's fds can import it, lock it for CPU access and read
//! or write its metadata.
//!
//! ## Features
//!
//! - **Heap selection**: usage bits pick a DMA-BUF heap from a fixed table
//! - **Batch allocation**: `count` identical buffers, all-or-nothing
//! - **Shared metadata**: settable attributes live in a per-buffer fd
//!   every importer maps
//! - **Fd-passing handles**: rkyv header plus fds over `SCM_RIGHTS`
//! - **memfd fallback**: the same contract on hosts without DMA heaps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gralloc::prelude::*;
//!
//! let gralloc = Gralloc::with_memfd(GrallocConfig::default())?;
//! let info = BufferDescriptorInfo {
//!     name: "preview".into(),
//!     width: 1920,
//!     height: 1080,
//!     layer_count: 1,
//!     format: PixelFormat::RGBA_8888,
//!     usage: BufferUsage::CPU_WRITE_OFTEN | BufferUsage::GPU_TEXTURE,
//!     reserved_size: 0,
//! };
//!
//! let result = gralloc.allocator().allocate_encoded(&DescriptorCodec::encode(&info)?, 1)?;
//! let buffer = gralloc.mapper().import(&result.buffers[0])?;
//! let region = gralloc
//!     .mapper()
//!     .lock(buffer, BufferUsage::CPU_WRITE_OFTEN, Rect::default(), None)?;
//! // ... write pixels through region.as_ptr() ...
//! gralloc.mapper().unlock(buffer)?;
//! gralloc.mapper().free(buffer)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod allocator;
pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod fence;
pub mod format;
pub mod handle;
pub mod heap;
pub mod mapper;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod registry;
pub mod usage;

use crate::allocator::Allocator;
use crate::config::GrallocConfig;
use crate::diagnostics::DiagnosticsLog;
use crate::format::{FormatCalculator, LinearFormatCalculator};
use crate::heap::{DmaHeapBackend, HeapBackend, MemfdHeapBackend};
use crate::mapper::Mapper;
use crate::registry::BufferRegistry;
use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::Gralloc;
    pub use crate::allocator::{AllocationResult, Allocator};
    pub use crate::config::GrallocConfig;
    pub use crate::descriptor::{BufferDescriptor, BufferDescriptorInfo, DescriptorCodec};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::fence::Fence;
    pub use crate::format::PixelFormat;
    pub use crate::handle::RawBufferHandle;
    pub use crate::mapper::{LockedRegion, Mapper};
    pub use crate::metadata::codec::Rect;
    pub use crate::metadata::{MetadataType, StandardMetadataType};
    pub use crate::registry::BufferRef;
    pub use crate::usage::BufferUsage;
}

pub use error::{Error, ErrorKind, Result};

/// The allocator and mapper services of one process, wired to a shared
/// registry and diagnostics log.
pub struct Gralloc {
    config: GrallocConfig,
    registry: Arc<BufferRegistry>,
    diagnostics: Arc<DiagnosticsLog>,
    allocator: Allocator,
    mapper: Mapper,
}

impl Gralloc {
    /// Build the services over `backend` with the built-in linear layouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadValue`] if `config` is invalid.
    pub fn new(config: GrallocConfig, backend: Arc<dyn HeapBackend>) -> Result<Self> {
        Self::with_calculator(config, backend, Arc::new(LinearFormatCalculator::new()))
    }

    /// Build the services with a custom format calculator.
    pub fn with_calculator(
        config: GrallocConfig,
        backend: Arc<dyn HeapBackend>,
        calculator: Arc<dyn FormatCalculator>,
    ) -> Result<Self> {
        config.validate()?;
        observability::init_metrics();

        let diagnostics = Arc::new(DiagnosticsLog::new(&config)?);
        let registry = Arc::new(BufferRegistry::new());
        let allocator = Allocator::new(
            &config,
            Arc::clone(&backend),
            Arc::clone(&calculator),
            Arc::clone(&diagnostics),
        );
        let mapper = Mapper::new(&config, Arc::clone(&registry), backend, calculator);

        tracing::debug!(capacity = config.diagnostics_capacity, "gralloc services ready");
        Ok(Self {
            config,
            registry,
            diagnostics,
            allocator,
            mapper,
        })
    }

    /// Services backed by the kernel DMA-BUF heaps under
    /// [`GrallocConfig::dma_heap_root`].
    pub fn with_dma_heaps(config: GrallocConfig) -> Result<Self> {
        let backend = Arc::new(DmaHeapBackend::new(config.dma_heap_root.clone()));
        Self::new(config, backend)
    }

    /// Services backed by memfd heap emulation.
    pub fn with_memfd(config: GrallocConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemfdHeapBackend::new()))
    }

    /// Active configuration.
    pub fn config(&self) -> &GrallocConfig {
        &self.config
    }

    /// Allocator service.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Mapper service.
    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Registry of imported buffers.
    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    /// Allocation diagnostics.
    pub fn diagnostics(&self) -> &Arc<DiagnosticsLog> {
        &self.diagnostics
    }

    /// Text dump of recent allocations.
    pub fn dump_debug_info(&self) -> String {
        self.diagnostics.dump()
    }

    /// Release every registered buffer.
    ///
    /// Returns how many were still registered.
    pub fn shutdown(&self) -> usize {
        let leaked = self.registry.clear();
        if leaked > 0 {
            tracing::warn!(count = leaked, "buffers still registered at shutdown");
        }
        leaked
    }
}

impl Drop for Gralloc {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Gralloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gralloc")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}
