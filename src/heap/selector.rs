//! Usage-to-heap selection.
//!
//! Selection runs in two passes over ordered tables:
//!
//! 1. **Exact**: the usage must equal the entry's bits. Used for the tightly
//!    specified secure heaps.
//! 2. **Subset**: the usage must contain every bit of the entry and none of
//!    its excluded bits. The last entry has no bits and always matches.
//!
//! A target may name a heap directly, list candidates of which the first one
//! present on the system wins, defer to the general-purpose default, or mark
//! the usage as served by no DMA-BUF heap at all.

use super::HeapBackend;
use crate::usage::BufferUsage;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Heap names known to the selector.
pub mod heap_names {
    /// General-purpose cached heap.
    pub const SYSTEM: &str = "system";
    /// General-purpose uncached heap.
    pub const SYSTEM_UNCACHED: &str = "system-uncached";
    /// Face authentication image heap.
    pub const FACEAUTH_IMAGE: &str = "faimg-secure";
    /// Face authentication raw image heap.
    pub const FACEAUTH_RAW_IMAGE: &str = "farawimg-secure";
    /// Face authentication preview heap.
    pub const FACEAUTH_PREVIEW: &str = "faprev-secure";
    /// Face authentication model heap.
    pub const FACEAUTH_MODEL: &str = "famodel-secure";
    /// Face authentication TPU scratch heap.
    pub const FACEAUTH_TPU: &str = "faceauth_tpu-secure";
    /// Secure video frame heap.
    pub const VIDEO_FRAME: &str = "vframe-secure";
    /// Sensor direct channel heap.
    pub const SENSOR_DIRECT: &str = "sensor_direct_heap";
}

/// What a matching table entry resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapTarget {
    /// A fixed heap name.
    Named(&'static str),
    /// First name in the list that exists on the system.
    FirstAvailable(&'static [&'static str]),
    /// The general-purpose heap, cached when the CPU reads often.
    Default,
    /// No DMA-BUF heap serves this usage.
    Unbacked,
}

/// One selection table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSpec {
    /// Bits to match against the usage.
    pub usage: BufferUsage,
    /// Bits that must be absent for a subset match.
    pub excluded: BufferUsage,
    /// Heap chosen on a match.
    pub target: HeapTarget,
}

impl HeapSpec {
    /// Entry matching `usage` with nothing excluded.
    pub const fn new(usage: BufferUsage, target: HeapTarget) -> Self {
        Self {
            usage,
            excluded: BufferUsage::NONE,
            target,
        }
    }

    /// Same entry, but not matching when any of `excluded` is set.
    pub const fn excluding(mut self, excluded: BufferUsage) -> Self {
        self.excluded = excluded;
        self
    }

    fn matches_subset(&self, usage: BufferUsage) -> bool {
        usage.contains(self.usage) && !usage.intersects(self.excluded)
    }
}

const fn spec(usage: u64, target: HeapTarget) -> HeapSpec {
    HeapSpec::new(BufferUsage::from_bits(usage), target)
}

const PROTECTED: u64 = BufferUsage::PROTECTED.bits();
const CAMERA_WRITE: u64 = BufferUsage::HW_CAMERA_WRITE.bits();
const CAMERA_READ: u64 = BufferUsage::HW_CAMERA_READ.bits();
const TPU_INPUT: u64 = BufferUsage::TPU_INPUT.bits();
const TPU_OUTPUT: u64 = BufferUsage::TPU_OUTPUT.bits();

/// Exact-match entries.
pub const EXACT_HEAPS: &[HeapSpec] = &[
    spec(
        PROTECTED | CAMERA_WRITE | TPU_INPUT,
        HeapTarget::Named(heap_names::FACEAUTH_IMAGE),
    ),
    spec(
        PROTECTED | CAMERA_WRITE | CAMERA_READ,
        HeapTarget::Named(heap_names::FACEAUTH_RAW_IMAGE),
    ),
    spec(
        PROTECTED
            | CAMERA_WRITE
            | BufferUsage::HW_COMPOSER.bits()
            | BufferUsage::HW_TEXTURE.bits(),
        HeapTarget::Named(heap_names::FACEAUTH_PREVIEW),
    ),
    spec(
        PROTECTED | TPU_INPUT,
        HeapTarget::Named(heap_names::FACEAUTH_MODEL),
    ),
    spec(
        PROTECTED | TPU_OUTPUT | TPU_INPUT,
        HeapTarget::Named(heap_names::FACEAUTH_TPU),
    ),
];

/// Subset-match entries; the last one always matches.
pub const SUBSET_HEAPS: &[HeapSpec] = &[
    spec(
        PROTECTED | BufferUsage::PRIVATE_NONSECURE.bits(),
        HeapTarget::Default,
    ),
    // Secure video scaler: composer-only protected buffers.
    spec(
        PROTECTED | BufferUsage::HW_COMPOSER.bits(),
        HeapTarget::Unbacked,
    )
    .excluding(BufferUsage::from_bits(
        BufferUsage::HW_TEXTURE.bits() | BufferUsage::HW_RENDER.bits(),
    )),
    spec(
        PROTECTED,
        HeapTarget::FirstAvailable(&[heap_names::VIDEO_FRAME]),
    ),
    spec(
        BufferUsage::SENSOR_DIRECT_DATA.bits(),
        HeapTarget::Named(heap_names::SENSOR_DIRECT),
    ),
    spec(0, HeapTarget::Default),
];

const DEFAULT_UNCACHED: &[&str] = &[heap_names::SYSTEM_UNCACHED, heap_names::SYSTEM];
const DEFAULT_CACHED: &[&str] = &[heap_names::SYSTEM];

/// Picks a heap for a usage.
///
/// Heap availability is read from the backend on first use and cached.
pub struct HeapSelector {
    backend: Arc<dyn HeapBackend>,
    exact: Vec<HeapSpec>,
    subset: Vec<HeapSpec>,
    available: OnceLock<BTreeSet<String>>,
}

impl HeapSelector {
    /// Selector over the built-in tables.
    pub fn new(backend: Arc<dyn HeapBackend>) -> Self {
        Self::with_tables(backend, EXACT_HEAPS.to_vec(), SUBSET_HEAPS.to_vec())
    }

    /// Selector over custom tables.
    pub fn with_tables(
        backend: Arc<dyn HeapBackend>,
        exact: Vec<HeapSpec>,
        subset: Vec<HeapSpec>,
    ) -> Self {
        Self {
            backend,
            exact,
            subset,
            available: OnceLock::new(),
        }
    }

    fn available(&self) -> &BTreeSet<String> {
        self.available.get_or_init(|| {
            let heaps = self.backend.available_heaps();
            tracing::debug!(heaps = ?heaps, "Probed available heaps");
            heaps
        })
    }

    fn first_available(&self, candidates: &[&'static str]) -> Option<&'static str> {
        let available = self.available();
        candidates
            .iter()
            .copied()
            .find(|name| available.contains(*name))
    }

    fn resolve(&self, target: HeapTarget, usage: BufferUsage) -> Option<&'static str> {
        match target {
            HeapTarget::Named(name) => Some(name),
            HeapTarget::FirstAvailable(candidates) => self.first_available(candidates),
            HeapTarget::Unbacked => None,
            HeapTarget::Default => {
                let candidates = if usage.cpu_read_often() {
                    DEFAULT_CACHED
                } else {
                    DEFAULT_UNCACHED
                };
                self.first_available(candidates)
            }
        }
    }

    /// Heap for `usage`, or `None` if no candidate exists on this system or
    /// no heap serves the usage.
    pub fn select_heap(&self, usage: BufferUsage) -> Option<&'static str> {
        let target = self
            .exact
            .iter()
            .find(|spec| spec.usage == usage)
            .or_else(|| self.subset.iter().find(|spec| spec.matches_subset(usage)))
            .map(|spec| spec.target)
            .unwrap_or(HeapTarget::Default);

        let heap = self.resolve(target, usage);
        match heap {
            Some(name) => tracing::trace!(usage = ?usage, heap = name, "Selected heap"),
            None => tracing::warn!(usage = ?usage, target = ?target, "No heap available"),
        }
        heap
    }
}

impl std::fmt::Debug for HeapSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSelector")
            .field("exact", &self.exact.len())
            .field("subset", &self.subset.len())
            .field("available", &self.available.get())
            .finish()
    }
}
