//! Buffer usage bits.
//!
//! Usage is a 64-bit set describing who produces and consumes a buffer. Heap
//! selection, cache policy and CPU mapping rules are all driven by it.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A 64-bit set of buffer usage flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferUsage(u64);

impl BufferUsage {
    /// No usage.
    pub const NONE: Self = Self(0);

    /// CPU never reads.
    pub const CPU_READ_NEVER: Self = Self(0);
    /// CPU reads rarely.
    pub const CPU_READ_RARELY: Self = Self(2);
    /// CPU reads often.
    pub const CPU_READ_OFTEN: Self = Self(3);
    /// Mask covering the CPU read field.
    pub const CPU_READ_MASK: Self = Self(0xf);

    /// CPU never writes.
    pub const CPU_WRITE_NEVER: Self = Self(0);
    /// CPU writes rarely.
    pub const CPU_WRITE_RARELY: Self = Self(2 << 4);
    /// CPU writes often.
    pub const CPU_WRITE_OFTEN: Self = Self(3 << 4);
    /// Mask covering the CPU write field.
    pub const CPU_WRITE_MASK: Self = Self(0xf << 4);

    /// Sampled by the GPU.
    pub const GPU_TEXTURE: Self = Self(1 << 8);
    /// Rendered to by the GPU.
    pub const GPU_RENDER_TARGET: Self = Self(1 << 9);
    /// Scanned out by the display as an overlay.
    pub const COMPOSER_OVERLAY: Self = Self(1 << 11);
    /// Client target of the composer.
    pub const COMPOSER_CLIENT_TARGET: Self = Self(1 << 12);
    /// Secure/protected content.
    pub const PROTECTED: Self = Self(1 << 14);
    /// Hardware cursor.
    pub const COMPOSER_CURSOR: Self = Self(1 << 15);
    /// Read by a video encoder.
    pub const VIDEO_ENCODER: Self = Self(1 << 16);
    /// Written by the camera.
    pub const CAMERA_OUTPUT: Self = Self(1 << 17);
    /// Read by the camera.
    pub const CAMERA_INPUT: Self = Self(1 << 18);
    /// Used by RenderScript.
    pub const RENDERSCRIPT: Self = Self(1 << 20);
    /// Written by a video decoder.
    pub const VIDEO_DECODER: Self = Self(1 << 22);
    /// Sensor direct channel.
    pub const SENSOR_DIRECT_DATA: Self = Self(1 << 23);
    /// GPU data (shader storage) buffer.
    pub const GPU_DATA_BUFFER: Self = Self(1 << 24);
    /// GPU cube map.
    pub const GPU_CUBE_MAP: Self = Self(1 << 25);
    /// GPU mipmap chain.
    pub const GPU_MIPMAP_COMPLETE: Self = Self(1 << 26);

    /// Vendor usage bits 28..=31.
    pub const VENDOR_MASK: Self = Self(0xf << 28);
    /// Vendor usage bits 48..=63.
    pub const VENDOR_MASK_HI: Self = Self(0xffff << 48);

    /// Protected buffer that may still be CPU-mapped.
    pub const PRIVATE_NONSECURE: Self = Self(1 << 28);
    /// Written by the TPU.
    pub const TPU_OUTPUT: Self = Self(1 << 29);
    /// Skip zero-filling (no CPU mapping either).
    pub const NOZEROED: Self = Self(1 << 30);
    /// Read by the TPU.
    pub const TPU_INPUT: Self = Self(1 << 31);
    /// Extended per-pixel region-of-interest info attached to the buffer.
    pub const ROIINFO: Self = Self(1 << 52);
    /// Placeholder buffer with no real backing requirements.
    pub const PLACEHOLDER_BUFFER: Self = Self(1 << 60);

    /// Camera write (alias used by heap tables).
    pub const HW_CAMERA_WRITE: Self = Self::CAMERA_OUTPUT;
    /// Camera read (alias used by heap tables).
    pub const HW_CAMERA_READ: Self = Self::CAMERA_INPUT;
    /// Composer (alias used by heap tables).
    pub const HW_COMPOSER: Self = Self::COMPOSER_OVERLAY;
    /// GPU texture (alias used by heap tables).
    pub const HW_TEXTURE: Self = Self::GPU_TEXTURE;
    /// GPU render (alias used by heap tables).
    pub const HW_RENDER: Self = Self::GPU_RENDER_TARGET;

    /// Every bit a structured descriptor may carry.
    pub const VALID_BITS: Self = Self(
        Self::GPU_CUBE_MAP.0
            | Self::GPU_MIPMAP_COMPLETE.0
            | Self::CPU_READ_MASK.0
            | Self::CPU_WRITE_MASK.0
            | Self::GPU_TEXTURE.0
            | Self::GPU_RENDER_TARGET.0
            | Self::COMPOSER_OVERLAY.0
            | Self::COMPOSER_CLIENT_TARGET.0
            | Self::CAMERA_INPUT.0
            | Self::CAMERA_OUTPUT.0
            | Self::PROTECTED.0
            | Self::COMPOSER_CURSOR.0
            | Self::VIDEO_ENCODER.0
            | Self::RENDERSCRIPT.0
            | Self::VIDEO_DECODER.0
            | Self::SENSOR_DIRECT_DATA.0
            | Self::GPU_DATA_BUFFER.0
            | Self::VENDOR_MASK.0
            | Self::VENDOR_MASK_HI.0,
    );

    /// Create from raw bits.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if no bit is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if the CPU read field says "often".
    #[inline]
    pub const fn cpu_read_often(self) -> bool {
        self.0 & Self::CPU_READ_MASK.0 == Self::CPU_READ_OFTEN.0
    }

    /// True if any CPU read is requested.
    #[inline]
    pub const fn cpu_read(self) -> bool {
        self.0 & Self::CPU_READ_MASK.0 != 0
    }

    /// True if any CPU write is requested.
    #[inline]
    pub const fn cpu_write(self) -> bool {
        self.0 & Self::CPU_WRITE_MASK.0 != 0
    }

    /// True if the buffer holds protected content that must not be CPU-mapped.
    #[inline]
    pub const fn forbids_cpu_access(self) -> bool {
        self.intersects(Self(Self::PROTECTED.0 | Self::NOZEROED.0))
            && !self.contains(Self::PRIVATE_NONSECURE)
    }

    /// Bits outside [`Self::VALID_BITS`].
    #[inline]
    pub const fn unknown_bits(self) -> Self {
        Self(self.0 & !Self::VALID_BITS.0)
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferUsage {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for BufferUsage {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for BufferUsage {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl From<u64> for BufferUsage {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferUsage({:#x})", self.0)
    }
}

impl fmt::LowerHex for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_intersects() {
        let usage = BufferUsage::PROTECTED | BufferUsage::CAMERA_OUTPUT;
        assert!(usage.contains(BufferUsage::PROTECTED));
        assert!(!usage.contains(BufferUsage::PROTECTED | BufferUsage::TPU_INPUT));
        assert!(usage.intersects(BufferUsage::PROTECTED | BufferUsage::TPU_INPUT));
        assert!(usage.contains(BufferUsage::NONE));
    }

    #[test]
    fn test_cpu_read_often_is_exact_field_match() {
        assert!(BufferUsage::CPU_READ_OFTEN.cpu_read_often());
        assert!(!BufferUsage::CPU_READ_RARELY.cpu_read_often());
        assert!(BufferUsage::CPU_READ_RARELY.cpu_read());
        assert!(!BufferUsage::CPU_WRITE_OFTEN.cpu_read());
    }

    #[test]
    fn test_protected_cpu_access() {
        assert!(BufferUsage::PROTECTED.forbids_cpu_access());
        assert!(!(BufferUsage::PROTECTED | BufferUsage::PRIVATE_NONSECURE).forbids_cpu_access());
        assert!(!BufferUsage::CPU_READ_OFTEN.forbids_cpu_access());
    }

    #[test]
    fn test_unknown_bits() {
        assert!(BufferUsage::GPU_TEXTURE.unknown_bits().is_empty());
        let stray = BufferUsage::from_bits(1 << 40);
        assert_eq!(stray.unknown_bits(), stray);
    }
}
