//! Pixel formats and buffer layout derivation.
//!
//! The allocator never computes strides itself. It hands a decoded
//! [`BufferDescriptor`] to a [`FormatCalculator`], which returns the per-fd
//! allocation sizes and the per-plane layout. [`LinearFormatCalculator`] is the
//! built-in implementation for uncompressed, linear layouts.
//!
//! # Design Principles
//!
//! - **Open codes**: [`PixelFormat`] is a newtype, so unknown codes survive a
//!   descriptor round-trip and are only rejected when a layout is derived
//! - **Pure**: derivation has no side effects and can be called before any
//!   heap interaction

use crate::config::defaults::{MAX_BUFFER_FDS, MAX_PLANES};
use crate::descriptor::BufferDescriptor;
use crate::error::{Error, Result};
use crate::usage::BufferUsage;
use smallvec::SmallVec;
use std::fmt;

// ============================================================================
// PixelFormat
// ============================================================================

/// A pixel format code.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// Invalid / unset format.
    pub const UNDEFINED: Self = Self(0);
    /// 32-bit RGBA, 8 bits per channel.
    pub const RGBA_8888: Self = Self(0x1);
    /// 32-bit RGB with unused alpha.
    pub const RGBX_8888: Self = Self(0x2);
    /// 24-bit packed RGB.
    pub const RGB_888: Self = Self(0x3);
    /// 16-bit RGB 5:6:5.
    pub const RGB_565: Self = Self(0x4);
    /// 32-bit BGRA, 8 bits per channel.
    pub const BGRA_8888: Self = Self(0x5);
    /// Semi-planar YCrCb 4:2:0 (NV21).
    pub const YCRCB_420_SP: Self = Self(0x11);
    /// 64-bit RGBA, half float.
    pub const RGBA_FP16: Self = Self(0x16);
    /// 16-bit raw sensor data.
    pub const RAW16: Self = Self(0x20);
    /// Opaque byte blob; width is the size in bytes.
    pub const BLOB: Self = Self(0x21);
    /// Format chosen by the allocator from the usage.
    pub const IMPLEMENTATION_DEFINED: Self = Self(0x22);
    /// Flexible YCbCr 4:2:0 (allocated as NV12).
    pub const YCBCR_420_888: Self = Self(0x23);
    /// 32-bit RGBA 10:10:10:2.
    pub const RGBA_1010102: Self = Self(0x2b);
    /// Semi-planar YCbCr 4:2:0, 10 bits in 16.
    pub const YCBCR_P010: Self = Self(0x36);
    /// Semi-planar YCbCr 4:2:0 with luma and chroma in separate fds.
    pub const YCBCR_420_SP_M: Self = Self(0x105);
    /// 8-bit greyscale.
    pub const Y8: Self = Self(0x2020_3859);
    /// 16-bit greyscale.
    pub const Y16: Self = Self(0x2036_3159);
    /// Planar YCrCb 4:2:0.
    pub const YV12: Self = Self(0x3231_5659);

    /// Raw code.
    #[inline]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match table_entry(*self) {
            Some(info) => write!(f, "{}({:#x})", info.name, self.0),
            None => write!(f, "PixelFormat({:#x})", self.0),
        }
    }
}

// ============================================================================
// Layout types
// ============================================================================

/// Type of a color component within a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ComponentType {
    /// Luma.
    Y = 1,
    /// Blue-difference chroma.
    Cb = 2,
    /// Red-difference chroma.
    Cr = 4,
    /// Red.
    R = 1024,
    /// Green.
    G = 2048,
    /// Blue.
    B = 4096,
    /// Raw sensor sample.
    Raw = 1 << 20,
    /// Alpha.
    A = 1 << 30,
}

/// One component inside a plane sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneComponent {
    /// Component type.
    pub component: ComponentType,
    /// Offset of the component within the sample, in bits.
    pub offset_in_bits: i64,
    /// Size of the component, in bits.
    pub size_in_bits: i64,
}

/// Layout of a single plane.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct PlaneInfo {
    /// Byte offset of the plane within its fd.
    pub offset: u64,
    /// Bytes between the starts of two rows.
    pub byte_stride: u64,
    /// Allocated width in samples.
    pub alloc_width: u64,
    /// Allocated height in rows.
    pub alloc_height: u64,
    /// Bits between two horizontally adjacent samples.
    pub sample_increment_bits: u64,
    /// Horizontal subsampling factor relative to the buffer width.
    pub horizontal_subsampling: u32,
    /// Vertical subsampling factor relative to the buffer height.
    pub vertical_subsampling: u32,
    /// Index of the fd holding this plane.
    pub fd_index: u32,
}

/// Layout derived for one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    /// Concrete format that was allocated.
    pub alloc_format: PixelFormat,
    /// Stride in pixels of the first plane.
    pub pixel_stride: u32,
    /// Size in bytes of each memory fd.
    pub alloc_sizes: SmallVec<[u64; MAX_BUFFER_FDS]>,
    /// Per-plane layout.
    pub planes: SmallVec<[PlaneInfo; MAX_PLANES]>,
}

impl BufferLayout {
    /// Number of memory fds the buffer needs.
    #[inline]
    pub fn fd_count(&self) -> usize {
        self.alloc_sizes.len()
    }

    /// Total bytes across every fd.
    pub fn total_size(&self) -> u64 {
        self.alloc_sizes.iter().sum()
    }
}

/// Derives buffer layouts from descriptors.
///
/// Implementations must be pure: the same descriptor always yields the same
/// layout, and nothing outside the returned value is touched.
pub trait FormatCalculator: Send + Sync {
    /// Derive the layout for `descriptor`.
    ///
    /// Fails with [`Error::Unsupported`] for formats the calculator does not know.
    fn derive(&self, descriptor: &BufferDescriptor) -> Result<BufferLayout>;

    /// Component description of every plane for `format`.
    fn plane_components(&self, format: PixelFormat) -> Vec<Vec<PlaneComponent>>;

    /// DRM fourcc code for `format`, 0 when none exists.
    fn fourcc(&self, format: PixelFormat) -> u32;

    /// Whether `format` is a YUV format.
    fn is_yuv(&self, format: PixelFormat) -> bool;
}

// ============================================================================
// Format table
// ============================================================================

const fn comp(component: ComponentType, offset_in_bits: i64, size_in_bits: i64) -> PlaneComponent {
    PlaneComponent {
        component,
        offset_in_bits,
        size_in_bits,
    }
}

struct PlaneDesc {
    bytes_per_sample: u64,
    h_sub: u32,
    v_sub: u32,
    components: &'static [PlaneComponent],
}

struct FormatInfo {
    format: PixelFormat,
    name: &'static str,
    planes: &'static [PlaneDesc],
    yuv: bool,
    fd_per_plane: bool,
    fourcc: u32,
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

use ComponentType::{A, B, Cb, Cr, G, R, Raw, Y};

const RGBA_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 4,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(R, 0, 8), comp(G, 8, 8), comp(B, 16, 8), comp(A, 24, 8)],
}];

const RGBX_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 4,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(R, 0, 8), comp(G, 8, 8), comp(B, 16, 8)],
}];

const BGRA_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 4,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(B, 0, 8), comp(G, 8, 8), comp(R, 16, 8), comp(A, 24, 8)],
}];

const RGB888_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 3,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(R, 0, 8), comp(G, 8, 8), comp(B, 16, 8)],
}];

const RGB565_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 2,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(B, 0, 5), comp(G, 5, 6), comp(R, 11, 5)],
}];

const FP16_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 8,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(R, 0, 16), comp(G, 16, 16), comp(B, 32, 16), comp(A, 48, 16)],
}];

const RGBA1010102_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 4,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(R, 0, 10), comp(G, 10, 10), comp(B, 20, 10), comp(A, 30, 2)],
}];

const Y8_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 1,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(Y, 0, 8)],
}];

const Y16_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 2,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(Y, 0, 16)],
}];

const RAW16_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 2,
    h_sub: 1,
    v_sub: 1,
    components: &[comp(Raw, 0, 16)],
}];

const BLOB_PLANE: &[PlaneDesc] = &[PlaneDesc {
    bytes_per_sample: 1,
    h_sub: 1,
    v_sub: 1,
    components: &[],
}];

const NV12_PLANES: &[PlaneDesc] = &[
    PlaneDesc {
        bytes_per_sample: 1,
        h_sub: 1,
        v_sub: 1,
        components: &[comp(Y, 0, 8)],
    },
    PlaneDesc {
        bytes_per_sample: 2,
        h_sub: 2,
        v_sub: 2,
        components: &[comp(Cb, 0, 8), comp(Cr, 8, 8)],
    },
];

const NV21_PLANES: &[PlaneDesc] = &[
    PlaneDesc {
        bytes_per_sample: 1,
        h_sub: 1,
        v_sub: 1,
        components: &[comp(Y, 0, 8)],
    },
    PlaneDesc {
        bytes_per_sample: 2,
        h_sub: 2,
        v_sub: 2,
        components: &[comp(Cr, 0, 8), comp(Cb, 8, 8)],
    },
];

const P010_PLANES: &[PlaneDesc] = &[
    PlaneDesc {
        bytes_per_sample: 2,
        h_sub: 1,
        v_sub: 1,
        components: &[comp(Y, 6, 10)],
    },
    PlaneDesc {
        bytes_per_sample: 4,
        h_sub: 2,
        v_sub: 2,
        components: &[comp(Cb, 6, 10), comp(Cr, 22, 10)],
    },
];

const YV12_PLANES: &[PlaneDesc] = &[
    PlaneDesc {
        bytes_per_sample: 1,
        h_sub: 1,
        v_sub: 1,
        components: &[comp(Y, 0, 8)],
    },
    PlaneDesc {
        bytes_per_sample: 1,
        h_sub: 2,
        v_sub: 2,
        components: &[comp(Cr, 0, 8)],
    },
    PlaneDesc {
        bytes_per_sample: 1,
        h_sub: 2,
        v_sub: 2,
        components: &[comp(Cb, 0, 8)],
    },
];

static FORMATS: &[FormatInfo] = &[
    FormatInfo {
        format: PixelFormat::RGBA_8888,
        name: "RGBA_8888",
        planes: RGBA_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"AB24"),
    },
    FormatInfo {
        format: PixelFormat::RGBX_8888,
        name: "RGBX_8888",
        planes: RGBX_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"XB24"),
    },
    FormatInfo {
        format: PixelFormat::BGRA_8888,
        name: "BGRA_8888",
        planes: BGRA_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"AR24"),
    },
    FormatInfo {
        format: PixelFormat::RGB_888,
        name: "RGB_888",
        planes: RGB888_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"BG24"),
    },
    FormatInfo {
        format: PixelFormat::RGB_565,
        name: "RGB_565",
        planes: RGB565_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"RG16"),
    },
    FormatInfo {
        format: PixelFormat::RGBA_FP16,
        name: "RGBA_FP16",
        planes: FP16_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"AB4H"),
    },
    FormatInfo {
        format: PixelFormat::RGBA_1010102,
        name: "RGBA_1010102",
        planes: RGBA1010102_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: fourcc(b"AB30"),
    },
    FormatInfo {
        format: PixelFormat::Y8,
        name: "Y8",
        planes: Y8_PLANE,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"R8  "),
    },
    FormatInfo {
        format: PixelFormat::Y16,
        name: "Y16",
        planes: Y16_PLANE,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"R16 "),
    },
    FormatInfo {
        format: PixelFormat::RAW16,
        name: "RAW16",
        planes: RAW16_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: 0,
    },
    FormatInfo {
        format: PixelFormat::BLOB,
        name: "BLOB",
        planes: BLOB_PLANE,
        yuv: false,
        fd_per_plane: false,
        fourcc: 0,
    },
    FormatInfo {
        format: PixelFormat::YCBCR_420_888,
        name: "YCBCR_420_888",
        planes: NV12_PLANES,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"NV12"),
    },
    FormatInfo {
        format: PixelFormat::YCRCB_420_SP,
        name: "YCRCB_420_SP",
        planes: NV21_PLANES,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"NV21"),
    },
    FormatInfo {
        format: PixelFormat::YCBCR_P010,
        name: "YCBCR_P010",
        planes: P010_PLANES,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"P010"),
    },
    FormatInfo {
        format: PixelFormat::YV12,
        name: "YV12",
        planes: YV12_PLANES,
        yuv: true,
        fd_per_plane: false,
        fourcc: fourcc(b"YV12"),
    },
    FormatInfo {
        format: PixelFormat::YCBCR_420_SP_M,
        name: "YCBCR_420_SP_M",
        planes: NV12_PLANES,
        yuv: true,
        fd_per_plane: true,
        fourcc: fourcc(b"NV12"),
    },
];

fn table_entry(format: PixelFormat) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|info| info.format == format)
}

/// Row alignment in bytes for every plane of a linear buffer.
const STRIDE_ALIGN: u64 = 64;

/// Chroma row alignment mandated for YV12.
const YV12_CHROMA_ALIGN: u64 = 16;

#[inline]
fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

// ============================================================================
// LinearFormatCalculator
// ============================================================================

/// Linear (uncompressed) layout calculator.
///
/// Every plane row is aligned to 64 bytes; YV12 chroma rows follow the
/// half-luma-stride rule. Sizes scale with the layer count.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearFormatCalculator;

impl LinearFormatCalculator {
    /// Create a new calculator.
    pub fn new() -> Self {
        Self
    }

    /// Pick a concrete format for `IMPLEMENTATION_DEFINED` requests.
    pub fn resolve_format(format: PixelFormat, usage: BufferUsage) -> PixelFormat {
        if format != PixelFormat::IMPLEMENTATION_DEFINED {
            return format;
        }
        let video_or_camera = BufferUsage::VIDEO_ENCODER
            | BufferUsage::VIDEO_DECODER
            | BufferUsage::CAMERA_OUTPUT
            | BufferUsage::CAMERA_INPUT;
        if usage.intersects(video_or_camera) {
            PixelFormat::YCBCR_420_888
        } else {
            PixelFormat::RGBA_8888
        }
    }
}

impl FormatCalculator for LinearFormatCalculator {
    fn derive(&self, descriptor: &BufferDescriptor) -> Result<BufferLayout> {
        let format = Self::resolve_format(descriptor.format, descriptor.combined_usage());
        let info = table_entry(format).ok_or_else(|| {
            Error::Unsupported(format!("no layout for format {:?}", descriptor.format))
        })?;

        let (width, height) = if descriptor.combined_usage().contains(BufferUsage::PLACEHOLDER_BUFFER)
        {
            (1u64, 1u64)
        } else {
            (descriptor.width as u64, descriptor.height as u64)
        };
        let layers = descriptor.layer_count as u64;

        let mut planes: SmallVec<[PlaneInfo; MAX_PLANES]> = SmallVec::new();
        let mut alloc_sizes: SmallVec<[u64; MAX_BUFFER_FDS]> = SmallVec::new();
        let mut offset = 0u64;
        let mut luma_stride = 0u64;

        for (idx, desc) in info.planes.iter().enumerate() {
            let alloc_width = width.div_ceil(desc.h_sub as u64);
            let alloc_height = height.div_ceil(desc.v_sub as u64);
            let row_bytes = alloc_width
                .checked_mul(desc.bytes_per_sample)
                .ok_or_else(|| Error::BadValue("row size overflow".into()))?;

            let byte_stride = if format == PixelFormat::BLOB {
                row_bytes
            } else if format == PixelFormat::YV12 && idx > 0 {
                align_up(luma_stride / 2, YV12_CHROMA_ALIGN)
            } else {
                align_up(row_bytes, STRIDE_ALIGN)
            };
            if idx == 0 {
                luma_stride = byte_stride;
            }

            let plane_size = byte_stride
                .checked_mul(alloc_height)
                .ok_or_else(|| Error::BadValue("plane size overflow".into()))?;

            let fd_index = if info.fd_per_plane {
                offset = 0;
                alloc_sizes.push(0);
                alloc_sizes.len() - 1
            } else {
                if alloc_sizes.is_empty() {
                    alloc_sizes.push(0);
                }
                0
            };

            planes.push(PlaneInfo {
                offset,
                byte_stride,
                alloc_width,
                alloc_height,
                sample_increment_bits: desc.bytes_per_sample * 8,
                horizontal_subsampling: desc.h_sub,
                vertical_subsampling: desc.v_sub,
                fd_index: fd_index as u32,
            });

            offset += plane_size;
            alloc_sizes[fd_index] += plane_size;
        }

        for size in alloc_sizes.iter_mut() {
            *size = size
                .checked_mul(layers)
                .ok_or_else(|| Error::BadValue("allocation size overflow".into()))?;
        }

        let first = &planes[0];
        let pixel_stride = if format == PixelFormat::BLOB {
            first.byte_stride
        } else {
            first.byte_stride / (first.sample_increment_bits / 8)
        };

        Ok(BufferLayout {
            alloc_format: format,
            pixel_stride: u32::try_from(pixel_stride)
                .map_err(|_| Error::BadValue("stride exceeds 32 bits".into()))?,
            alloc_sizes,
            planes,
        })
    }

    fn plane_components(&self, format: PixelFormat) -> Vec<Vec<PlaneComponent>> {
        table_entry(format)
            .map(|info| info.planes.iter().map(|p| p.components.to_vec()).collect())
            .unwrap_or_default()
    }

    fn fourcc(&self, format: PixelFormat) -> u32 {
        table_entry(format).map(|info| info.fourcc).unwrap_or(0)
    }

    fn is_yuv(&self, format: PixelFormat) -> bool {
        table_entry(format).is_some_and(|info| info.yuv)
    }
}

// ============================================================================
// Dataspace defaults
// ============================================================================

/// Dataspace codes stored in buffer metadata.
pub mod dataspace {
    /// Unknown dataspace.
    pub const UNKNOWN: i32 = 0;

    const STANDARD_BT709: i32 = 1 << 16;
    const STANDARD_BT601_625: i32 = 2 << 16;
    const TRANSFER_SRGB: i32 = 2 << 22;
    const TRANSFER_SMPTE_170M: i32 = 3 << 22;
    const RANGE_FULL: i32 = 1 << 27;
    const RANGE_LIMITED: i32 = 2 << 27;

    /// sRGB, full range.
    pub const SRGB: i32 = STANDARD_BT709 | TRANSFER_SRGB | RANGE_FULL;
    /// BT.601 625-line, limited range.
    pub const BT601_625: i32 = STANDARD_BT601_625 | TRANSFER_SMPTE_170M | RANGE_LIMITED;
    /// BT.709, limited range.
    pub const BT709: i32 = STANDARD_BT709 | TRANSFER_SMPTE_170M | RANGE_LIMITED;
}

/// Dataspace written into a freshly allocated buffer's metadata.
pub fn default_dataspace(is_yuv: bool, height: u32) -> i32 {
    if !is_yuv {
        dataspace::SRGB
    } else if height <= 576 {
        dataspace::BT601_625
    } else {
        dataspace::BT709
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BufferDescriptorInfo;

    fn descriptor(width: u32, height: u32, format: PixelFormat) -> BufferDescriptor {
        BufferDescriptor::from_info(&BufferDescriptorInfo {
            name: "test".into(),
            width,
            height,
            layer_count: 1,
            format,
            usage: BufferUsage::CPU_READ_OFTEN,
            reserved_size: 0,
        })
    }

    #[test]
    fn test_rgba_stride_is_aligned() {
        let layout = LinearFormatCalculator
            .derive(&descriptor(100, 10, PixelFormat::RGBA_8888))
            .unwrap();
        // 100 * 4 = 400 bytes, aligned to 448
        assert_eq!(layout.planes[0].byte_stride, 448);
        assert_eq!(layout.pixel_stride, 112);
        assert_eq!(layout.fd_count(), 1);
        assert_eq!(layout.alloc_sizes[0], 448 * 10);
    }

    #[test]
    fn test_nv12_has_two_planes_in_one_fd() {
        let layout = LinearFormatCalculator
            .derive(&descriptor(64, 64, PixelFormat::YCBCR_420_888))
            .unwrap();
        assert_eq!(layout.planes.len(), 2);
        assert_eq!(layout.fd_count(), 1);
        assert_eq!(layout.planes[1].offset, 64 * 64);
        assert_eq!(layout.planes[1].alloc_height, 32);
        assert_eq!(layout.alloc_sizes[0], 64 * 64 + 64 * 32);
    }

    #[test]
    fn test_multi_fd_format() {
        let layout = LinearFormatCalculator
            .derive(&descriptor(64, 64, PixelFormat::YCBCR_420_SP_M))
            .unwrap();
        assert_eq!(layout.fd_count(), 2);
        assert_eq!(layout.planes[1].fd_index, 1);
        assert_eq!(layout.planes[1].offset, 0);
        assert_eq!(layout.alloc_sizes[1], 64 * 32);
    }

    #[test]
    fn test_yv12_chroma_stride() {
        let layout = LinearFormatCalculator
            .derive(&descriptor(100, 2, PixelFormat::YV12))
            .unwrap();
        assert_eq!(layout.planes[0].byte_stride, 128);
        assert_eq!(layout.planes[1].byte_stride, 64);
        assert_eq!(layout.planes[2].byte_stride, 64);
    }

    #[test]
    fn test_blob_uses_width_as_size() {
        let layout = LinearFormatCalculator
            .derive(&descriptor(1000, 1, PixelFormat::BLOB))
            .unwrap();
        assert_eq!(layout.alloc_sizes[0], 1000);
        assert_eq!(layout.pixel_stride, 1000);
    }

    #[test]
    fn test_layers_scale_size() {
        let mut desc = descriptor(64, 64, PixelFormat::RGBA_8888);
        desc.layer_count = 3;
        let layout = LinearFormatCalculator.derive(&desc).unwrap();
        assert_eq!(layout.alloc_sizes[0], 64 * 4 * 64 * 3);
    }

    #[test]
    fn test_unknown_format_unsupported() {
        let result = LinearFormatCalculator.derive(&descriptor(16, 16, PixelFormat(0xdead)));
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_implementation_defined_resolution() {
        assert_eq!(
            LinearFormatCalculator::resolve_format(
                PixelFormat::IMPLEMENTATION_DEFINED,
                BufferUsage::VIDEO_ENCODER
            ),
            PixelFormat::YCBCR_420_888
        );
        assert_eq!(
            LinearFormatCalculator::resolve_format(
                PixelFormat::IMPLEMENTATION_DEFINED,
                BufferUsage::GPU_TEXTURE
            ),
            PixelFormat::RGBA_8888
        );
    }

    #[test]
    fn test_fourcc() {
        assert_eq!(LinearFormatCalculator.fourcc(PixelFormat::RGBA_8888), 0x3432_4241);
        assert_eq!(LinearFormatCalculator.fourcc(PixelFormat::YCBCR_420_888), 0x3231_564e);
        assert_eq!(LinearFormatCalculator.fourcc(PixelFormat::BLOB), 0);
    }

    #[test]
    fn test_default_dataspace() {
        assert_eq!(default_dataspace(false, 1080), dataspace::SRGB);
        assert_eq!(default_dataspace(true, 480), dataspace::BT601_625);
        assert_eq!(default_dataspace(true, 1080), dataspace::BT709);
    }
}
