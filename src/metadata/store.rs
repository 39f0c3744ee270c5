//! Per-type metadata get/set.
//!
//! Read-only attributes come from the handle header and the format
//! calculator. Settable attributes live in [`SharedMetadata`] inside the
//! attribute region, so every importer of a buffer sees the same values.

use super::codec::{
    ExtendableType, PlaneLayout, PlaneLayoutComponent, Rect, decode_crop, decode_cta861_3,
    decode_i32, decode_smpte2086, encode_crop, encode_cta861_3, encode_extendable, encode_fds,
    encode_i32, encode_plane_layouts, encode_smpte2086, encode_string, encode_u32, encode_u64,
};
use super::dump::{BufferDump, MetadataDump};
use super::shared::SharedMetadata;
use super::{ArmMetadataType, DUMP_TYPES, MetadataType, StandardMetadataType};
use crate::descriptor::{BufferDescriptor, BufferDescriptorInfo};
use crate::error::{Error, Result};
use crate::format::{FormatCalculator, PixelFormat, PlaneInfo, dataspace, default_dataspace};
use crate::handle::BufferHandle;
use crate::usage::BufferUsage;
use rustix::fd::AsRawFd;
use std::sync::Arc;

const COMPRESSION_NAMESPACE: &str = "android.hardware.graphics.common.Compression";
const INTERLACED_NAMESPACE: &str = "android.hardware.graphics.common.Interlaced";
const CHROMA_SITING_NAMESPACE: &str = "android.hardware.graphics.common.ChromaSiting";
const PLANE_COMPONENT_NAMESPACE: &str = "android.hardware.graphics.common.PlaneLayoutComponentType";

const COMPRESSION_NONE: i64 = 0;
const INTERLACED_NONE: i64 = 0;
const CHROMA_SITING_NONE: i64 = 0;
const CHROMA_SITING_SITED_INTERSTITIAL: i64 = 2;

/// Blend mode stored in buffer metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BlendMode {
    /// Never set.
    Invalid = 0,
    /// No blending.
    None = 1,
    /// Premultiplied alpha.
    Premultiplied = 2,
    /// Coverage alpha.
    Coverage = 3,
}

impl BlendMode {
    /// Look up by numeric value.
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Invalid),
            1 => Some(Self::None),
            2 => Some(Self::Premultiplied),
            3 => Some(Self::Coverage),
            _ => None,
        }
    }
}

/// Everything a read-only attribute can be derived from.
struct BufferFacts<'a> {
    buffer_id: Option<u64>,
    name: &'a str,
    width: u32,
    height: u32,
    layer_count: u32,
    requested_format: PixelFormat,
    allocated_format: PixelFormat,
    usage: BufferUsage,
    allocation_size: u64,
    stride: u32,
    planes: &'a [PlaneInfo],
}

/// Metadata get/set dispatch.
pub struct MetadataStore {
    calculator: Arc<dyn FormatCalculator>,
}

impl MetadataStore {
    /// Store deriving plane descriptions with `calculator`.
    pub fn new(calculator: Arc<dyn FormatCalculator>) -> Self {
        Self { calculator }
    }

    /// Read `metadata_type` from an imported buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] for types outside the catalog
    /// - [`Error::BadBuffer`] if the shared metadata region is corrupted
    pub fn get(&self, buffer: &BufferHandle, metadata_type: &MetadataType) -> Result<Vec<u8>> {
        if let Some(arm) = metadata_type.arm() {
            return match arm {
                ArmMetadataType::PlaneFds => {
                    let fds: Vec<i64> = buffer
                        .plane_fds()
                        .map(|fd| i64::from(fd.as_raw_fd()))
                        .collect();
                    Ok(encode_fds(&fds))
                }
            };
        }

        let standard = metadata_type
            .standard()
            .ok_or_else(|| unsupported(metadata_type))?;

        let header = buffer.header();
        let facts = BufferFacts {
            buffer_id: Some(header.buffer_id),
            name: &header.name,
            width: header.width,
            height: header.height,
            layer_count: header.layer_count,
            requested_format: header.requested_format(),
            allocated_format: header.allocated_format(),
            usage: header.usage(),
            allocation_size: header.allocation_size(),
            stride: header.stride,
            planes: &header.planes,
        };

        if let Some(value) = self.read_only_value(&facts, standard)? {
            return Ok(value);
        }

        let shared = SharedMetadata::decode(buffer.attr().as_slice())?;
        shared_value(&facts, &shared, standard).ok_or_else(|| unsupported(metadata_type))
    }

    /// Write a settable `metadata_type` on an imported buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] for unknown or read-only types
    /// - [`Error::BadValue`] for a malformed or out-of-range payload
    /// - [`Error::BadBuffer`] if the shared metadata region is corrupted
    pub fn set(
        &self,
        buffer: &BufferHandle,
        metadata_type: &MetadataType,
        value: &[u8],
    ) -> Result<()> {
        let standard = metadata_type
            .standard()
            .filter(|t| t.is_settable())
            .ok_or_else(|| {
                tracing::error!(?metadata_type, "metadata type cannot be set");
                Error::Unsupported(format!("{metadata_type:?} is not settable"))
            })?;

        let header = buffer.header();
        let mut attr = buffer.attr();
        let mut shared = SharedMetadata::decode(attr.as_slice())?;

        match standard {
            StandardMetadataType::Dataspace => {
                shared.dataspace = Some(decode_i32(value)?);
            }
            StandardMetadataType::BlendMode => {
                let raw = decode_i32(value)?;
                let mode = BlendMode::from_i32(raw)
                    .ok_or_else(|| Error::BadValue(format!("unknown blend mode {raw}")))?;
                shared.blend_mode = Some(mode as i32);
            }
            StandardMetadataType::Crop => {
                let rects = decode_crop(value)?;
                if rects.is_empty() || rects.len() > header.planes.len() {
                    tracing::error!(
                        buffer_id = header.buffer_id,
                        got = rects.len(),
                        planes = header.planes.len(),
                        "crop rectangle count out of range"
                    );
                    return Err(Error::BadValue(format!(
                        "{} crop rectangles for {} planes",
                        rects.len(),
                        header.planes.len()
                    )));
                }
                if let Some(bad) = rects.iter().find(|r| !r.fits(header.width, header.height)) {
                    tracing::error!(
                        buffer_id = header.buffer_id,
                        ?bad,
                        width = header.width,
                        height = header.height,
                        "crop rectangle outside the buffer"
                    );
                    return Err(Error::BadValue(format!(
                        "crop {bad:?} outside {}x{}",
                        header.width, header.height
                    )));
                }
                shared.crop = rects;
            }
            StandardMetadataType::Smpte2086 => {
                shared.smpte2086 = decode_smpte2086(value)?;
            }
            StandardMetadataType::Cta861_3 => {
                shared.cta861_3 = decode_cta861_3(value)?;
            }
            StandardMetadataType::Smpte2094_40 => {
                shared.smpte2094_40 = (!value.is_empty()).then(|| value.to_vec());
            }
            _ => return Err(unsupported(metadata_type)),
        }

        let region = attr
            .as_mut_slice()
            .ok_or_else(|| Error::BadBuffer("attribute region is mapped read-only".into()))?;
        shared.encode_into(region)
    }

    /// Read `metadata_type` for a buffer that has not been allocated yet.
    ///
    /// Only attributes derivable from the request itself are available.
    pub fn get_from_descriptor_info(
        &self,
        info: &BufferDescriptorInfo,
        metadata_type: &MetadataType,
    ) -> Result<Vec<u8>> {
        info.validate()?;
        let standard = metadata_type
            .standard()
            .ok_or_else(|| unsupported(metadata_type))?;

        let descriptor = BufferDescriptor::from_info(info);
        let layout = self.calculator.derive(&descriptor)?;
        let facts = BufferFacts {
            buffer_id: None,
            name: &info.name,
            width: info.width,
            height: info.height,
            layer_count: info.layer_count,
            requested_format: info.format,
            allocated_format: layout.alloc_format,
            usage: info.usage,
            allocation_size: layout.total_size(),
            stride: layout.pixel_stride,
            planes: &layout.planes,
        };

        if let Some(value) = self.read_only_value(&facts, standard)? {
            return Ok(value);
        }
        match standard {
            StandardMetadataType::Crop
            | StandardMetadataType::Dataspace
            | StandardMetadataType::BlendMode => {
                let shared = SharedMetadata::new(
                    &info.name,
                    default_dataspace(self.calculator.is_yuv(layout.alloc_format), info.height),
                );
                shared_value(&facts, &shared, standard).ok_or_else(|| unsupported(metadata_type))
            }
            _ => Err(unsupported(metadata_type)),
        }
    }

    /// Snapshot every dumpable attribute of `buffer`.
    ///
    /// Returns an empty dump if any single attribute cannot be read.
    pub fn dump_buffer(&self, buffer: &BufferHandle) -> BufferDump {
        let mut metadata_dump = Vec::with_capacity(DUMP_TYPES.len());
        for standard in DUMP_TYPES {
            let metadata_type = standard.metadata_type();
            match self.get(buffer, &metadata_type) {
                Ok(metadata) => metadata_dump.push(MetadataDump {
                    metadata_type,
                    metadata,
                }),
                Err(e) => {
                    tracing::warn!(
                        buffer_id = buffer.buffer_id(),
                        ?standard,
                        error = %e,
                        "dropping buffer dump"
                    );
                    return BufferDump::default();
                }
            }
        }
        BufferDump { metadata_dump }
    }

    /// Attributes that never change after allocation. `None` for the
    /// settable ones.
    fn read_only_value(
        &self,
        facts: &BufferFacts<'_>,
        standard: StandardMetadataType,
    ) -> Result<Option<Vec<u8>>> {
        use StandardMetadataType as T;

        let value = match standard {
            T::BufferId => match facts.buffer_id {
                Some(id) => encode_u64(id),
                None => {
                    return Err(Error::Unsupported(
                        "buffer id is unknown before allocation".into(),
                    ));
                }
            },
            T::Name => encode_string(facts.name),
            T::Width => encode_u64(u64::from(facts.width)),
            T::Height => encode_u64(u64::from(facts.height)),
            T::LayerCount => encode_u64(u64::from(facts.layer_count)),
            T::PixelFormatRequested => encode_i32(facts.requested_format.code() as i32),
            T::PixelFormatFourcc => encode_u32(self.calculator.fourcc(facts.allocated_format)),
            T::PixelFormatModifier => encode_u64(0),
            T::Usage => encode_u64(facts.usage.bits()),
            T::AllocationSize => encode_u64(facts.allocation_size),
            T::ProtectedContent => {
                encode_u64(u64::from(facts.usage.contains(BufferUsage::PROTECTED)))
            }
            T::Compression => {
                encode_extendable(&ExtendableType::new(COMPRESSION_NAMESPACE, COMPRESSION_NONE))
            }
            T::Interlaced => {
                encode_extendable(&ExtendableType::new(INTERLACED_NAMESPACE, INTERLACED_NONE))
            }
            T::ChromaSiting => {
                let siting = if self.calculator.is_yuv(facts.allocated_format) {
                    CHROMA_SITING_SITED_INTERSTITIAL
                } else {
                    CHROMA_SITING_NONE
                };
                encode_extendable(&ExtendableType::new(CHROMA_SITING_NAMESPACE, siting))
            }
            T::PlaneLayouts => encode_plane_layouts(&self.plane_layouts(facts)),
            T::Stride => encode_u32(facts.stride),
            T::Smpte2094_10 => return Err(Error::Unsupported("SMPTE 2094-10 metadata".into())),
            T::Crop
            | T::Dataspace
            | T::BlendMode
            | T::Smpte2086
            | T::Cta861_3
            | T::Smpte2094_40 => return Ok(None),
        };
        Ok(Some(value))
    }

    fn plane_layouts(&self, facts: &BufferFacts<'_>) -> Vec<PlaneLayout> {
        let components = self.calculator.plane_components(facts.allocated_format);
        facts
            .planes
            .iter()
            .enumerate()
            .map(|(idx, plane)| PlaneLayout {
                components: components
                    .get(idx)
                    .map(|comps| {
                        comps
                            .iter()
                            .map(|c| PlaneLayoutComponent {
                                component_type: ExtendableType::new(
                                    PLANE_COMPONENT_NAMESPACE,
                                    c.component as i64,
                                ),
                                offset_in_bits: c.offset_in_bits,
                                size_in_bits: c.size_in_bits,
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                offset_in_bytes: plane.offset as i64,
                sample_increment_in_bits: plane.sample_increment_bits as i64,
                stride_in_bytes: plane.byte_stride as i64,
                width_in_samples: plane.alloc_width as i64,
                height_in_samples: plane.alloc_height as i64,
                total_size_in_bytes: (plane.byte_stride * plane.alloc_height) as i64,
                horizontal_subsampling: i64::from(plane.horizontal_subsampling),
                vertical_subsampling: i64::from(plane.vertical_subsampling),
            })
            .collect()
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

/// Encoded settable attribute. Unset values read as their defaults.
fn shared_value(
    facts: &BufferFacts<'_>,
    shared: &SharedMetadata,
    standard: StandardMetadataType,
) -> Option<Vec<u8>> {
    Some(match standard {
        StandardMetadataType::Dataspace => {
            encode_i32(shared.dataspace.unwrap_or(dataspace::UNKNOWN))
        }
        StandardMetadataType::BlendMode => {
            encode_i32(shared.blend_mode.unwrap_or(BlendMode::Invalid as i32))
        }
        StandardMetadataType::Crop => {
            if shared.crop.is_empty() {
                let full = Rect::full(facts.width, facts.height);
                encode_crop(&vec![full; facts.planes.len()])
            } else {
                encode_crop(&shared.crop)
            }
        }
        StandardMetadataType::Smpte2086 => encode_smpte2086(shared.smpte2086.as_ref()),
        StandardMetadataType::Cta861_3 => encode_cta861_3(shared.cta861_3.as_ref()),
        StandardMetadataType::Smpte2094_40 => shared.smpte2094_40.clone().unwrap_or_default(),
        _ => return None,
    })
}

fn unsupported(metadata_type: &MetadataType) -> Error {
    tracing::error!(?metadata_type, "unknown metadata type");
    Error::Unsupported(format!("unknown metadata type {metadata_type:?}"))
}
