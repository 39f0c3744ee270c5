//! Buffer descriptors and their wire encoding.
//!
//! A client describes the buffers it wants with a [`BufferDescriptorInfo`].
//! Across a process boundary the request travels as an encoded descriptor:
//!
//! ```text
//! +---------+-------+--------+-------------+--------+-----------+---------------+-----------+
//! | version | width | height | layer_count | format | usage u64 | reserved u64  | name \0   |
//! |   u32   |  u32  |  u32   |     u32     |  u32   |           |               |           |
//! +---------+-------+--------+-------------+--------+-----------+---------------+-----------+
//! ```
//!
//! All integers are little-endian. The encoded form carries a single combined
//! usage; decoding copies it into both producer and consumer usage. Callers
//! that need distinct producer/consumer usage build a [`BufferDescriptor`]
//! directly with [`BufferDescriptor::from_info`] and skip the codec.
//!
//! # Example
//!
//! ```rust,ignore
//! use gralloc::descriptor::{BufferDescriptorInfo, DescriptorCodec};
//!
//! let bytes = DescriptorCodec::encode(&info)?;
//! let descriptor = DescriptorCodec::decode(&bytes)?;
//! assert_eq!(descriptor.width, info.width);
//! ```

use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::usage::BufferUsage;
use thiserror::Error as ThisError;

/// A buffer request as built by a client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptorInfo {
    /// Debug name, may be empty.
    pub name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of image layers.
    pub layer_count: u32,
    /// Requested pixel format.
    pub format: PixelFormat,
    /// Combined producer and consumer usage.
    pub usage: BufferUsage,
    /// Bytes of client-defined reserved region.
    pub reserved_size: u64,
}

impl BufferDescriptorInfo {
    /// Check a structured request.
    ///
    /// Unlike the wire path, this also rejects usage bits that no consumer
    /// defines.
    pub fn validate(&self) -> Result<()> {
        BufferDescriptor::from_info(self).validate()?;
        let unknown = self.usage.unknown_bits();
        if !unknown.is_empty() {
            return Err(Error::BadValue(format!("unknown usage bits {unknown:#x}")));
        }
        Ok(())
    }
}

/// A decoded buffer descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug name.
    pub name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of image layers.
    pub layer_count: u32,
    /// Requested pixel format.
    pub format: PixelFormat,
    /// Usage of the buffer's producer.
    pub producer_usage: BufferUsage,
    /// Usage of the buffer's consumers.
    pub consumer_usage: BufferUsage,
    /// Bytes of client-defined reserved region.
    pub reserved_size: u64,
}

impl BufferDescriptor {
    /// Build a descriptor straight from a structured request.
    pub fn from_info(info: &BufferDescriptorInfo) -> Self {
        Self {
            name: info.name.clone(),
            width: info.width,
            height: info.height,
            layer_count: info.layer_count,
            format: info.format,
            producer_usage: info.usage,
            consumer_usage: info.usage,
            reserved_size: info.reserved_size,
        }
    }

    /// Union of producer and consumer usage.
    #[inline]
    pub fn combined_usage(&self) -> BufferUsage {
        self.producer_usage | self.consumer_usage
    }

    /// The request this descriptor was built from.
    pub fn to_info(&self) -> BufferDescriptorInfo {
        BufferDescriptorInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            layer_count: self.layer_count,
            format: self.format,
            usage: self.combined_usage(),
            reserved_size: self.reserved_size,
        }
    }

    /// Allocation gate: dimensions, layer count and format must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.layer_count == 0 {
            return Err(Error::BadDescriptor(format!(
                "zero dimension: {}x{} with {} layers",
                self.width, self.height, self.layer_count
            )));
        }
        if self.format == PixelFormat::UNDEFINED {
            return Err(Error::BadDescriptor("format is undefined".into()));
        }
        Ok(())
    }
}

/// Why an encoded descriptor was rejected.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed fields plus terminator.
    #[error("descriptor too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Actual length.
        len: usize,
        /// Minimum length.
        min: usize,
    },

    /// Last byte is not the string terminator.
    #[error("descriptor name is not NUL-terminated")]
    MissingTerminator,

    /// Encoded with a different descriptor version.
    #[error("descriptor version {found} does not match {expected}")]
    VersionMismatch {
        /// Version this codec writes.
        expected: u32,
        /// Version found in the bytes.
        found: u32,
    },

    /// Name holds an interior NUL or is not UTF-8.
    #[error("descriptor name is malformed")]
    InvalidName,
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::BadDescriptor(err.to_string())
    }
}

/// Encoder/decoder for the descriptor wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorCodec;

impl DescriptorCodec {
    /// Version tag written in the first field.
    pub const VERSION: u32 = 40;

    /// Size of the fixed fields: five u32 then two u64.
    pub const FIXED_SIZE: usize = 5 * 4 + 2 * 8;

    /// Smallest valid encoding (fixed fields plus terminator).
    pub const MIN_SIZE: usize = Self::FIXED_SIZE + 1;

    /// Encode a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadDescriptor`] if the name contains a NUL byte.
    pub fn encode(info: &BufferDescriptorInfo) -> Result<Vec<u8>> {
        if info.name.as_bytes().contains(&0) {
            return Err(Error::BadDescriptor(
                "descriptor name contains a NUL byte".into(),
            ));
        }

        let mut out = Vec::with_capacity(Self::MIN_SIZE + info.name.len());
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&info.width.to_le_bytes());
        out.extend_from_slice(&info.height.to_le_bytes());
        out.extend_from_slice(&info.layer_count.to_le_bytes());
        out.extend_from_slice(&info.format.code().to_le_bytes());
        out.extend_from_slice(&info.usage.bits().to_le_bytes());
        out.extend_from_slice(&info.reserved_size.to_le_bytes());
        out.extend_from_slice(info.name.as_bytes());
        out.push(0);
        Ok(out)
    }

    /// Decode an encoded descriptor, keeping the precise failure.
    ///
    /// Checks run in a fixed order: length, terminator, version.
    pub fn try_decode(bytes: &[u8]) -> std::result::Result<BufferDescriptor, DecodeError> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                min: Self::MIN_SIZE,
            });
        }
        if bytes[bytes.len() - 1] != 0 {
            return Err(DecodeError::MissingTerminator);
        }

        let mut reader = FieldReader::new(bytes);
        let version = reader.u32();
        if version != Self::VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: Self::VERSION,
                found: version,
            });
        }

        let width = reader.u32();
        let height = reader.u32();
        let layer_count = reader.u32();
        let format = PixelFormat(reader.u32());
        let usage = BufferUsage::from_bits(reader.u64());
        let reserved_size = reader.u64();

        let name_bytes = &bytes[Self::FIXED_SIZE..bytes.len() - 1];
        if name_bytes.contains(&0) {
            return Err(DecodeError::InvalidName);
        }
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| DecodeError::InvalidName)?
            .to_owned();

        Ok(BufferDescriptor {
            name,
            width,
            height,
            layer_count,
            format,
            producer_usage: usage,
            consumer_usage: usage,
            reserved_size,
        })
    }

    /// Decode an encoded descriptor.
    ///
    /// Every failure is logged with its precise reason and returned as
    /// [`Error::BadDescriptor`].
    pub fn decode(bytes: &[u8]) -> Result<BufferDescriptor> {
        Self::try_decode(bytes).map_err(|err| {
            tracing::error!(len = bytes.len(), reason = %err, "Failed to decode buffer descriptor");
            Error::from(err)
        })
    }
}

/// Sequential little-endian reader over the fixed fields.
///
/// Callers check the length up front, so reads never run past the end.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BufferDescriptorInfo {
        BufferDescriptorInfo {
            name: "camera-preview".into(),
            width: 1920,
            height: 1080,
            layer_count: 1,
            format: PixelFormat::YCBCR_420_888,
            usage: BufferUsage::CAMERA_OUTPUT | BufferUsage::GPU_TEXTURE,
            reserved_size: 128,
        }
    }

    #[test]
    fn test_roundtrip() {
        let info = sample();
        let bytes = DescriptorCodec::encode(&info).unwrap();
        assert_eq!(bytes.len(), DescriptorCodec::MIN_SIZE + info.name.len());

        let decoded = DescriptorCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.to_info(), info);
        assert_eq!(decoded.producer_usage, decoded.consumer_usage);
    }

    #[test]
    fn test_roundtrip_empty_name() {
        let info = BufferDescriptorInfo {
            name: String::new(),
            ..sample()
        };
        let bytes = DescriptorCodec::encode(&info).unwrap();
        assert_eq!(bytes.len(), DescriptorCodec::MIN_SIZE);
        assert_eq!(DescriptorCodec::decode(&bytes).unwrap().to_info(), info);
    }

    #[test]
    fn test_wire_layout() {
        let bytes = DescriptorCodec::encode(&sample()).unwrap();
        assert_eq!(&bytes[0..4], &40u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1920u32.to_le_bytes());
        assert_eq!(&bytes[28..36], &128u64.to_le_bytes());
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_decode_too_short() {
        let bytes = DescriptorCodec::encode(&sample()).unwrap();
        let err = DescriptorCodec::try_decode(&bytes[..20]).unwrap_err();
        assert!(matches!(err, DecodeError::TooShort { len: 20, .. }));
    }

    #[test]
    fn test_decode_missing_terminator() {
        let mut bytes = DescriptorCodec::encode(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'x';
        assert_eq!(
            DescriptorCodec::try_decode(&bytes).unwrap_err(),
            DecodeError::MissingTerminator
        );
    }

    #[test]
    fn test_decode_version_mismatch() {
        let mut bytes = DescriptorCodec::encode(&sample()).unwrap();
        bytes[0..4].copy_from_slice(&30u32.to_le_bytes());
        assert_eq!(
            DescriptorCodec::try_decode(&bytes).unwrap_err(),
            DecodeError::VersionMismatch {
                expected: 40,
                found: 30
            }
        );
    }

    #[test]
    fn test_decode_errors_are_bad_descriptor() {
        let err = DescriptorCodec::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::BadDescriptor(_)));
    }

    #[test]
    fn test_encode_rejects_interior_nul() {
        let info = BufferDescriptorInfo {
            name: "a\0b".into(),
            ..sample()
        };
        assert!(matches!(
            DescriptorCodec::encode(&info),
            Err(Error::BadDescriptor(_))
        ));
    }

    #[test]
    fn test_wire_path_keeps_unknown_usage_bits() {
        let info = BufferDescriptorInfo {
            usage: BufferUsage::from_bits(1 << 40),
            ..sample()
        };
        let decoded = DescriptorCodec::decode(&DescriptorCodec::encode(&info).unwrap()).unwrap();
        assert_eq!(decoded.combined_usage().bits(), 1 << 40);
        assert!(matches!(info.validate(), Err(Error::BadValue(_))));
    }

    #[test]
    fn test_validate_zero_fields() {
        let mut desc = BufferDescriptor::from_info(&sample());
        assert!(desc.validate().is_ok());
        desc.height = 0;
        assert!(matches!(desc.validate(), Err(Error::BadDescriptor(_))));

        let mut desc = BufferDescriptor::from_info(&sample());
        desc.format = PixelFormat::UNDEFINED;
        assert!(matches!(desc.validate(), Err(Error::BadDescriptor(_))));
    }
}
