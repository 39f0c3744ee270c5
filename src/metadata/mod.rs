//! Typed buffer metadata.
//!
//! Metadata is addressed by a [`MetadataType`]: a namespace string plus a
//! numeric id. The standard namespace covers the attributes every graphics
//! client understands; vendor namespaces add their own.
//!
//! # Architecture
//!
//! - [`MetadataStore`]: get/set dispatch with per-type encoding and
//!   mutability rules
//! - [`SharedMetadata`]: the settable values, stored in the attribute fd
//! - [`codec`]: byte encodings of each value
//! - [`BufferDump`]: all-or-nothing snapshot of a buffer's metadata
//!
//! # Example
//!
//! ```rust,ignore
//! use gralloc::metadata::StandardMetadataType;
//!
//! let width = mapper.get(buffer, &StandardMetadataType::Width.metadata_type())?;
//! mapper.set(buffer, &StandardMetadataType::Dataspace.metadata_type(), &bytes)?;
//! ```

pub mod codec;
mod dump;
mod shared;
mod store;

pub use dump::{BufferDump, MetadataDump};
pub use shared::{MAX_NAME_SIZE, MAX_SMPTE2094_40_SIZE, SHARED_METADATA_SIZE, SharedMetadata};
pub use store::{BlendMode, MetadataStore};

use std::fmt;

/// Namespace of the standard metadata types.
pub const STANDARD_METADATA_NAMESPACE: &str =
    "android.hardware.graphics.common.StandardMetadataType";

/// Namespace of the vendor metadata types.
pub const ARM_METADATA_NAMESPACE: &str = "arm.graphics.ArmMetadataType";

/// Identifies one metadata attribute.
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct MetadataType {
    /// Namespace.
    pub name: String,
    /// Id within the namespace.
    pub value: i64,
}

impl MetadataType {
    /// New metadata type.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// The standard type this names, if any.
    pub fn standard(&self) -> Option<StandardMetadataType> {
        if self.name == STANDARD_METADATA_NAMESPACE {
            StandardMetadataType::from_id(self.value)
        } else {
            None
        }
    }

    /// The vendor type this names, if any.
    pub fn arm(&self) -> Option<ArmMetadataType> {
        if self.name == ARM_METADATA_NAMESPACE {
            ArmMetadataType::from_id(self.value)
        } else {
            None
        }
    }
}

impl fmt::Debug for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.standard() {
            Some(standard) => write!(f, "{standard:?}"),
            None => write!(f, "{}#{}", self.name, self.value),
        }
    }
}

macro_rules! standard_types {
    ($($variant:ident = $id:literal),* $(,)?) => {
        /// Standard metadata attributes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(i64)]
        #[allow(non_camel_case_types)]
        pub enum StandardMetadataType {
            $(
                #[allow(missing_docs)]
                $variant = $id,
            )*
        }

        impl StandardMetadataType {
            /// Look up by numeric id.
            pub fn from_id(id: i64) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

standard_types! {
    BufferId = 1,
    Name = 2,
    Width = 3,
    Height = 4,
    LayerCount = 5,
    PixelFormatRequested = 6,
    PixelFormatFourcc = 7,
    PixelFormatModifier = 8,
    Usage = 9,
    AllocationSize = 10,
    ProtectedContent = 11,
    Compression = 12,
    Interlaced = 13,
    ChromaSiting = 14,
    PlaneLayouts = 15,
    Crop = 16,
    Dataspace = 17,
    BlendMode = 18,
    Smpte2086 = 19,
    Cta861_3 = 20,
    Smpte2094_40 = 21,
    Smpte2094_10 = 22,
    Stride = 23,
}

impl StandardMetadataType {
    /// Numeric id.
    #[inline]
    pub fn id(self) -> i64 {
        self as i64
    }

    /// Full metadata type.
    pub fn metadata_type(self) -> MetadataType {
        MetadataType::new(STANDARD_METADATA_NAMESPACE, self.id())
    }

    /// Whether clients may set this type.
    pub fn is_settable(self) -> bool {
        matches!(
            self,
            Self::Dataspace
                | Self::BlendMode
                | Self::Smpte2086
                | Self::Cta861_3
                | Self::Smpte2094_40
                | Self::Crop
        )
    }
}

impl From<StandardMetadataType> for MetadataType {
    fn from(t: StandardMetadataType) -> Self {
        t.metadata_type()
    }
}

/// Vendor metadata attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ArmMetadataType {
    /// fds of every plane, as `i64`s.
    PlaneFds = 1,
}

impl ArmMetadataType {
    /// Look up by numeric id.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::PlaneFds),
            _ => None,
        }
    }

    /// Full metadata type.
    pub fn metadata_type(self) -> MetadataType {
        MetadataType::new(ARM_METADATA_NAMESPACE, self as i64)
    }
}

/// Catalog entry returned by [`list_supported`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataTypeDescription {
    /// Metadata type.
    pub metadata_type: MetadataType,
    /// Description; only vendor types carry one.
    pub description: &'static str,
    /// Readable with `get`.
    pub is_gettable: bool,
    /// Writable with `set`.
    pub is_settable: bool,
}

/// Standard types in catalog order.
const CATALOG: [StandardMetadataType; 22] = [
    StandardMetadataType::BufferId,
    StandardMetadataType::Name,
    StandardMetadataType::Width,
    StandardMetadataType::Stride,
    StandardMetadataType::Height,
    StandardMetadataType::LayerCount,
    StandardMetadataType::PixelFormatRequested,
    StandardMetadataType::PixelFormatFourcc,
    StandardMetadataType::PixelFormatModifier,
    StandardMetadataType::Usage,
    StandardMetadataType::AllocationSize,
    StandardMetadataType::ProtectedContent,
    StandardMetadataType::Compression,
    StandardMetadataType::Interlaced,
    StandardMetadataType::ChromaSiting,
    StandardMetadataType::PlaneLayouts,
    StandardMetadataType::Dataspace,
    StandardMetadataType::BlendMode,
    StandardMetadataType::Smpte2086,
    StandardMetadataType::Cta861_3,
    StandardMetadataType::Smpte2094_40,
    StandardMetadataType::Crop,
];

/// Every metadata type the store understands.
pub fn list_supported() -> Vec<MetadataTypeDescription> {
    CATALOG
        .iter()
        .map(|t| MetadataTypeDescription {
            metadata_type: t.metadata_type(),
            description: "",
            is_gettable: true,
            is_settable: t.is_settable(),
        })
        .chain(std::iter::once(MetadataTypeDescription {
            metadata_type: ArmMetadataType::PlaneFds.metadata_type(),
            description: "Vector of file descriptors of each plane",
            is_gettable: true,
            is_settable: false,
        }))
        .collect()
}

/// Standard types read by a buffer dump, in order.
pub const DUMP_TYPES: [StandardMetadataType; 21] = [
    StandardMetadataType::BufferId,
    StandardMetadataType::Name,
    StandardMetadataType::Width,
    StandardMetadataType::Height,
    StandardMetadataType::LayerCount,
    StandardMetadataType::PixelFormatRequested,
    StandardMetadataType::PixelFormatFourcc,
    StandardMetadataType::PixelFormatModifier,
    StandardMetadataType::Usage,
    StandardMetadataType::AllocationSize,
    StandardMetadataType::ProtectedContent,
    StandardMetadataType::Compression,
    StandardMetadataType::Interlaced,
    StandardMetadataType::ChromaSiting,
    StandardMetadataType::PlaneLayouts,
    StandardMetadataType::Dataspace,
    StandardMetadataType::BlendMode,
    StandardMetadataType::Smpte2086,
    StandardMetadataType::Cta861_3,
    StandardMetadataType::Smpte2094_40,
    StandardMetadataType::Crop,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        let supported = list_supported();
        assert_eq!(supported.len(), 23);

        let settable: Vec<_> = supported
            .iter()
            .filter(|d| d.is_settable)
            .filter_map(|d| d.metadata_type.standard())
            .collect();
        assert_eq!(settable.len(), 6);
        assert!(settable.contains(&StandardMetadataType::Crop));
        assert!(!settable.contains(&StandardMetadataType::Width));

        let vendor = supported.last().unwrap();
        assert_eq!(vendor.metadata_type.arm(), Some(ArmMetadataType::PlaneFds));
        assert!(!vendor.is_settable);
    }

    #[test]
    fn test_type_identity_needs_both_fields() {
        let width = StandardMetadataType::Width.metadata_type();
        assert_eq!(width, MetadataType::new(STANDARD_METADATA_NAMESPACE, 3));
        assert_ne!(width, MetadataType::new(ARM_METADATA_NAMESPACE, 3));
        assert_eq!(MetadataType::new("vendor.other", 3).standard(), None);
    }

    #[test]
    fn test_from_id() {
        assert_eq!(StandardMetadataType::from_id(23), Some(StandardMetadataType::Stride));
        assert_eq!(StandardMetadataType::from_id(0), None);
        assert_eq!(StandardMetadataType::from_id(99), None);
    }
}
