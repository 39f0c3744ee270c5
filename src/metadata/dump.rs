//! Buffer metadata dumps.
//!
//! A [`BufferDump`] is the one in-memory form of a dump. Crossing a process
//! boundary goes through [`BufferDump::to_bytes`] and
//! [`BufferDump::from_bytes`]; there are no implicit conversions.

use super::MetadataType;
use crate::error::{Error, Result};

/// One metadata value captured in a dump.
#[derive(Clone, Debug, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct MetadataDump {
    /// Which attribute.
    pub metadata_type: MetadataType,
    /// Encoded value.
    pub metadata: Vec<u8>,
}

/// Snapshot of a buffer's standard metadata.
///
/// Either every dumped attribute is present or the dump is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct BufferDump {
    /// Attributes in dump order.
    pub metadata_dump: Vec<MetadataDump>,
}

impl BufferDump {
    /// Whether the dump holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metadata_dump.is_empty()
    }

    /// Value of `metadata_type`, if dumped.
    pub fn get(&self, metadata_type: &MetadataType) -> Option<&[u8]> {
        self.metadata_dump
            .iter()
            .find(|d| &d.metadata_type == metadata_type)
            .map(|d| d.metadata.as_slice())
    }

    /// Serialize for another process.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::BadValue(format!("dump serialization failed: {e}")))
    }

    /// Deserialize a dump from another process.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<8>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::BadValue(format!("malformed dump: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StandardMetadataType;

    #[test]
    fn test_bytes_roundtrip() {
        let dump = BufferDump {
            metadata_dump: vec![MetadataDump {
                metadata_type: StandardMetadataType::Width.metadata_type(),
                metadata: 64u64.to_le_bytes().to_vec(),
            }],
        };
        let bytes = dump.to_bytes().unwrap();
        let back = BufferDump::from_bytes(&bytes).unwrap();
        assert_eq!(back, dump);
        assert_eq!(
            back.get(&StandardMetadataType::Width.metadata_type()),
            Some(&64u64.to_le_bytes()[..])
        );
        assert!(back.get(&StandardMetadataType::Height.metadata_type()).is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(BufferDump::from_bytes(&[0xff; 3]).is_err());
    }
}
