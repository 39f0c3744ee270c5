//! Metadata stored in a buffer's attribute fd.
//!
//! Every process that maps a buffer sees the same attribute region, so
//! settable metadata lives there rather than in the handle.
//!
//! # Layout
//!
//! ```text
//! +----------------------------+  0
//! | magic u32 | version u32    |
//! | payload_len u32            |
//! | payload (encoded fields)   |
//! +----------------------------+  SHARED_METADATA_SIZE
//! | reserved region            |  client-defined, reserved_size bytes
//! +----------------------------+
//! | ROI area (optional)        |
//! +----------------------------+
//! ```

use super::codec::{Cta861_3, Decoder, Encoder, Rect, Smpte2086};
use crate::error::{Error, Result};

/// Size of the shared metadata header at the start of the attribute fd.
pub const SHARED_METADATA_SIZE: u64 = 4096;

/// Longest buffer name kept in shared metadata, in bytes.
pub const MAX_NAME_SIZE: usize = 256;

/// Largest SMPTE 2094-40 payload kept in shared metadata.
pub const MAX_SMPTE2094_40_SIZE: usize = 2048;

/// Magic value at the start of the region ("GMDT").
const SHARED_METADATA_MAGIC: u32 = 0x5444_4d47;

/// Current region version.
const SHARED_METADATA_VERSION: u32 = 1;

/// Bytes before the payload.
const HEADER_SIZE: usize = 12;

/// Settable per-buffer metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedMetadata {
    /// Buffer name, truncated to [`MAX_NAME_SIZE`] bytes.
    pub name: String,
    /// Dataspace, if set.
    pub dataspace: Option<i32>,
    /// Blend mode, if set.
    pub blend_mode: Option<i32>,
    /// Crop rectangles; empty means the whole buffer.
    pub crop: Vec<Rect>,
    /// Static HDR mastering metadata.
    pub smpte2086: Option<Smpte2086>,
    /// Content light levels.
    pub cta861_3: Option<Cta861_3>,
    /// Dynamic HDR metadata blob.
    pub smpte2094_40: Option<Vec<u8>>,
}

impl SharedMetadata {
    /// Fresh metadata for a newly allocated buffer.
    pub fn new(name: &str, dataspace: i32) -> Self {
        let mut end = name.len().min(MAX_NAME_SIZE);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            name: name[..end].to_owned(),
            dataspace: Some(dataspace),
            ..Self::default()
        }
    }

    /// Write into the start of an attribute region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadValue`] if the encoded form does not fit in
    /// [`SHARED_METADATA_SIZE`] or `region` is smaller than that.
    pub fn encode_into(&self, region: &mut [u8]) -> Result<()> {
        if region.len() < SHARED_METADATA_SIZE as usize {
            return Err(Error::BadValue(format!(
                "attribute region of {} bytes cannot hold shared metadata",
                region.len()
            )));
        }
        if self.name.len() > MAX_NAME_SIZE {
            return Err(Error::BadValue("buffer name too long".into()));
        }
        if self
            .smpte2094_40
            .as_ref()
            .is_some_and(|blob| blob.len() > MAX_SMPTE2094_40_SIZE)
        {
            return Err(Error::BadValue(format!(
                "SMPTE 2094-40 payload exceeds {MAX_SMPTE2094_40_SIZE} bytes"
            )));
        }

        let mut enc = Encoder::new();
        enc.string(&self.name);
        encode_opt_i32(&mut enc, self.dataspace);
        encode_opt_i32(&mut enc, self.blend_mode);
        enc.u64(self.crop.len() as u64);
        for rect in &self.crop {
            rect.encode(&mut enc);
        }
        match &self.smpte2086 {
            Some(v) => {
                enc.u8(1);
                v.encode(&mut enc);
            }
            None => {
                enc.u8(0);
            }
        }
        match &self.cta861_3 {
            Some(v) => {
                enc.u8(1);
                v.encode(&mut enc);
            }
            None => {
                enc.u8(0);
            }
        }
        match &self.smpte2094_40 {
            Some(v) => {
                enc.u8(1).bytes(v);
            }
            None => {
                enc.u8(0);
            }
        }
        let payload = enc.finish();

        let end = HEADER_SIZE + payload.len();
        if end > SHARED_METADATA_SIZE as usize {
            return Err(Error::BadValue(format!(
                "shared metadata needs {end} bytes, region holds {SHARED_METADATA_SIZE}"
            )));
        }

        region[0..4].copy_from_slice(&SHARED_METADATA_MAGIC.to_le_bytes());
        region[4..8].copy_from_slice(&SHARED_METADATA_VERSION.to_le_bytes());
        region[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        region[HEADER_SIZE..end].copy_from_slice(&payload);
        Ok(())
    }

    /// Read from the start of an attribute region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBuffer`] if the region was never initialized or is
    /// corrupted.
    pub fn decode(region: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| Error::BadBuffer(format!("shared metadata {what}"));

        if region.len() < HEADER_SIZE {
            return Err(corrupt("region too small"));
        }
        let word = |i: usize| u32::from_le_bytes([region[i], region[i + 1], region[i + 2], region[i + 3]]);
        if word(0) != SHARED_METADATA_MAGIC {
            return Err(corrupt("has an invalid magic"));
        }
        if word(4) != SHARED_METADATA_VERSION {
            return Err(corrupt("has an unsupported version"));
        }
        let len = word(8) as usize;
        let end = HEADER_SIZE
            .checked_add(len)
            .filter(|end| *end <= region.len() && *end <= SHARED_METADATA_SIZE as usize)
            .ok_or_else(|| corrupt("length is out of range"))?;

        let mut dec = Decoder::new(&region[HEADER_SIZE..end]);
        let parsed = (|| -> Result<Self> {
            let name = dec.string()?;
            let dataspace = decode_opt_i32(&mut dec)?;
            let blend_mode = decode_opt_i32(&mut dec)?;
            let count = dec.count(Rect::ENCODED_SIZE)?;
            let crop = (0..count)
                .map(|_| Rect::decode(&mut dec))
                .collect::<Result<Vec<_>>>()?;
            let smpte2086 = match dec.u8()? {
                0 => None,
                _ => Some(Smpte2086::decode(&mut dec)?),
            };
            let cta861_3 = match dec.u8()? {
                0 => None,
                _ => Some(Cta861_3::decode(&mut dec)?),
            };
            let smpte2094_40 = match dec.u8()? {
                0 => None,
                _ => Some(dec.bytes()?.to_vec()),
            };
            Ok(Self {
                name,
                dataspace,
                blend_mode,
                crop,
                smpte2086,
                cta861_3,
                smpte2094_40,
            })
        })();

        parsed.map_err(|e| corrupt(&format!("payload is malformed: {e}")))
    }
}

fn encode_opt_i32(enc: &mut Encoder, v: Option<i32>) {
    match v {
        Some(v) => {
            enc.u8(1).i32(v);
        }
        None => {
            enc.u8(0);
        }
    }
}

fn decode_opt_i32(dec: &mut Decoder<'_>) -> Result<Option<i32>> {
    Ok(match dec.u8()? {
        0 => None,
        _ => Some(dec.i32()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut region = vec![0u8; SHARED_METADATA_SIZE as usize];
        let mut meta = SharedMetadata::new("buffer", 42);
        meta.blend_mode = Some(2);
        meta.crop = vec![Rect::full(10, 10)];
        meta.cta861_3 = Some(Cta861_3 {
            max_content_light_level: 1.0,
            max_frame_average_light_level: 2.0,
        });
        meta.smpte2094_40 = Some(vec![1, 2, 3]);

        meta.encode_into(&mut region).unwrap();
        assert_eq!(SharedMetadata::decode(&region).unwrap(), meta);
    }

    #[test]
    fn test_zeroed_region_is_bad_buffer() {
        let region = vec![0u8; SHARED_METADATA_SIZE as usize];
        assert!(matches!(
            SharedMetadata::decode(&region),
            Err(Error::BadBuffer(_))
        ));
    }

    #[test]
    fn test_name_is_truncated() {
        let long = "x".repeat(1000);
        let meta = SharedMetadata::new(&long, 0);
        assert_eq!(meta.name.len(), MAX_NAME_SIZE);
    }

    #[test]
    fn test_oversized_blob_rejected() {
        let mut region = vec![0u8; SHARED_METADATA_SIZE as usize];
        let mut meta = SharedMetadata::new("b", 0);
        meta.smpte2094_40 = Some(vec![0; MAX_SMPTE2094_40_SIZE + 1]);
        assert!(matches!(
            meta.encode_into(&mut region),
            Err(Error::BadValue(_))
        ));
    }

    #[test]
    fn test_small_region_rejected() {
        let mut region = vec![0u8; 64];
        assert!(SharedMetadata::new("b", 0).encode_into(&mut region).is_err());
    }
}
