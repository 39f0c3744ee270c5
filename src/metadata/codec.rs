//! Byte encodings of metadata values.
//!
//! Integers and floats are little-endian and fixed width. Strings and vectors
//! carry a `u64` length prefix. Optional HDR values encode "none" as zero
//! bytes.

use crate::error::{Error, Result};

/// Appends encoded values to a byte vector.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `u32`.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append an `i32`.
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append a `u64`.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append an `i64`.
    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append an `f32`.
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append a single byte.
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Append length-prefixed bytes.
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u64(v.len() as u64);
        self.buf.extend_from_slice(v);
        self
    }

    /// Append a length-prefixed string.
    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes(v.as_bytes())
    }

    /// Finished bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads encoded values, failing with [`Error::BadValue`] on short input.
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Decoder over `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                Error::BadValue(format!(
                    "metadata truncated: need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.bytes.len()
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a `u32`.
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read an `i32`.
    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Read a `u64`.
    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read an `i64`.
    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Read an `f32`.
    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Read a single byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read length-prefixed bytes.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.u64()?)
            .map_err(|_| Error::BadValue("metadata length overflows".into()))?;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::BadValue("metadata string is not UTF-8".into()))
    }

    /// Read a `u64` element count, bounded by the remaining input.
    pub fn count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = usize::try_from(self.u64()?)
            .map_err(|_| Error::BadValue("metadata count overflows".into()))?;
        let remaining = self.bytes.len() - self.pos;
        if count.saturating_mul(min_element_size.max(1)) > remaining {
            return Err(Error::BadValue(format!(
                "metadata count {count} exceeds remaining {remaining} bytes"
            )));
        }
        Ok(count)
    }

    /// Fail if any input is left over.
    pub fn finish(self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(Error::BadValue(format!(
                "{} trailing metadata bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Structured values
// ============================================================================

/// A `(name, value)` pair naming a value from an extensible enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendableType {
    /// Enumeration namespace.
    pub name: String,
    /// Value inside the namespace.
    pub value: i64,
}

impl ExtendableType {
    /// New extendable value.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Append to `enc`.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.string(&self.name).i64(self.value);
    }

    /// Read from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            name: dec.string()?,
            value: dec.i64()?,
        })
    }
}

/// Integer rectangle, right and bottom exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Right edge.
    pub right: i32,
    /// Bottom edge.
    pub bottom: i32,
}

impl Rect {
    /// Size of one encoded rectangle.
    pub const ENCODED_SIZE: usize = 16;

    /// Rectangle covering `width` x `height`.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    /// Whether the rectangle lies within `width` x `height` and is not inverted.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.left >= 0
            && self.top >= 0
            && self.left <= self.right
            && self.top <= self.bottom
            && i64::from(self.right) <= i64::from(width)
            && i64::from(self.bottom) <= i64::from(height)
    }

    /// Append to `enc`.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.i32(self.left).i32(self.top).i32(self.right).i32(self.bottom);
    }

    /// Read from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            left: dec.i32()?,
            top: dec.i32()?,
            right: dec.i32()?,
            bottom: dec.i32()?,
        })
    }
}

/// CIE xy chromaticity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct XyColor {
    /// x coordinate.
    pub x: f32,
    /// y coordinate.
    pub y: f32,
}

/// SMPTE ST 2086 mastering display color volume.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Smpte2086 {
    /// Red primary.
    pub primary_red: XyColor,
    /// Green primary.
    pub primary_green: XyColor,
    /// Blue primary.
    pub primary_blue: XyColor,
    /// White point.
    pub white_point: XyColor,
    /// Maximum luminance in nits.
    pub max_luminance: f32,
    /// Minimum luminance in nits.
    pub min_luminance: f32,
}

impl Smpte2086 {
    /// Size of the encoded value.
    pub const ENCODED_SIZE: usize = 10 * 4;

    /// Append to `enc`.
    pub fn encode(&self, enc: &mut Encoder) {
        for c in [
            self.primary_red,
            self.primary_green,
            self.primary_blue,
            self.white_point,
        ] {
            enc.f32(c.x).f32(c.y);
        }
        enc.f32(self.max_luminance).f32(self.min_luminance);
    }

    /// Read from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut xy = || -> Result<XyColor> {
            Ok(XyColor {
                x: dec.f32()?,
                y: dec.f32()?,
            })
        };
        let primary_red = xy()?;
        let primary_green = xy()?;
        let primary_blue = xy()?;
        let white_point = xy()?;
        Ok(Self {
            primary_red,
            primary_green,
            primary_blue,
            white_point,
            max_luminance: dec.f32()?,
            min_luminance: dec.f32()?,
        })
    }
}

/// CTA-861.3 content light levels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[allow(non_camel_case_types)]
pub struct Cta861_3 {
    /// Maximum content light level in nits.
    pub max_content_light_level: f32,
    /// Maximum frame-average light level in nits.
    pub max_frame_average_light_level: f32,
}

impl Cta861_3 {
    /// Size of the encoded value.
    pub const ENCODED_SIZE: usize = 2 * 4;

    /// Append to `enc`.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.f32(self.max_content_light_level)
            .f32(self.max_frame_average_light_level);
    }

    /// Read from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            max_content_light_level: dec.f32()?,
            max_frame_average_light_level: dec.f32()?,
        })
    }
}

/// One component of a plane layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaneLayoutComponent {
    /// Component type.
    pub component_type: ExtendableType,
    /// Offset in bits within a sample.
    pub offset_in_bits: i64,
    /// Size in bits.
    pub size_in_bits: i64,
}

/// Layout of one plane as reported through metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Components in the plane.
    pub components: Vec<PlaneLayoutComponent>,
    /// Offset of the plane within its fd.
    pub offset_in_bytes: i64,
    /// Bits between adjacent samples.
    pub sample_increment_in_bits: i64,
    /// Bytes between rows.
    pub stride_in_bytes: i64,
    /// Width in samples.
    pub width_in_samples: i64,
    /// Height in samples.
    pub height_in_samples: i64,
    /// Plane size in bytes.
    pub total_size_in_bytes: i64,
    /// Horizontal subsampling.
    pub horizontal_subsampling: i64,
    /// Vertical subsampling.
    pub vertical_subsampling: i64,
}

impl PlaneLayout {
    /// Append to `enc`.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.u64(self.components.len() as u64);
        for c in &self.components {
            c.component_type.encode(enc);
            enc.i64(c.offset_in_bits).i64(c.size_in_bits);
        }
        enc.i64(self.offset_in_bytes)
            .i64(self.sample_increment_in_bits)
            .i64(self.stride_in_bytes)
            .i64(self.width_in_samples)
            .i64(self.height_in_samples)
            .i64(self.total_size_in_bytes)
            .i64(self.horizontal_subsampling)
            .i64(self.vertical_subsampling);
    }

    /// Read from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.count(24)?;
        let components = (0..count)
            .map(|_| {
                Ok(PlaneLayoutComponent {
                    component_type: ExtendableType::decode(dec)?,
                    offset_in_bits: dec.i64()?,
                    size_in_bits: dec.i64()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            components,
            offset_in_bytes: dec.i64()?,
            sample_increment_in_bits: dec.i64()?,
            stride_in_bytes: dec.i64()?,
            width_in_samples: dec.i64()?,
            height_in_samples: dec.i64()?,
            total_size_in_bytes: dec.i64()?,
            horizontal_subsampling: dec.i64()?,
            vertical_subsampling: dec.i64()?,
        })
    }
}

// ============================================================================
// Whole-value helpers
// ============================================================================

/// Encode a `u64` value.
pub fn encode_u64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Encode an `i32` value.
pub fn encode_i32(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Encode a `u32` value.
pub fn encode_u32(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Decode a value that must be exactly one `i32`.
pub fn decode_i32(bytes: &[u8]) -> Result<i32> {
    let mut dec = Decoder::new(bytes);
    let v = dec.i32()?;
    dec.finish()?;
    Ok(v)
}

/// Decode a value that must be exactly one `u64`.
pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let v = dec.u64()?;
    dec.finish()?;
    Ok(v)
}

/// Encode a string value.
pub fn encode_string(v: &str) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.string(v);
    enc.finish()
}

/// Encode an extendable enum value.
pub fn encode_extendable(v: &ExtendableType) -> Vec<u8> {
    let mut enc = Encoder::new();
    v.encode(&mut enc);
    enc.finish()
}

/// Encode a list of plane layouts.
pub fn encode_plane_layouts(layouts: &[PlaneLayout]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.u64(layouts.len() as u64);
    for layout in layouts {
        layout.encode(&mut enc);
    }
    enc.finish()
}

/// Decode a list of plane layouts.
pub fn decode_plane_layouts(bytes: &[u8]) -> Result<Vec<PlaneLayout>> {
    let mut dec = Decoder::new(bytes);
    let count = dec.count(72)?;
    let layouts = (0..count)
        .map(|_| PlaneLayout::decode(&mut dec))
        .collect::<Result<Vec<_>>>()?;
    dec.finish()?;
    Ok(layouts)
}

/// Encode a list of crop rectangles.
pub fn encode_crop(rects: &[Rect]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.u64(rects.len() as u64);
    for rect in rects {
        rect.encode(&mut enc);
    }
    enc.finish()
}

/// Decode a list of crop rectangles.
pub fn decode_crop(bytes: &[u8]) -> Result<Vec<Rect>> {
    let mut dec = Decoder::new(bytes);
    let count = dec.count(Rect::ENCODED_SIZE)?;
    let rects = (0..count)
        .map(|_| Rect::decode(&mut dec))
        .collect::<Result<Vec<_>>>()?;
    dec.finish()?;
    Ok(rects)
}

/// Encode an optional SMPTE 2086 value. `None` is empty.
pub fn encode_smpte2086(v: Option<&Smpte2086>) -> Vec<u8> {
    let mut enc = Encoder::new();
    if let Some(v) = v {
        v.encode(&mut enc);
    }
    enc.finish()
}

/// Decode an optional SMPTE 2086 value.
pub fn decode_smpte2086(bytes: &[u8]) -> Result<Option<Smpte2086>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let mut dec = Decoder::new(bytes);
    let v = Smpte2086::decode(&mut dec)?;
    dec.finish()?;
    Ok(Some(v))
}

/// Encode an optional CTA-861.3 value. `None` is empty.
pub fn encode_cta861_3(v: Option<&Cta861_3>) -> Vec<u8> {
    let mut enc = Encoder::new();
    if let Some(v) = v {
        v.encode(&mut enc);
    }
    enc.finish()
}

/// Decode an optional CTA-861.3 value.
pub fn decode_cta861_3(bytes: &[u8]) -> Result<Option<Cta861_3>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let mut dec = Decoder::new(bytes);
    let v = Cta861_3::decode(&mut dec)?;
    dec.finish()?;
    Ok(Some(v))
}

/// Encode a list of fds as `i64`s.
pub fn encode_fds(fds: &[i64]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.u64(fds.len() as u64);
    for fd in fds {
        enc.i64(*fd);
    }
    enc.finish()
}
