//! LCR: single-band classified land-cover raster with georeferencing.
//!
//! - Stores one u8 band in row-major order, row 0 being the northernmost row.
//! - Georeferencing: top-left origin in ground units, square pixel resolution,
//!   optional CRS identifier string (copied through, never interpreted).
//! - Nodata is an explicit byte in the header (0 by convention upstream).
//! - Band payload is Raw or RLE encoded.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"LCR1"
//!   04  : u32     version = 1
//!   08  : u32     flags (bitfield)
//!                 bit 0 => CRS string present
//!                 bit 1 => band is RLE encoded
//!   0C  : u32     width  (pixels, >= 1)
//!   10  : u32     height (pixels, >= 1)
//!   14  : u8      nodata
//!   15  : f64     resolution (ground units per pixel, > 0)
//!   1D  : f64     origin_x   (west edge of pixel column 0)
//!   25  : f64     origin_y   (north edge of pixel row 0)
//!   ..  : u16 len + UTF-8 bytes            (if bit0)
//!   ..  : u32 payload_size + payload bytes (raw w*h, or RLE)
//!
//! RLE format: repeated [u16 run_len][u8 value] (little-endian)

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const LCR_MAGIC: [u8; 4] = *b"LCR1";
pub const LCR_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LcrEncoding {
    Raw = 0,
    Rle = 1,
}

#[derive(Debug, Clone)]
pub struct LcrRaster {
    pub width: u32,
    pub height: u32,
    pub nodata: u8,
    /// Ground units per pixel, identical in both axes.
    pub resolution: f64,
    /// West edge of column 0.
    pub origin_x: f64,
    /// North edge of row 0.
    pub origin_y: f64,
    /// Spatial reference identifier, e.g. "EPSG:2180". Copy-through only.
    pub crs: Option<String>,
    pub encoding: LcrEncoding,
    /// Raw row-major band if `Raw`; RLE payload if `Rle`.
    pub data: Vec<u8>,
}

impl LcrRaster {
    /// Number of pixels in the band (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Decode the band payload into a raw row-major byte grid of exactly
    /// `width * height` bytes.
    pub fn band(&self) -> io::Result<Vec<u8>> {
        let raw = match self.encoding {
            LcrEncoding::Raw => self.data.clone(),
            LcrEncoding::Rle => rle_decode(&self.data)?,
        };

        if raw.len() != self.pixel_count() {
            return Err(bad("band size does not match width*height"));
        }

        Ok(raw)
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated LCR"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse LCR from a contiguous byte slice. This is the single source of truth for parsing.
pub fn parse_lcr_bytes(mut p: &[u8]) -> io::Result<LcrRaster> {
    // Header
    if take(&mut p, 4)? != b"LCR1" {
        return Err(bad("bad LCR magic"));
    }

    let version = le_u32(&mut p)?;
    if version != LCR_VERSION {
        return Err(bad("unsupported LCR version"));
    }

    let flags = le_u32(&mut p)?;
    let has_crs = (flags & (1 << 0)) != 0;
    let is_rle = (flags & (1 << 1)) != 0;

    let width = le_u32(&mut p)?;
    let height = le_u32(&mut p)?;
    if width == 0 || height == 0 {
        return Err(bad("raster dimensions must be >= 1"));
    }

    let nodata = le_u8(&mut p)?;

    let resolution = le_f64(&mut p)?;
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(bad("resolution must be a positive finite value"));
    }

    let origin_x = le_f64(&mut p)?;
    let origin_y = le_f64(&mut p)?;
    if !origin_x.is_finite() || !origin_y.is_finite() {
        return Err(bad("origin must be finite"));
    }

    let crs = if has_crs {
        let len = le_u16(&mut p)? as usize;
        let raw = take(&mut p, len)?;
        let s = std::str::from_utf8(raw).map_err(|_| bad("CRS string is not UTF-8"))?;
        Some(s.to_owned())
    } else {
        None
    };

    let payload_size = le_u32(&mut p)? as usize;
    let data = take(&mut p, payload_size)?.to_vec();

    let encoding = if is_rle {
        LcrEncoding::Rle
    } else {
        // Raw band must be exactly one byte per pixel.
        let expect = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| bad("pixel count overflow"))?;
        if data.len() != expect {
            return Err(bad("raw band size does not match width*height"));
        }
        LcrEncoding::Raw
    };

    Ok(LcrRaster {
        width,
        height,
        nodata,
        resolution,
        origin_x,
        origin_y,
        crs,
        encoding,
        data,
    })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<LcrRaster> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_lcr_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<LcrRaster> {
    let bytes = std::fs::read(path)?;
    parse_lcr_bytes(&bytes)
}

/// Serialize a raster to its on-disk byte layout.
pub fn lcr_bytes(raster: &LcrRaster) -> io::Result<Vec<u8>> {
    let mut flags = 0u32;

    if raster.crs.is_some() {
        flags |= 1 << 0;
    }

    if raster.encoding == LcrEncoding::Rle {
        flags |= 1 << 1;
    }

    if raster.width == 0 || raster.height == 0 {
        return Err(bad("raster dimensions must be >= 1"));
    }

    if raster.encoding == LcrEncoding::Raw && raster.data.len() != raster.pixel_count() {
        return Err(bad("raw band size does not match width*height"));
    }

    let mut out = Vec::with_capacity(0x2D + raster.data.len());

    out.extend_from_slice(&LCR_MAGIC);
    out.extend_from_slice(&LCR_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());

    out.extend_from_slice(&raster.width.to_le_bytes());
    out.extend_from_slice(&raster.height.to_le_bytes());
    out.push(raster.nodata);

    out.extend_from_slice(&raster.resolution.to_le_bytes());
    out.extend_from_slice(&raster.origin_x.to_le_bytes());
    out.extend_from_slice(&raster.origin_y.to_le_bytes());

    if let Some(crs) = raster.crs.as_deref() {
        if crs.len() > u16::MAX as usize {
            return Err(bad("CRS string too long"));
        }
        out.extend_from_slice(&(crs.len() as u16).to_le_bytes());
        out.extend_from_slice(crs.as_bytes());
    }

    out.extend_from_slice(&(raster.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&raster.data);

    Ok(out)
}

pub fn write_file<P: AsRef<Path>>(path: P, raster: &LcrRaster) -> io::Result<()> {
    let bytes = lcr_bytes(raster)?;

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;

    Ok(())
}

pub fn rle_encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(raw.len() / 2);
    if raw.is_empty() {
        return out;
    }

    let mut i = 0usize;
    while i < raw.len() {
        let value = raw[i];
        let mut run_length = 1usize;

        while i + run_length < raw.len()
            && raw[i + run_length] == value
            && run_length < u16::MAX as usize
        {
            run_length += 1;
        }

        out.extend_from_slice(&(run_length as u16).to_le_bytes());
        out.push(value);
        i += run_length;
    }

    out
}

pub fn rle_decode(rle: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::<u8>::new();
    let mut i = 0usize;

    while i + 3 <= rle.len() {
        let run = u16::from_le_bytes([rle[i], rle[i + 1]]) as usize;
        let v = rle[i + 2];
        out.resize(out.len() + run, v);
        i += 3;
    }

    if i != rle.len() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "RLE payload truncated",
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LcrRaster {
        LcrRaster {
            width: 4,
            height: 3,
            nodata: 0,
            resolution: 1.0,
            origin_x: 350_000.0,
            origin_y: 570_000.5,
            crs: Some("EPSG:2180".to_owned()),
            encoding: LcrEncoding::Raw,
            data: vec![0, 1, 1, 2, 0, 0, 7, 7, 5, 5, 5, 0],
        }
    }

    #[test]
    fn test_roundtrip_raw() {
        let raster = sample();
        let bytes = lcr_bytes(&raster).unwrap();
        let parsed = parse_lcr_bytes(&bytes).unwrap();

        assert_eq!(parsed.width, 4);
        assert_eq!(parsed.height, 3);
        assert_eq!(parsed.nodata, 0);
        assert_eq!(parsed.resolution, 1.0);
        assert_eq!(parsed.origin_x, 350_000.0);
        assert_eq!(parsed.origin_y, 570_000.5);
        assert_eq!(parsed.crs.as_deref(), Some("EPSG:2180"));
        assert_eq!(parsed.band().unwrap(), raster.data);
    }

    #[test]
    fn test_roundtrip_rle() {
        let mut raster = sample();
        let raw = raster.data.clone();
        raster.data = rle_encode(&raw);
        raster.encoding = LcrEncoding::Rle;

        let bytes = lcr_bytes(&raster).unwrap();
        let parsed = parse_lcr_bytes(&bytes).unwrap();

        assert_eq!(parsed.encoding, LcrEncoding::Rle);
        assert_eq!(parsed.band().unwrap(), raw);
    }

    #[test]
    fn test_rle_codec_runs() {
        let raw = [3u8, 3, 3, 3, 0, 0, 9];
        let rle = rle_encode(&raw);
        assert_eq!(rle, vec![4, 0, 3, 2, 0, 0, 1, 0, 9]);
        assert_eq!(rle_decode(&rle).unwrap(), raw);
    }

    #[test]
    fn test_rle_truncated_payload() {
        assert!(rle_decode(&[2, 0]).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = lcr_bytes(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(parse_lcr_bytes(&bytes).is_err());
    }

    #[test]
    fn test_raw_band_size_mismatch() {
        let mut raster = sample();
        raster.data.pop();
        assert!(lcr_bytes(&raster).is_err());
    }

    #[test]
    fn test_no_crs() {
        let mut raster = sample();
        raster.crs = None;
        let parsed = parse_lcr_bytes(&lcr_bytes(&raster).unwrap()).unwrap();
        assert_eq!(parsed.crs, None);
    }

    #[test]
    fn test_rejects_nonpositive_resolution() {
        let mut raster = sample();
        raster.resolution = 0.0;
        let bytes = lcr_bytes(&raster).unwrap();
        assert!(parse_lcr_bytes(&bytes).is_err());
    }
}
