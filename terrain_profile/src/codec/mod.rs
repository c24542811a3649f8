//! Binary payloads for persisting surface indexes and derived data.
//!
//! Every payload is little-endian, starts with a four byte magic number and
//! is stored gzip-compressed. Encoders compute the exact encoded size up
//! front and fail if the bytes written disagree with it. Decoders check every
//! declared count against the bytes actually available and reject trailing
//! data.

pub mod blob;
pub mod breaklines;
pub mod bvh;
pub mod geometry;

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::breakline::BreakLineEdge;
use crate::bvh::Bvh;
use crate::error::CodecError;

pub use blob::{AuxBlob, AuxData};
pub use geometry::{GeometryBundle, GeometryEntity};

/// Surface to persist: id, index and break-lines.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceDescriptor<'a> {
    pub id: &'a str,
    pub bvh: &'a Bvh,
    pub break_lines: &'a [BreakLineEdge],
}

/// Surface restored from a pair of BVH and break-line payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSurface {
    pub id: String,
    pub bvh: Bvh,
    pub break_lines: Vec<BreakLineEdge>,
}

/// Encodes `surfaces` into gzip-compressed BVH and break-line payloads.
pub fn serialize_surfaces(surfaces: &[SurfaceDescriptor<'_>]) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
    let trees: Vec<(&str, &Bvh)> = surfaces.iter().map(|s| (s.id, s.bvh)).collect();
    let lines: Vec<(&str, &[BreakLineEdge])> = surfaces.iter().map(|s| (s.id, s.break_lines)).collect();
    Ok((bvh::serialize(&trees)?, breaklines::serialize(&lines)?))
}

/// Decodes a pair of payloads written by [`serialize_surfaces`]. Surfaces
/// without break-lines in the second payload get an empty list.
pub fn deserialize_surfaces(bvh_bytes: &[u8], break_line_bytes: &[u8]) -> Result<Vec<LoadedSurface>, CodecError> {
    let trees = bvh::deserialize(bvh_bytes)?;
    let mut lines = breaklines::deserialize(break_line_bytes)?;
    Ok(trees
        .into_iter()
        .map(|(id, bvh)| {
            let break_lines = lines
                .iter()
                .position(|(lid, _)| *lid == id)
                .map(|i| lines.swap_remove(i).1)
                .unwrap_or_default();
            LoadedSurface { id, bvh, break_lines }
        })
        .collect())
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2 + 64), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CodecError> {
    fs::write(path, bytes)?;
    log::info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, CodecError> {
    Ok(fs::read(path)?)
}

/// Length of a collection as a `u32` prefix.
pub(crate) fn len_u32(what: &'static str, len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge { what, len })
}

/// Fixed-capacity little-endian writer.
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
    expected: usize,
}

impl ByteWriter {
    pub fn with_exact_size(expected: usize) -> Self {
        Self {
            buf: Vec::with_capacity(expected),
            expected,
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed byte string.
    pub fn string(&mut self, what: &'static str, v: &str) -> Result<(), CodecError> {
        self.u32(len_u32(what, v.len())?);
        self.bytes(v.as_bytes());
        Ok(())
    }

    pub fn f32_slice(&mut self, values: &[f32]) {
        for v in values {
            self.f32(*v);
        }
    }

    pub fn u32_slice(&mut self, values: &[u32]) {
        for v in values {
            self.u32(*v);
        }
    }

    /// Returns the buffer if exactly the precomputed number of bytes was
    /// written.
    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        if self.buf.len() != self.expected {
            return Err(CodecError::SizeMismatch {
                expected: self.expected,
                written: self.buf.len(),
            });
        }
        Ok(self.buf)
    }
}

/// Bounds-checked little-endian reader tracking its offset.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn magic(&mut self, expected: u32) -> Result<(), CodecError> {
        let offset = self.pos;
        let found = self.u32()?;
        if found != expected {
            return Err(CodecError::BadMagic {
                offset,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Reads a declared element count and checks that `count * elem_size`
    /// bytes are still available.
    pub fn count(&mut self, what: &'static str, elem_size: usize) -> Result<usize, CodecError> {
        let offset = self.pos;
        let declared = self.u32()? as usize;
        let needed = declared.saturating_mul(elem_size);
        if needed > self.remaining() {
            return Err(CodecError::CountMismatch {
                what,
                offset,
                declared,
                actual: self.remaining() / elem_size.max(1),
            });
        }
        Ok(declared)
    }

    pub fn string(&mut self, what: &'static str) -> Result<String, CodecError> {
        let len = self.count(what, 1)?;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { what, offset })
    }

    pub fn f32_vec(&mut self, what: &'static str) -> Result<Vec<f32>, CodecError> {
        let n = self.count(what, 4)?;
        (0..n).map(|_| self.f32()).collect()
    }

    pub fn u32_vec(&mut self, what: &'static str) -> Result<Vec<u32>, CodecError> {
        let n = self.count(what, 4)?;
        (0..n).map(|_| self.u32()).collect()
    }

    /// Fails if any bytes are left.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() > 0 {
            return Err(CodecError::TrailingBytes {
                offset: self.pos,
                count: self.remaining(),
            });
        }
        Ok(())
    }
}
