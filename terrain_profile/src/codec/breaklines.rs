//! Break-line payload.
//!
//! ```text
//! u32 magic | u32 surfaceCount
//! repeat surfaceCount { u32 idLen | idBytes | u32 edgeCount | edgeCount x (f32x6 | u8 kind) }
//! ```

use std::path::Path;

use crate::breakline::{BreakLineEdge, BreakLineKind};
use crate::error::CodecError;
use crate::geometry::Point3;

use super::{compress, decompress, len_u32, read_file, write_file, ByteReader, ByteWriter};

pub const MAGIC: u32 = 0x4252_4B31;

const EDGE_SIZE: usize = 6 * 4 + 1;

fn kind_tag(kind: BreakLineKind) -> u8 {
    match kind {
        BreakLineKind::Boundary => 0,
        BreakLineKind::Dihedral => 1,
    }
}

pub fn encoded_size(surfaces: &[(&str, &[BreakLineEdge])]) -> usize {
    8 + surfaces
        .iter()
        .map(|(id, edges)| 4 + id.len() + 4 + edges.len() * EDGE_SIZE)
        .sum::<usize>()
}

pub fn encode(surfaces: &[(&str, &[BreakLineEdge])]) -> Result<Vec<u8>, CodecError> {
    let mut w = ByteWriter::with_exact_size(encoded_size(surfaces));
    w.u32(MAGIC);
    w.u32(len_u32("surface count", surfaces.len())?);
    for (id, edges) in surfaces {
        w.string("surface id", id)?;
        w.u32(len_u32("edge count", edges.len())?);
        for e in edges.iter() {
            for v in [e.start.x, e.start.y, e.start.z, e.end.x, e.end.y, e.end.z] {
                w.f32(v as f32);
            }
            w.u8(kind_tag(e.kind));
        }
    }
    w.finish()
}

pub fn decode(bytes: &[u8]) -> Result<Vec<(String, Vec<BreakLineEdge>)>, CodecError> {
    let mut r = ByteReader::new(bytes);
    r.magic(MAGIC)?;
    let count = r.count("surface", 8)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let id = r.string("surface id")?;
        let n = r.count("edge", EDGE_SIZE)?;
        let mut edges = Vec::with_capacity(n);
        for _ in 0..n {
            let mut c = [0f64; 6];
            for v in &mut c {
                *v = r.f32()? as f64;
            }
            let offset = r.offset();
            let kind = match r.u8()? {
                0 => BreakLineKind::Boundary,
                1 => BreakLineKind::Dihedral,
                tag => {
                    return Err(CodecError::InvalidTag {
                        what: "break-line kind",
                        tag,
                        offset,
                    })
                }
            };
            edges.push(BreakLineEdge::new(
                Point3::new(c[0], c[1], c[2]),
                Point3::new(c[3], c[4], c[5]),
                kind,
            ));
        }
        out.push((id, edges));
    }
    r.finish()?;
    Ok(out)
}

pub fn serialize(surfaces: &[(&str, &[BreakLineEdge])]) -> Result<Vec<u8>, CodecError> {
    compress(&encode(surfaces)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<Vec<(String, Vec<BreakLineEdge>)>, CodecError> {
    decode(&decompress(bytes)?)
}

pub fn write_break_lines_file(path: &Path, surfaces: &[(&str, &[BreakLineEdge])]) -> Result<(), CodecError> {
    write_file(path, &serialize(surfaces)?)
}

pub fn read_break_lines_file(path: &Path) -> Result<Vec<(String, Vec<BreakLineEdge>)>, CodecError> {
    deserialize(&read_file(path)?)
}
