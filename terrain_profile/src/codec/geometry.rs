//! Geometry payload: finished mesh buffers per entity plus JSON metadata.
//!
//! ```text
//! u32 magic | u32 metaLen | metaJson | u32 entityCount
//! repeat entityCount {
//!     u32 idLen | idBytes | u32 flags | u32 posLen | f32 x posLen
//!     [u32 nrmLen | f32..] [u32 colLen | f32..] [u32 uvLen | f32..] [u32 idxLen | u32..]
//! }
//! ```
//!
//! `flags` bits 0 to 3 mark which optional buffers follow, in that order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, GeometryError};
use crate::geometry::{triangles_from_positions, Triangle};

use super::{compress, decompress, len_u32, read_file, write_file, ByteReader, ByteWriter};

pub const MAGIC: u32 = 0x4745_4F31;

const HAS_NORMALS: u32 = 1;
const HAS_COLORS: u32 = 1 << 1;
const HAS_UVS: u32 = 1 << 2;
const HAS_INDICES: u32 = 1 << 3;

/// Buffers of one mesh entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryEntity {
    pub id: String,
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub colors: Option<Vec<f32>>,
    pub uvs: Option<Vec<f32>>,
    pub indices: Option<Vec<u32>>,
}

impl GeometryEntity {
    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.normals.is_some() {
            flags |= HAS_NORMALS;
        }
        if self.colors.is_some() {
            flags |= HAS_COLORS;
        }
        if self.uvs.is_some() {
            flags |= HAS_UVS;
        }
        if self.indices.is_some() {
            flags |= HAS_INDICES;
        }
        flags
    }

    fn encoded_size(&self) -> usize {
        let opt = |v: &Option<Vec<f32>>| v.as_ref().map_or(0, |v| 4 + v.len() * 4);
        4 + self.id.len()
            + 4
            + 4
            + self.positions.len() * 4
            + opt(&self.normals)
            + opt(&self.colors)
            + opt(&self.uvs)
            + self.indices.as_ref().map_or(0, |v| 4 + v.len() * 4)
    }

    /// Triangles of the entity. Indexed entities are expanded through their
    /// index buffer; out-of-range indices are skipped.
    pub fn triangles(&self) -> Result<Vec<Triangle>, GeometryError> {
        match &self.indices {
            None => triangles_from_positions(&self.positions),
            Some(indices) => {
                let vertex_count = self.positions.len() / 3;
                let mut flat = Vec::with_capacity(indices.len() * 3);
                for tri in indices.chunks_exact(3) {
                    if tri.iter().any(|&i| i as usize >= vertex_count) {
                        log::trace!("skipping indexed triangle with out-of-range vertex");
                        continue;
                    }
                    for &i in tri {
                        let i = i as usize * 3;
                        flat.extend_from_slice(&self.positions[i..i + 3]);
                    }
                }
                triangles_from_positions(&flat)
            }
        }
    }
}

/// Metadata plus entities; the unit stored in one geometry payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryBundle {
    pub metadata: serde_json::Value,
    pub entities: Vec<GeometryEntity>,
}

pub fn encode(bundle: &GeometryBundle) -> Result<Vec<u8>, CodecError> {
    let meta = serde_json::to_vec(&bundle.metadata)?;
    let size = 4 + 4 + meta.len() + 4 + bundle.entities.iter().map(GeometryEntity::encoded_size).sum::<usize>();
    let mut w = ByteWriter::with_exact_size(size);
    w.u32(MAGIC);
    w.u32(len_u32("metadata", meta.len())?);
    w.bytes(&meta);
    w.u32(len_u32("entity count", bundle.entities.len())?);
    for e in &bundle.entities {
        w.string("entity id", &e.id)?;
        w.u32(e.flags());
        w.u32(len_u32("positions", e.positions.len())?);
        w.f32_slice(&e.positions);
        for buf in [&e.normals, &e.colors, &e.uvs].into_iter().flatten() {
            w.u32(len_u32("attribute", buf.len())?);
            w.f32_slice(buf);
        }
        if let Some(indices) = &e.indices {
            w.u32(len_u32("indices", indices.len())?);
            w.u32_slice(indices);
        }
    }
    w.finish()
}

fn optional_f32(r: &mut ByteReader<'_>, present: bool, what: &'static str) -> Result<Option<Vec<f32>>, CodecError> {
    if present {
        r.f32_vec(what).map(Some)
    } else {
        Ok(None)
    }
}

pub fn decode(bytes: &[u8]) -> Result<GeometryBundle, CodecError> {
    let mut r = ByteReader::new(bytes);
    r.magic(MAGIC)?;
    let meta_len = r.count("metadata", 1)?;
    let metadata = serde_json::from_slice(r.take(meta_len)?)?;
    let count = r.count("entity", 12)?;
    let mut entities = Vec::with_capacity(count);
    for _ in 0..count {
        let id = r.string("entity id")?;
        let flag_offset = r.offset();
        let flags = r.u32()?;
        if flags & !(HAS_NORMALS | HAS_COLORS | HAS_UVS | HAS_INDICES) != 0 {
            return Err(CodecError::InvalidTag {
                what: "geometry flags",
                tag: (flags & 0xff) as u8,
                offset: flag_offset,
            });
        }
        let positions = r.f32_vec("positions")?;
        let normals = optional_f32(&mut r, flags & HAS_NORMALS != 0, "normals")?;
        let colors = optional_f32(&mut r, flags & HAS_COLORS != 0, "colors")?;
        let uvs = optional_f32(&mut r, flags & HAS_UVS != 0, "uvs")?;
        let indices = if flags & HAS_INDICES != 0 {
            Some(r.u32_vec("indices")?)
        } else {
            None
        };
        entities.push(GeometryEntity {
            id,
            positions,
            normals,
            colors,
            uvs,
            indices,
        });
    }
    r.finish()?;
    Ok(GeometryBundle { metadata, entities })
}

pub fn serialize(bundle: &GeometryBundle) -> Result<Vec<u8>, CodecError> {
    compress(&encode(bundle)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<GeometryBundle, CodecError> {
    decode(&decompress(bytes)?)
}

pub fn write_geometry_file(path: &Path, bundle: &GeometryBundle) -> Result<(), CodecError> {
    write_file(path, &serialize(bundle)?)
}

pub fn read_geometry_file(path: &Path) -> Result<GeometryBundle, CodecError> {
    deserialize(&read_file(path)?)
}
