//! BVH payload.
//!
//! ```text
//! u32 magic | u32 surfaceCount
//! repeat surfaceCount {
//!     u32 idLen | idBytes | u32 nodeCount
//!     preorder nodeCount { f32x6 max,min | u8 isLeaf | leaf: u32 triCount | triCount x f32x9 }
//! }
//! ```

use std::path::Path;

use crate::bvh::{Aabb, Bvh, BvhNode, NodeKind};
use crate::error::CodecError;
use crate::geometry::{Point3, Triangle};

use super::{compress, decompress, len_u32, read_file, write_file, ByteReader, ByteWriter};

pub const MAGIC: u32 = 0x4256_4831;

const NODE_HEADER: usize = 6 * 4 + 1;
const TRIANGLE_SIZE: usize = 9 * 4;

/// Exact encoded size of a payload holding `surfaces`.
pub fn encoded_size(surfaces: &[(&str, &Bvh)]) -> usize {
    let mut size = 8;
    for (id, bvh) in surfaces {
        size += 4 + id.len() + 4;
        for node in bvh.nodes() {
            size += NODE_HEADER;
            if node.is_leaf() {
                size += 4 + node.triangles().len() * TRIANGLE_SIZE;
            }
        }
    }
    size
}

fn write_point(w: &mut ByteWriter, p: Point3) {
    w.f32(p.x as f32);
    w.f32(p.y as f32);
    w.f32(p.z as f32);
}

fn read_point(r: &mut ByteReader<'_>) -> Result<Point3, CodecError> {
    Ok(Point3::new(r.f32()? as f64, r.f32()? as f64, r.f32()? as f64))
}

/// Encodes `surfaces` without compression.
pub fn encode(surfaces: &[(&str, &Bvh)]) -> Result<Vec<u8>, CodecError> {
    let mut w = ByteWriter::with_exact_size(encoded_size(surfaces));
    w.u32(MAGIC);
    w.u32(len_u32("surface count", surfaces.len())?);
    for (id, bvh) in surfaces {
        w.string("surface id", id)?;
        w.u32(len_u32("node count", bvh.nodes().len())?);
        for (index, _) in bvh.preorder() {
            let node = &bvh.nodes()[index];
            write_point(&mut w, node.bounds.max);
            write_point(&mut w, node.bounds.min);
            match &node.kind {
                NodeKind::Leaf { triangles } => {
                    w.u8(1);
                    w.u32(len_u32("triangle count", triangles.len())?);
                    for t in triangles {
                        for v in t.vertices() {
                            write_point(&mut w, v);
                        }
                    }
                }
                NodeKind::Internal { .. } => w.u8(0),
            }
        }
    }
    w.finish()
}

/// Child slot awaiting the next node in preorder.
#[derive(Clone, Copy)]
enum Slot {
    Left(usize),
    Right(usize),
}

fn decode_tree(r: &mut ByteReader<'_>) -> Result<Bvh, CodecError> {
    let count_offset = r.offset();
    let declared = r.count("node", NODE_HEADER)?;
    if declared == 0 {
        return Ok(Bvh::default());
    }
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(declared);
    let mut pending: Vec<Slot> = Vec::new();
    let mut slot: Option<Slot> = None;
    loop {
        if nodes.len() == declared {
            return Err(CodecError::CountMismatch {
                what: "node",
                offset: count_offset,
                declared,
                actual: nodes.len() + pending.len() + 1,
            });
        }
        let max = read_point(r)?;
        let min = read_point(r)?;
        let bounds = Aabb::new(min, max);
        let flag_offset = r.offset();
        let index = nodes.len();
        let kind = match r.u8()? {
            1 => {
                let n = r.count("triangle", TRIANGLE_SIZE)?;
                let mut triangles = Vec::with_capacity(n);
                for _ in 0..n {
                    triangles.push(Triangle::new(read_point(r)?, read_point(r)?, read_point(r)?));
                }
                NodeKind::Leaf { triangles }
            }
            0 => {
                pending.push(Slot::Right(index));
                pending.push(Slot::Left(index));
                NodeKind::Internal {
                    axis: bounds.longest_axis(),
                    left: 0,
                    right: 0,
                }
            }
            tag => {
                return Err(CodecError::InvalidTag {
                    what: "node leaf flag",
                    tag,
                    offset: flag_offset,
                })
            }
        };
        nodes.push(BvhNode { bounds, kind });
        match slot {
            Some(Slot::Left(parent)) => {
                if let NodeKind::Internal { left, .. } = &mut nodes[parent].kind {
                    *left = index;
                }
            }
            Some(Slot::Right(parent)) => {
                if let NodeKind::Internal { right, .. } = &mut nodes[parent].kind {
                    *right = index;
                }
            }
            None => {}
        }
        match pending.pop() {
            Some(next) => slot = Some(next),
            None => break,
        }
    }
    if nodes.len() != declared {
        return Err(CodecError::CountMismatch {
            what: "node",
            offset: count_offset,
            declared,
            actual: nodes.len(),
        });
    }
    Ok(Bvh::from_nodes(nodes))
}

/// Decodes an uncompressed payload.
pub fn decode(bytes: &[u8]) -> Result<Vec<(String, Bvh)>, CodecError> {
    let mut r = ByteReader::new(bytes);
    r.magic(MAGIC)?;
    let count = r.count("surface", 8)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let id = r.string("surface id")?;
        let bvh = decode_tree(&mut r)?;
        out.push((id, bvh));
    }
    r.finish()?;
    Ok(out)
}

/// Encodes and gzip-compresses `surfaces`.
pub fn serialize(surfaces: &[(&str, &Bvh)]) -> Result<Vec<u8>, CodecError> {
    let raw = encode(surfaces)?;
    let packed = compress(&raw)?;
    log::debug!(
        "bvh payload: {} surfaces, {} bytes raw, {} compressed",
        surfaces.len(),
        raw.len(),
        packed.len()
    );
    Ok(packed)
}

pub fn deserialize(bytes: &[u8]) -> Result<Vec<(String, Bvh)>, CodecError> {
    decode(&decompress(bytes)?)
}

pub fn write_bvh_file(path: &Path, surfaces: &[(&str, &Bvh)]) -> Result<(), CodecError> {
    write_file(path, &serialize(surfaces)?)
}

pub fn read_bvh_file(path: &Path) -> Result<Vec<(String, Bvh)>, CodecError> {
    deserialize(&read_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BvhConfig;

    fn strip(n: usize) -> Vec<Triangle> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                Triangle::new(
                    Point3::new(x, 0.0, 0.5),
                    Point3::new(x + 1.0, 0.0, 0.25),
                    Point3::new(x, 1.0, 1.0),
                )
            })
            .collect()
    }

    fn tree(n: usize, leaf: usize) -> Bvh {
        let config = BvhConfig {
            max_leaf_size: leaf,
            ..BvhConfig::default()
        };
        Bvh::build(strip(n), &config)
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let bvh = tree(37, 4);
        let bytes = encode(&[("ground", &bvh)]).unwrap();
        assert_eq!(bytes.len(), encoded_size(&[("ground", &bvh)]));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "ground");
        let back = &decoded[0].1;
        assert_eq!(back.stats(), bvh.stats());
        // Coordinates are exactly representable as f32.
        let original: Vec<_> = bvh.triangles().collect();
        let restored: Vec<_> = back.triangles().collect();
        assert_eq!(original, restored);
        assert_eq!(back.root_bounds(), bvh.root_bounds());
    }

    #[test]
    fn empty_tree_roundtrips() {
        let empty = Bvh::default();
        let decoded = decode(&encode(&[("none", &empty)]).unwrap()).unwrap();
        assert!(decoded[0].1.is_empty());
    }

    #[test]
    fn bad_leaf_flag_is_rejected() {
        let bvh = tree(3, 4);
        let mut bytes = encode(&[("s", &bvh)]).unwrap();
        // magic, count, id len, id, node count, 24 bytes of bounds
        let flag = 4 + 4 + 4 + 1 + 4 + 24;
        bytes[flag] = 7;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::InvalidTag { tag: 7, offset, .. }) if offset == flag
        ));
    }

    #[test]
    fn node_count_mismatch_is_rejected() {
        let bvh = tree(9, 2);
        let mut bytes = encode(&[("s", &bvh)]).unwrap();
        let count_at = 4 + 4 + 4 + 1;
        let declared = u32::from_le_bytes(bytes[count_at..count_at + 4].try_into().unwrap());
        bytes[count_at..count_at + 4].copy_from_slice(&(declared - 1).to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::CountMismatch { what: "node", .. })
        ));
    }
}
