//! Auxiliary blob payload for named per-surface arrays.
//!
//! ```text
//! u32 magic | u32 blobCount
//! repeat blobCount { u32 idLen | id | u32 nameLen | name | u8 kind | u32 count | payload }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

use super::{compress, decompress, len_u32, read_file, write_file, ByteReader, ByteWriter};

pub const MAGIC: u32 = 0x4155_5831;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuxData {
    Bytes(Vec<u8>),
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl AuxData {
    fn kind(&self) -> u8 {
        match self {
            AuxData::Bytes(_) => 0,
            AuxData::F32(_) => 1,
            AuxData::U32(_) => 2,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AuxData::Bytes(v) => v.len(),
            AuxData::F32(v) => v.len(),
            AuxData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_size(&self) -> usize {
        match self {
            AuxData::Bytes(_) => 1,
            AuxData::F32(_) | AuxData::U32(_) => 4,
        }
    }
}

/// Named array attached to a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxBlob {
    pub surface_id: String,
    pub name: String,
    pub data: AuxData,
}

fn encoded_size(blobs: &[AuxBlob]) -> usize {
    8 + blobs
        .iter()
        .map(|b| 4 + b.surface_id.len() + 4 + b.name.len() + 1 + 4 + b.data.len() * b.data.element_size())
        .sum::<usize>()
}

pub fn encode(blobs: &[AuxBlob]) -> Result<Vec<u8>, CodecError> {
    let mut w = ByteWriter::with_exact_size(encoded_size(blobs));
    w.u32(MAGIC);
    w.u32(len_u32("blob count", blobs.len())?);
    for b in blobs {
        w.string("surface id", &b.surface_id)?;
        w.string("blob name", &b.name)?;
        w.u8(b.data.kind());
        w.u32(len_u32("blob elements", b.data.len())?);
        match &b.data {
            AuxData::Bytes(v) => w.bytes(v),
            AuxData::F32(v) => w.f32_slice(v),
            AuxData::U32(v) => w.u32_slice(v),
        }
    }
    w.finish()
}

pub fn decode(bytes: &[u8]) -> Result<Vec<AuxBlob>, CodecError> {
    let mut r = ByteReader::new(bytes);
    r.magic(MAGIC)?;
    let count = r.count("blob", 13)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let surface_id = r.string("surface id")?;
        let name = r.string("blob name")?;
        let kind_offset = r.offset();
        let data = match r.u8()? {
            0 => {
                let n = r.count("blob bytes", 1)?;
                AuxData::Bytes(r.take(n)?.to_vec())
            }
            1 => AuxData::F32(r.f32_vec("blob f32 elements")?),
            2 => AuxData::U32(r.u32_vec("blob u32 elements")?),
            tag => {
                return Err(CodecError::InvalidTag {
                    what: "blob kind",
                    tag,
                    offset: kind_offset,
                })
            }
        };
        out.push(AuxBlob {
            surface_id,
            name,
            data,
        });
    }
    r.finish()?;
    Ok(out)
}

pub fn serialize(blobs: &[AuxBlob]) -> Result<Vec<u8>, CodecError> {
    compress(&encode(blobs)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<Vec<AuxBlob>, CodecError> {
    decode(&decompress(bytes)?)
}

pub fn write_blob_file(path: &Path, blobs: &[AuxBlob]) -> Result<(), CodecError> {
    write_file(path, &serialize(blobs)?)
}

pub fn read_blob_file(path: &Path) -> Result<Vec<AuxBlob>, CodecError> {
    deserialize(&read_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_kinds() {
        let blobs = vec![
            AuxBlob {
                surface_id: "s1".into(),
                name: "flags".into(),
                data: AuxData::Bytes(vec![1, 2, 3]),
            },
            AuxBlob {
                surface_id: "s1".into(),
                name: "slope".into(),
                data: AuxData::F32(vec![0.5, 1.25]),
            },
            AuxBlob {
                surface_id: "s2".into(),
                name: "ids".into(),
                data: AuxData::U32(vec![]),
            },
        ];
        let back = deserialize(&serialize(&blobs).unwrap()).unwrap();
        assert_eq!(back, blobs);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&[]).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::BadMagic { offset: 0, expected: MAGIC, .. })
        ));
    }

    #[test]
    fn invalid_utf8_name_is_rejected() {
        let blobs = [AuxBlob {
            surface_id: "s".into(),
            name: "n".into(),
            data: AuxData::Bytes(vec![]),
        }];
        let mut bytes = encode(&blobs).unwrap();
        // magic, count, id len, "s", name len
        bytes[4 + 4 + 4 + 1 + 4] = 0xff;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::InvalidUtf8 { what: "blob name", offset: 17 })
        ));
    }
}
