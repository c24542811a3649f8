use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use terrain_profile::{
    breakline::{detect_break_lines, BreakLineConfig},
    bvh::{Bvh, BvhConfig},
    codec::{self, blob, breaklines, bvh as bvh_codec, geometry, AuxBlob, AuxData, GeometryBundle, GeometryEntity, SurfaceDescriptor},
    error::CodecError,
    geometry::{Point3, Triangle},
};

fn terrain(n: usize) -> Vec<Triangle> {
    let z = |x: f64, y: f64| (x * 0.37).sin() * 3.1 + (y * 0.21).cos() * 1.7;
    let mut tris = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let (x, y) = (i as f64 * 1.3, j as f64 * 0.9);
            let (x1, y1) = (x + 1.3, y + 0.9);
            let a = Point3::new(x, y, z(x, y));
            let b = Point3::new(x1, y, z(x1, y));
            let c = Point3::new(x1, y1, z(x1, y1));
            let d = Point3::new(x, y1, z(x, y1));
            tris.push(Triangle::new(a, b, c));
            tris.push(Triangle::new(a, c, d));
        }
    }
    tris
}

fn close(a: Point3, b: Point3) -> bool {
    (a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5 && (a.z - b.z).abs() < 1e-5 * a.z.abs().max(1.0)
}

#[test]
fn surfaces_roundtrip_through_files() {
    let tris = terrain(12);
    let lines = detect_break_lines(&tris, &BreakLineConfig { angle_threshold_deg: 5.0, ..BreakLineConfig::default() });
    let tree = Bvh::build(tris, &BvhConfig { max_leaf_size: 16, ..BvhConfig::default() });
    let empty = Bvh::default();

    let dir = tempfile::tempdir().unwrap();
    let bvh_path = dir.path().join("surfaces.bvh");
    let brk_path = dir.path().join("surfaces.brk");
    let (bvh_bytes, brk_bytes) = codec::serialize_surfaces(&[
        SurfaceDescriptor { id: "terrain", bvh: &tree, break_lines: &lines },
        SurfaceDescriptor { id: "empty", bvh: &empty, break_lines: &[] },
    ])
    .unwrap();
    std::fs::write(&bvh_path, &bvh_bytes).unwrap();
    std::fs::write(&brk_path, &brk_bytes).unwrap();

    let loaded = codec::deserialize_surfaces(&std::fs::read(&bvh_path).unwrap(), &std::fs::read(&brk_path).unwrap()).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, "terrain");
    assert_eq!(loaded[0].bvh.stats(), tree.stats());
    for (a, b) in tree.triangles().zip(loaded[0].bvh.triangles()) {
        for (p, q) in a.vertices().into_iter().zip(b.vertices()) {
            assert!(close(p, q), "{:?} vs {:?}", p, q);
        }
    }
    assert_eq!(loaded[0].break_lines.len(), lines.len());
    for (a, b) in lines.iter().zip(&loaded[0].break_lines) {
        assert_eq!(a.kind, b.kind);
        assert!(close(a.start, b.start) && close(a.end, b.end));
    }
    assert_eq!(loaded[1].id, "empty");
    assert!(loaded[1].bvh.is_empty());
    assert!(loaded[1].break_lines.is_empty());
}

#[test]
fn file_helpers_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let tree = Bvh::build(terrain(3), &BvhConfig::default());
    let path = dir.path().join("one.bvh");
    bvh_codec::write_bvh_file(&path, &[("s", &tree)]).unwrap();
    let back = bvh_codec::read_bvh_file(&path).unwrap();
    assert_eq!(back[0].1.stats(), tree.stats());

    let bundle = GeometryBundle {
        metadata: serde_json::json!({ "source": "survey" }),
        entities: vec![GeometryEntity {
            id: "mesh".into(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            colors: Some(vec![1.0, 0.0, 0.0]),
            ..GeometryEntity::default()
        }],
    };
    let gpath = dir.path().join("scene.geo");
    geometry::write_geometry_file(&gpath, &bundle).unwrap();
    assert_eq!(geometry::read_geometry_file(&gpath).unwrap(), bundle);

    let blobs = vec![AuxBlob {
        surface_id: "s".into(),
        name: "slope".into(),
        data: AuxData::F32(vec![0.25, 0.5]),
    }];
    let apath = dir.path().join("aux.blob");
    blob::write_blob_file(&apath, &blobs).unwrap();
    assert_eq!(blob::read_blob_file(&apath).unwrap(), blobs);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = bvh_codec::read_bvh_file(&dir.path().join("nope.bvh")).unwrap_err();
    assert!(matches!(err, CodecError::Io(_)));
}

#[test]
fn wrong_payload_kind_is_bad_magic() {
    let tree = Bvh::build(terrain(2), &BvhConfig::default());
    let bytes = bvh_codec::serialize(&[("s", &tree)]).unwrap();
    assert!(matches!(breaklines::deserialize(&bytes), Err(CodecError::BadMagic { .. })));
}

#[test]
fn truncated_payload_is_rejected() {
    let tree = Bvh::build(terrain(2), &BvhConfig::default());
    let raw = bvh_codec::encode(&[("s", &tree)]).unwrap();
    let err = bvh_codec::decode(&raw[..raw.len() - 5]).unwrap_err();
    assert!(
        matches!(err, CodecError::Truncated { .. } | CodecError::CountMismatch { .. }),
        "{:?}",
        err
    );
}

#[test]
fn garbage_is_not_gzip() {
    assert!(matches!(codec::decompress(b"not gzip at all"), Err(CodecError::Io(_))));
}

#[test]
fn trailing_bytes_inside_gzip_are_rejected() {
    let tree = Bvh::build(terrain(2), &BvhConfig::default());
    let mut raw = bvh_codec::encode(&[("s", &tree)]).unwrap();
    raw.extend_from_slice(&[1, 2, 3]);
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&raw).unwrap();
    let packed = enc.finish().unwrap();
    assert!(matches!(
        bvh_codec::deserialize(&packed),
        Err(CodecError::TrailingBytes { count: 3, .. })
    ));
}
