//! Reading finished surfaces and query points from disk.

pub mod landxml;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::geometry::{positions_from_triangles, triangles_from_positions, Point3, Triangle};

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn parse_line(idx: usize, line: &str, expected: usize) -> io::Result<Vec<f64>> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < expected {
        return Err(invalid_data(format!(
            "line {}: expected {} comma-separated values, found {}",
            idx + 1,
            expected,
            parts.len()
        )));
    }
    parts[..expected]
        .iter()
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| invalid_data(format!("line {}: {}", idx + 1, e)))
        })
        .collect()
}

/// Reads a file to string.
pub fn read_to_string(path: &str) -> io::Result<String> {
    let mut buffer = String::new();
    File::open(path)?.read_to_string(&mut buffer)?;
    Ok(buffer)
}

pub fn write_string(path: &str, contents: &str) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())
}

/// Reads the lines of a text file.
pub fn read_lines(path: &str) -> io::Result<Vec<String>> {
    BufReader::new(File::open(path)?).lines().collect()
}

/// Reads `x,y,z` points, one per line. Blank lines and lines starting with
/// `#` are skipped.
pub fn read_points_csv3(path: &str) -> io::Result<Vec<Point3>> {
    let mut pts = Vec::new();
    for (idx, line) in read_lines(path)?.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let v = parse_line(idx, line, 3)?;
        pts.push(Point3::new(v[0], v[1], v[2]));
    }
    Ok(pts)
}

/// Writes `x,y,z` points, one per line.
pub fn write_points_csv3(path: &str, points: &[Point3]) -> io::Result<()> {
    let mut file = File::create(path)?;
    for p in points {
        writeln!(file, "{},{},{}", p.x, p.y, p.z)?;
    }
    Ok(())
}

/// Reads triangles written as nine comma-separated coordinates per line.
pub fn read_triangles_csv(path: &str) -> io::Result<Vec<Triangle>> {
    let mut tris = Vec::new();
    for (idx, line) in read_lines(path)?.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let v = parse_line(idx, line, 9)?;
        tris.push(Triangle::new(
            Point3::new(v[0], v[1], v[2]),
            Point3::new(v[3], v[4], v[5]),
            Point3::new(v[6], v[7], v[8]),
        ));
    }
    Ok(tris)
}

/// Reads a raw little-endian `f32` position buffer.
pub fn read_position_buffer(path: &str) -> io::Result<Vec<Triangle>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(invalid_data(format!(
            "position buffer of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    let positions: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    triangles_from_positions(&positions).map_err(|e| invalid_data(e.to_string()))
}

/// Writes triangles as a raw little-endian `f32` position buffer.
pub fn write_position_buffer(path: &str, triangles: &[Triangle]) -> io::Result<()> {
    let bytes: Vec<u8> = positions_from_triangles(triangles)
        .into_iter()
        .flat_map(f32::to_le_bytes)
        .collect();
    File::create(path)?.write_all(&bytes)
}

/// Reads a surface, picking the format from the file extension: `.xml` for
/// LandXML, `.bin`/`.f32` for raw position buffers, anything else for
/// triangle CSV.
pub fn read_surface(path: &str) -> io::Result<Vec<Triangle>> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let tris = match ext.as_deref() {
        Some("xml") => landxml::read_landxml_surface(path)?,
        Some("bin") | Some("f32") => read_position_buffer(path)?,
        _ => read_triangles_csv(path)?,
    };
    log::info!("read {} triangles from {}", tris.len(), path);
    Ok(tris)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_in(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn points_csv_roundtrip_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_in(&dir, "pts.csv");
        write_string(&path, "# x,y,z\n1,2,3\n\n4.5, 5.5 ,6.5\n").unwrap();
        let pts = read_points_csv3(&path).unwrap();
        assert_eq!(pts, vec![Point3::new(1.0, 2.0, 3.0), Point3::new(4.5, 5.5, 6.5)]);
        write_points_csv3(&path, &pts).unwrap();
        assert_eq!(read_points_csv3(&path).unwrap(), pts);
    }

    #[test]
    fn bad_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_in(&dir, "tris.csv");
        write_string(&path, "0,0,0,1,0,0,0,1,0\n0,0,0,1,0\n").unwrap();
        let err = read_triangles_csv(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn position_buffer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_in(&dir, "surface.bin");
        let tris = vec![Triangle::new(
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(2.0, 0.0, 1.5),
            Point3::new(0.0, 2.0, 0.25),
        )];
        write_position_buffer(&path, &tris).unwrap();
        assert_eq!(read_surface(&path).unwrap(), tris);
    }

    #[test]
    fn short_position_buffer_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_in(&dir, "short.f32");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert_eq!(read_position_buffer(&path).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
