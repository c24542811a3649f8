use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;

use roxmltree::Document;

use crate::geometry::{Point3, Triangle};

use super::{invalid_data, read_to_string, write_string};

fn parse_numbers<T: std::str::FromStr>(text: &str) -> Vec<T> {
    text.split_whitespace().filter_map(|s| s.parse().ok()).collect()
}

/// Reads the first TIN surface of a LandXML file.
///
/// Points are looked up by their `id` attribute when present, otherwise by
/// their one-based position in `<Pnts>`. LandXML stores points as
/// northing, easting, elevation; they are returned as x = easting,
/// y = northing.
pub fn read_landxml_surface(path: &str) -> io::Result<Vec<Triangle>> {
    let xml = read_to_string(path)?;
    let doc = Document::parse(&xml).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut points: HashMap<String, Point3> = HashMap::new();
    if let Some(pnts) = doc.descendants().find(|n| n.has_tag_name("Pnts")) {
        for (i, p) in pnts.children().filter(|c| c.has_tag_name("P")).enumerate() {
            let nums: Vec<f64> = parse_numbers(p.text().unwrap_or_default());
            if nums.len() < 3 {
                return Err(invalid_data(format!("point {}: expected three coordinates", i + 1)));
            }
            let id = p.attribute("id").map_or_else(|| (i + 1).to_string(), str::to_string);
            points.insert(id, Point3::new(nums[1], nums[0], nums[2]));
        }
    }
    let mut triangles = Vec::new();
    if let Some(faces) = doc.descendants().find(|n| n.has_tag_name("Faces")) {
        for (i, f) in faces.children().filter(|c| c.has_tag_name("F")).enumerate() {
            // i="1" marks invisible faces (holes, outside the boundary)
            if f.attribute("i") == Some("1") {
                continue;
            }
            let ids: Vec<&str> = f.text().unwrap_or_default().split_whitespace().collect();
            if ids.len() < 3 {
                return Err(invalid_data(format!("face {}: expected three point ids", i + 1)));
            }
            let mut corners = [Point3::new(0.0, 0.0, 0.0); 3];
            for (corner, id) in corners.iter_mut().zip(&ids[..3]) {
                *corner = *points
                    .get(*id)
                    .ok_or_else(|| invalid_data(format!("face {}: unknown point id {}", i + 1, id)))?;
            }
            triangles.push(Triangle::new(corners[0], corners[1], corners[2]));
        }
    }
    log::debug!("landxml: {} points, {} faces", points.len(), triangles.len());
    Ok(triangles)
}

/// Writes triangles as a LandXML TIN surface, sharing identical vertices.
pub fn write_landxml_surface(path: &str, name: &str, triangles: &[Triangle]) -> io::Result<()> {
    let mut ids: HashMap<[u64; 3], usize> = HashMap::new();
    let mut vertices: Vec<Point3> = Vec::new();
    let mut faces: Vec<[usize; 3]> = Vec::with_capacity(triangles.len());
    for t in triangles {
        let mut face = [0usize; 3];
        for (slot, v) in face.iter_mut().zip(t.vertices()) {
            let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
            *slot = *ids.entry(key).or_insert_with(|| {
                vertices.push(v);
                vertices.len()
            });
        }
        faces.push(face);
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\"?>\n<LandXML>\n  <Surfaces>\n");
    let _ = writeln!(xml, "    <Surface name=\"{}\">", name);
    xml.push_str("      <Definition surfType=\"TIN\">\n        <Pnts>\n");
    for (i, v) in vertices.iter().enumerate() {
        let _ = writeln!(xml, "          <P id=\"{}\">{} {} {}</P>", i + 1, v.y, v.x, v.z);
    }
    xml.push_str("        </Pnts>\n        <Faces>\n");
    for f in &faces {
        let _ = writeln!(xml, "          <F>{} {} {}</F>", f[0], f[1], f[2]);
    }
    xml.push_str("        </Faces>\n      </Definition>\n    </Surface>\n  </Surfaces>\n</LandXML>\n");
    write_string(path, &xml)
}
