use std::collections::BTreeMap;

use crate::geometry::Point3;

use super::{PointTags, ProfileConfig, ProfileVertex};

#[derive(Debug, Clone, Copy)]
struct Entry {
    vertex: ProfileVertex,
    /// Number of elevations averaged into `vertex.elevation`.
    merged: u32,
}

/// Deduplicates profile points by plan distance rounded to a fixed number of
/// decimals.
///
/// Points sharing a key average their elevations when they lie within the
/// elevation merge threshold; otherwise the point with the stronger tag keeps
/// its elevation. Tags are always combined.
#[derive(Debug)]
pub struct Accumulator {
    scale: f64,
    elevation_merge: f64,
    tolerance: f64,
    entries: BTreeMap<i64, Entry>,
}

impl Accumulator {
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            scale: 10f64.powi(config.distance_decimals as i32),
            elevation_merge: config.elevation_merge,
            tolerance: config.merge_tolerance(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, distance: f64, point: Point3, tags: PointTags) {
        let key = (distance * self.scale).round() as i64;
        let vertex = ProfileVertex {
            distance,
            elevation: point.z,
            x: point.x,
            y: point.y,
            tags,
        };
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(key, Entry { vertex, merged: 1 });
            }
            Some(entry) => merge(entry, vertex, self.elevation_merge),
        }
    }

    /// Vertices by ascending distance. Neighbours closer than the merge
    /// tolerance are folded together when their tags are identical.
    pub fn into_sorted(self) -> Vec<ProfileVertex> {
        let mut out: Vec<Entry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.into_values() {
            match out.last_mut() {
                Some(last)
                    if last.vertex.tags == entry.vertex.tags
                        && entry.vertex.distance - last.vertex.distance < self.tolerance =>
                {
                    let n = last.merged as f64;
                    let m = entry.merged as f64;
                    let w = |a: f64, b: f64| (a * n + b * m) / (n + m);
                    last.vertex.distance = w(last.vertex.distance, entry.vertex.distance);
                    last.vertex.x = w(last.vertex.x, entry.vertex.x);
                    last.vertex.y = w(last.vertex.y, entry.vertex.y);
                    last.vertex.elevation = w(last.vertex.elevation, entry.vertex.elevation);
                    last.merged += entry.merged;
                }
                _ => out.push(entry),
            }
        }
        out.into_iter().map(|e| e.vertex).collect()
    }
}

fn merge(entry: &mut Entry, incoming: ProfileVertex, elevation_merge: f64) {
    let current = &mut entry.vertex;
    if (current.elevation - incoming.elevation).abs() <= elevation_merge {
        let n = entry.merged as f64;
        current.elevation = (current.elevation * n + incoming.elevation) / (n + 1.0);
        entry.merged += 1;
    } else if incoming.tags.priority() > current.tags.priority() {
        current.elevation = incoming.elevation;
        current.x = incoming.x;
        current.y = incoming.y;
        current.distance = incoming.distance;
        entry.merged = 1;
    }
    current.tags |= incoming.tags;
}
