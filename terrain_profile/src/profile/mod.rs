//! Elevation profiles along plan segments.
//!
//! A profile is computed in three phases over the triangles gathered from a
//! corridor around the segment:
//!
//! 1. [`Phase::Gather`]: leaves surviving the corridor pruning are streamed in
//!    bounded chunks; each accepted triangle contributes plane crossings,
//!    plan-edge crossings and a plane record.
//! 2. [`Phase::PlanarMerge`]: runs of coplanar plane records are sampled.
//! 3. [`Phase::Assemble`]: break-line crossings are added, points are
//!    deduplicated by rounded distance and linked into a [`ProfileGraph`].

mod accumulator;
mod intersect;
mod planar;
mod polyline;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::breakline::BreakLineEdge;
use crate::bvh::Bvh;
use crate::corridor::{clip_segment_to_aabb_2d, corridor_leaves, Corridor};
use crate::error::ProfileError;
use crate::geometry::{distance_2d, Point3, Segment3, Triangle};
use crate::progress::{CancelReason, CancelToken, Phase, ProgressReporter, ProgressSink};

pub use accumulator::Accumulator;
pub use intersect::{plan_overlap, segment_intersection_2d, PlaneRecord};
pub use polyline::{polyline_segments, profile_polyline, PolylineProfile, SegmentResult};
pub(crate) use polyline::{offset_graph, offset_length, BatchSink};

/// Set of tags describing how a profile vertex was produced.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointTags(u8);

impl PointTags {
    pub const NONE: PointTags = PointTags(0);
    /// Segment crosses the triangle's plane inside the triangle.
    pub const CROSSING: PointTags = PointTags(1);
    /// Plan projection of the segment crosses a triangle edge.
    pub const EDGE: PointTags = PointTags(1 << 1);
    pub const BREAK_LINE: PointTags = PointTags(1 << 2);
    /// Sample taken inside a coplanar region.
    pub const PLANE_SAMPLE: PointTags = PointTags(1 << 3);
    /// Synthetic corridor entry or exit vertex.
    pub const BOUNDARY: PointTags = PointTags(1 << 4);

    const NAMES: [(PointTags, &'static str); 5] = [
        (PointTags::CROSSING, "crossing"),
        (PointTags::EDGE, "edge"),
        (PointTags::BREAK_LINE, "break_line"),
        (PointTags::PLANE_SAMPLE, "plane_sample"),
        (PointTags::BOUNDARY, "boundary"),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        PointTags(bits & 0x1f)
    }

    pub fn contains(self, other: PointTags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Rank used when two points at the same distance disagree on
    /// elevation: break-lines win over crossings, crossings over edges,
    /// edges over plane samples.
    pub(crate) fn priority(self) -> u8 {
        if self.contains(PointTags::BREAK_LINE) {
            4
        } else if self.contains(PointTags::CROSSING) {
            3
        } else if self.contains(PointTags::EDGE) {
            2
        } else if self.contains(PointTags::PLANE_SAMPLE) {
            1
        } else {
            0
        }
    }
}

impl BitOr for PointTags {
    type Output = PointTags;

    fn bitor(self, rhs: PointTags) -> PointTags {
        PointTags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PointTags {
    fn bitor_assign(&mut self, rhs: PointTags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PointTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tag, name) in PointTags::NAMES {
            if self.contains(tag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PointTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PointTags({})", self)
    }
}

/// One vertex of a profile graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileVertex {
    /// Plan distance from the segment start.
    pub distance: f64,
    pub elevation: f64,
    pub x: f64,
    pub y: f64,
    pub tags: PointTags,
}

impl ProfileVertex {
    pub fn position(&self) -> Point3 {
        Point3::new(self.x, self.y, self.elevation)
    }
}

/// Edge between two consecutive vertices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileEdge {
    pub from: usize,
    pub to: usize,
    /// True 3D length.
    pub length: f64,
}

/// Vertices ordered by ascending plan distance, linked by consecutive edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileGraph {
    pub vertices: Vec<ProfileVertex>,
    pub edges: Vec<ProfileEdge>,
}

impl ProfileGraph {
    /// Links already sorted vertices with consecutive edges.
    pub fn from_vertices(vertices: Vec<ProfileVertex>) -> Self {
        let edges = vertices
            .windows(2)
            .enumerate()
            .map(|(i, w)| ProfileEdge {
                from: i,
                to: i + 1,
                length: (w[1].position() - w[0].position()).length(),
            })
            .collect();
        Self { vertices, edges }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Plan distance covered from the first to the last vertex.
    pub fn total_length_2d(&self) -> f64 {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(a), Some(b)) => b.distance - a.distance,
            _ => 0.0,
        }
    }

    /// Sum of the 3D edge lengths.
    pub fn total_length_3d(&self) -> f64 {
        self.edges.iter().map(|e| e.length).sum()
    }

    pub fn min_elevation(&self) -> Option<f64> {
        self.vertices.iter().map(|v| v.elevation).reduce(f64::min)
    }

    pub fn max_elevation(&self) -> Option<f64> {
        self.vertices.iter().map(|v| v.elevation).reduce(f64::max)
    }

    /// Elevation at plan distance `distance`, interpolated linearly between
    /// the enclosing vertices. `None` outside the profile.
    pub fn elevation_at(&self, distance: f64) -> Option<f64> {
        let idx = self.vertices.partition_point(|v| v.distance < distance);
        let hi = self.vertices.get(idx)?;
        if (hi.distance - distance).abs() <= f64::EPSILON {
            return Some(hi.elevation);
        }
        if idx == 0 {
            return None;
        }
        let lo = &self.vertices[idx - 1];
        let span = hi.distance - lo.distance;
        let t = (distance - lo.distance) / span;
        Some(lo.elevation + (hi.elevation - lo.elevation) * t)
    }
}

/// Tunables of the profile computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Points whose plan distances round to the same value at this many
    /// decimals are merged.
    pub distance_decimals: u32,
    /// Merged points average their elevations when they differ by at most
    /// this much.
    pub elevation_merge: f64,
    /// Entry/exit vertices are not added when a vertex is this close.
    pub boundary_tolerance: f64,
    /// Normal and offset tolerance for treating two planes as the same.
    pub plane_tolerance: f64,
    /// Evenly spaced samples taken across each coplanar region.
    pub plane_samples: usize,
    /// Triangles processed per gather chunk.
    pub chunk_size: usize,
    /// Soft ceiling for retained intersection records, in bytes.
    pub memory_ceiling_bytes: u64,
    pub progress_interval_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            distance_decimals: 3,
            elevation_merge: 1.0,
            boundary_tolerance: 0.001,
            plane_tolerance: 1e-4,
            plane_samples: 50,
            chunk_size: 5000,
            memory_ceiling_bytes: 1_400_000_000,
            progress_interval_ms: 100,
        }
    }
}

impl ProfileConfig {
    /// Distance below which two equally tagged vertices are merged.
    pub fn merge_tolerance(&self) -> f64 {
        10f64.powi(-(self.distance_decimals as i32))
    }
}

/// Result of a profile computation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileOutcome {
    Complete(ProfileGraph),
    Cancelled(CancelReason),
}

/// Point recorded during the gather and merge phases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub point: Point3,
    pub tags: PointTags,
}

const INSIDE_TOL: f64 = 1e-9;
const MIN_SEGMENT_LENGTH: f64 = 1e-12;

/// Gather state for one segment.
struct Gather<'a> {
    clipped: Segment3,
    config: &'a ProfileConfig,
    points: Vec<RawPoint>,
    planes: Vec<PlaneRecord>,
}

impl Gather<'_> {
    fn process_chunk(&mut self, chunk: &[Triangle]) {
        for tri in chunk {
            if let Some(p) = intersect::plane_crossing(&self.clipped, tri, INSIDE_TOL) {
                self.points.push(RawPoint {
                    point: p,
                    tags: PointTags::CROSSING,
                });
            }
            intersect::edge_crossings(&self.clipped, tri, &mut self.points);
            if let Some(record) = PlaneRecord::new(&self.clipped, tri) {
                self.planes.push(record);
            }
        }
    }

    fn retained_bytes(&self, chunk_len: usize) -> u64 {
        (self.points.len() * std::mem::size_of::<RawPoint>()
            + self.planes.len() * std::mem::size_of::<PlaneRecord>()
            + chunk_len * std::mem::size_of::<Triangle>()) as u64
    }
}

/// Computes the elevation profile of `segment` over the surface indexed by
/// `bvh`, gathering triangles within plan distance `width` of the segment.
///
/// The segment is clipped to the plan footprint of the surface bounds and
/// the corridor is measured in plan, so a segment given at any elevation
/// profiles the surface below it. Its elevations only decide where it
/// crosses triangle planes. An empty surface, a segment that misses the
/// footprint or a segment with no plan length produce an empty graph.
pub fn compute_profile(
    segment: Segment3,
    bvh: &Bvh,
    width: f64,
    break_lines: Option<&[BreakLineEdge]>,
    config: &ProfileConfig,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ProfileOutcome, ProfileError> {
    if !width.is_finite() || width < 0.0 {
        return Err(ProfileError::InvalidWidth(width));
    }
    let finite = |p: Point3| p.x.is_finite() && p.y.is_finite() && p.z.is_finite();
    if !finite(segment.start) || !finite(segment.end) {
        return Err(ProfileError::NonFiniteSegment);
    }
    let started = Instant::now();
    let interval = Duration::from_millis(config.progress_interval_ms);

    let total_2d = segment.length_2d();
    if total_2d < MIN_SEGMENT_LENGTH {
        log::trace!("segment has no plan length; empty profile");
        return Ok(ProfileOutcome::Complete(ProfileGraph::default()));
    }
    let Some(bounds) = bvh.root_bounds() else {
        return Ok(ProfileOutcome::Complete(ProfileGraph::default()));
    };
    let Some((t0, t1)) = clip_segment_to_aabb_2d(segment.start, segment.end, &bounds) else {
        log::debug!("segment misses surface bounds; empty profile");
        return Ok(ProfileOutcome::Complete(ProfileGraph::default()));
    };
    let clipped = Segment3::new(segment.point_at(t0), segment.point_at(t1));
    let entry_z = bvh.elevation_at(clipped.start.xy(), INSIDE_TOL);
    let exit_z = bvh.elevation_at(clipped.end.xy(), INSIDE_TOL);
    let corridor = Corridor::plan(clipped.start, clipped.end, width);

    // Gather
    let leaves = corridor_leaves(bvh, &corridor);
    let candidates: usize = leaves
        .iter()
        .filter_map(|&i| bvh.node(i))
        .map(|n| n.triangles().len())
        .sum();
    let mut reporter = ProgressReporter::new(Phase::Gather, candidates as u64, (0.0, 0.6), started, interval);
    let mut gather = Gather {
        clipped,
        config,
        points: Vec::new(),
        planes: Vec::new(),
    };
    let chunk_size = config.chunk_size.max(1);
    let mut chunk: Vec<Triangle> = Vec::with_capacity(chunk_size.min(candidates));
    let mut examined = 0usize;
    let mut accepted = 0usize;
    for index in leaves {
        if let Err(reason) = cancel.check() {
            return Ok(ProfileOutcome::Cancelled(reason));
        }
        let Some(leaf) = bvh.node(index) else {
            continue;
        };
        for tri in leaf.triangles() {
            examined += 1;
            if !corridor.accepts(tri) {
                continue;
            }
            chunk.push(*tri);
            if chunk.len() >= chunk_size {
                accepted += chunk.len();
                if let Some(outcome) = flush_chunk(&mut gather, &mut chunk, cancel) {
                    return Ok(outcome);
                }
                reporter.update(examined as u64, sink);
            }
        }
    }
    accepted += chunk.len();
    if let Some(outcome) = flush_chunk(&mut gather, &mut chunk, cancel) {
        return Ok(outcome);
    }
    reporter.finish(sink);
    log::debug!(
        "profile gather: {} candidates, {} in corridor, {} points, {} plane records",
        candidates,
        accepted,
        gather.points.len(),
        gather.planes.len()
    );

    // Planar merge
    let Gather { mut points, planes, .. } = gather;
    let mut reporter = ProgressReporter::new(Phase::PlanarMerge, planes.len() as u64, (0.6, 0.8), started, interval);
    if let Err(reason) = planar::sample_regions(&clipped, planes, config, &mut points, &mut reporter, sink, cancel) {
        return Ok(ProfileOutcome::Cancelled(reason));
    }
    reporter.finish(sink);

    // Assemble
    if let Some(lines) = break_lines {
        intersect::break_line_crossings(&clipped, lines, &mut points);
    }
    let mut reporter = ProgressReporter::new(Phase::Assemble, points.len() as u64, (0.8, 1.0), started, interval);
    let mut acc = Accumulator::new(config);
    for (i, raw) in points.iter().enumerate() {
        acc.insert(distance_2d(segment.start, raw.point), raw.point, raw.tags);
        if i % 1024 == 0 {
            if let Err(reason) = cancel.check() {
                return Ok(ProfileOutcome::Cancelled(reason));
            }
            reporter.update(i as u64, sink);
        }
    }
    drop(points);
    let mut vertices = acc.into_sorted();

    let entry = BoundaryVertex {
        distance: t0 * total_2d,
        point: clipped.start,
        surface_z: entry_z,
    };
    let exit = BoundaryVertex {
        distance: t1 * total_2d,
        point: clipped.end,
        surface_z: exit_z,
    };
    for boundary in [entry, exit] {
        boundary.inject(&mut vertices, config.boundary_tolerance);
    }
    reporter.finish(sink);

    if let Some(bad) = vertices
        .iter()
        .find(|v| !(v.distance.is_finite() && v.elevation.is_finite()))
    {
        return Err(ProfileError::Internal(format!(
            "non-finite profile vertex at ({}, {})",
            bad.x, bad.y
        )));
    }
    let graph = ProfileGraph::from_vertices(vertices);
    log::debug!(
        "profile assembled: {} vertices over {:.3} plan units",
        graph.len(),
        graph.total_length_2d()
    );
    Ok(ProfileOutcome::Complete(graph))
}

/// Processes and clears `chunk`; returns an outcome when the unit must stop.
fn flush_chunk(gather: &mut Gather<'_>, chunk: &mut Vec<Triangle>, cancel: &CancelToken) -> Option<ProfileOutcome> {
    if chunk.is_empty() {
        return None;
    }
    if let Err(reason) = cancel.check() {
        return Some(ProfileOutcome::Cancelled(reason));
    }
    let retained = gather.retained_bytes(chunk.len());
    if retained > gather.config.memory_ceiling_bytes {
        log::warn!(
            "profile gather retained ~{} bytes, above the {} byte ceiling; cancelling",
            retained,
            gather.config.memory_ceiling_bytes
        );
        return Some(ProfileOutcome::Cancelled(CancelReason::MemoryCeiling));
    }
    gather.process_chunk(chunk);
    chunk.clear();
    None
}

struct BoundaryVertex {
    distance: f64,
    point: Point3,
    surface_z: Option<f64>,
}

impl BoundaryVertex {
    /// Inserts the vertex into `vertices` (sorted by distance) unless one is
    /// already within `tolerance`.
    fn inject(&self, vertices: &mut Vec<ProfileVertex>, tolerance: f64) {
        if vertices
            .iter()
            .any(|v| (v.distance - self.distance).abs() <= tolerance)
        {
            return;
        }
        let elevation = self.surface_z.unwrap_or_else(|| {
            vertices
                .iter()
                .min_by(|a, b| {
                    (a.distance - self.distance)
                        .abs()
                        .total_cmp(&(b.distance - self.distance).abs())
                })
                .map_or(self.point.z, |v| v.elevation)
        });
        let idx = vertices.partition_point(|v| v.distance < self.distance);
        vertices.insert(
            idx,
            ProfileVertex {
                distance: self.distance,
                elevation,
                x: self.point.x,
                y: self.point.y,
                tags: PointTags::BOUNDARY,
            },
        );
    }
}
