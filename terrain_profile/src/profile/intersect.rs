use crate::breakline::BreakLineEdge;
use crate::geometry::{Point, Point3, Segment3, Triangle};

use super::{PointTags, RawPoint};

const PARALLEL_EPS: f64 = 1e-12;

/// Where the segment crosses the plane of `tri`, if that point lies inside
/// the triangle. Segments parallel to the plane never cross.
pub(crate) fn plane_crossing(seg: &Segment3, tri: &Triangle, tol: f64) -> Option<Point3> {
    let n = tri.normal()?;
    let dir = seg.direction();
    let denom = n.dot(dir);
    if denom.abs() < PARALLEL_EPS {
        return None;
    }
    let t = (n.dot(tri.a) - n.dot(seg.start)) / denom;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let p = seg.point_at(t);
    tri.contains_point(p, tol).then_some(p)
}

/// Parameters `(t, u)` at which the plan segments `p0`-`p1` and `q0`-`q1`
/// intersect, both within `[0, 1]`. Parallel segments yield `None`.
pub fn segment_intersection_2d(p0: Point, p1: Point, q0: Point, q1: Point) -> Option<(f64, f64)> {
    let r = (p1.x - p0.x, p1.y - p0.y);
    let s = (q1.x - q0.x, q1.y - q0.y);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() < PARALLEL_EPS {
        return None;
    }
    let qp = (q0.x - p0.x, q0.y - p0.y);
    let t = (qp.0 * s.1 - qp.1 * s.0) / denom;
    let u = (qp.0 * r.1 - qp.1 * r.0) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Records where the plan projection of `seg` crosses the edges of `tri`,
/// with elevation interpolated along the edge.
pub(crate) fn edge_crossings(seg: &Segment3, tri: &Triangle, out: &mut Vec<RawPoint>) {
    let (s0, s1) = (seg.start.xy(), seg.end.xy());
    for (a, b) in tri.edges() {
        if let Some((t, u)) = segment_intersection_2d(s0, s1, a.xy(), b.xy()) {
            let on_seg = seg.point_at(t);
            out.push(RawPoint {
                point: Point3::new(on_seg.x, on_seg.y, a.z + (b.z - a.z) * u),
                tags: PointTags::EDGE,
            });
        }
    }
}

/// Records crossings of `seg` with break-lines whose plan bounding box
/// overlaps the segment's.
pub(crate) fn break_line_crossings(seg: &Segment3, lines: &[BreakLineEdge], out: &mut Vec<RawPoint>) {
    let (s0, s1) = (seg.start.xy(), seg.end.xy());
    let (smin, smax) = (
        Point::new(s0.x.min(s1.x), s0.y.min(s1.y)),
        Point::new(s0.x.max(s1.x), s0.y.max(s1.y)),
    );
    let mut found = 0usize;
    for line in lines {
        let (lmin, lmax) = line.bbox2d();
        if lmin.x > smax.x || lmax.x < smin.x || lmin.y > smax.y || lmax.y < smin.y {
            continue;
        }
        if let Some((t, u)) = segment_intersection_2d(s0, s1, line.start.xy(), line.end.xy()) {
            let on_seg = seg.point_at(t);
            let z = line.start.z + (line.end.z - line.start.z) * u;
            out.push(RawPoint {
                point: Point3::new(on_seg.x, on_seg.y, z),
                tags: PointTags::BREAK_LINE,
            });
            found += 1;
        }
    }
    log::trace!("{} break-line crossings", found);
}

/// Parameter range over which the plan projection of `seg` lies inside the
/// plan projection of `tri` (Cyrus-Beck clipping). `None` when they do not
/// overlap or the triangle has no plan area.
pub fn plan_overlap(seg: &Segment3, tri: &Triangle) -> Option<(f64, f64)> {
    let [a, b, c] = tri.vertices().map(|v| v.xy());
    let area2 = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    if area2.abs() < PARALLEL_EPS {
        return None;
    }
    // Counter-clockwise order so edge normals point inwards.
    let ring = if area2 > 0.0 { [a, b, c] } else { [a, c, b] };
    let p0 = seg.start.xy();
    let d = (seg.end.x - seg.start.x, seg.end.y - seg.start.y);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for i in 0..3 {
        let (e0, e1) = (ring[i], ring[(i + 1) % 3]);
        let normal = (-(e1.y - e0.y), e1.x - e0.x);
        let offset = normal.0 * (p0.x - e0.x) + normal.1 * (p0.y - e0.y);
        let rate = normal.0 * d.0 + normal.1 * d.1;
        if rate.abs() < PARALLEL_EPS {
            if offset < 0.0 {
                return None;
            }
            continue;
        }
        let t = -offset / rate;
        if rate > 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Plane of a triangle together with the segment range it covers in plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneRecord {
    /// Unit normal, oriented upwards (or towards the first positive axis for
    /// vertical planes).
    pub normal: Point3,
    pub offset: f64,
    pub t_start: f64,
    pub t_end: f64,
    pub triangle: Triangle,
}

impl PlaneRecord {
    pub fn new(seg: &Segment3, tri: &Triangle) -> Option<Self> {
        let mut normal = tri.normal()?;
        let flip = if normal.z != 0.0 {
            normal.z < 0.0
        } else if normal.x != 0.0 {
            normal.x < 0.0
        } else {
            normal.y < 0.0
        };
        if flip {
            normal = normal * -1.0;
        }
        let (t_start, t_end) = plan_overlap(seg, tri)?;
        Some(Self {
            normal,
            offset: normal.dot(tri.a),
            t_start,
            t_end,
            triangle: *tri,
        })
    }

    /// Same plane within `tol` on every normal component and the offset.
    pub fn same_plane(&self, other: &PlaneRecord, tol: f64) -> bool {
        (self.normal.x - other.normal.x).abs() <= tol
            && (self.normal.y - other.normal.y).abs() <= tol
            && (self.normal.z - other.normal.z).abs() <= tol
            && (self.offset - other.offset).abs() <= tol
    }
}
