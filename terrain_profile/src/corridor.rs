//! Corridor queries: triangles within a half-width of a 3D segment, or of
//! its plan projection.

use serde::{Deserialize, Serialize};

use crate::bvh::{Aabb, Bvh, BvhNode};
use crate::geometry::{Point3, Triangle};

/// A 3D segment plus a scalar half-width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub start: Point3,
    pub end: Point3,
    pub half_width: f64,
    /// Distances measured in plan; the corridor spans every elevation.
    #[serde(default)]
    pub plan: bool,
}

impl Corridor {
    pub fn new(start: Point3, end: Point3, half_width: f64) -> Self {
        Self {
            start,
            end,
            half_width,
            plan: false,
        }
    }

    /// Corridor around the plan projection of `start`-`end`.
    pub fn plan(start: Point3, end: Point3, half_width: f64) -> Self {
        Self {
            plan: true,
            ..Self::new(start, end, half_width)
        }
    }

    /// Bounding box of the segment grown by the half-width on every axis.
    /// Plan corridors are unbounded in z.
    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::empty();
        b.expand_point(self.start);
        b.expand_point(self.end);
        let mut b = b.expanded(self.half_width);
        if self.plan {
            b.min.z = f64::NEG_INFINITY;
            b.max.z = f64::INFINITY;
        }
        b
    }

    /// Smallest distance from any vertex of `tri` to the segment.
    pub fn min_vertex_distance(&self, tri: &Triangle) -> f64 {
        let flat = |p: Point3| if self.plan { Point3::new(p.x, p.y, 0.0) } else { p };
        let (a, b) = (flat(self.start), flat(self.end));
        tri.vertices()
            .iter()
            .map(|&v| point_segment_distance(flat(v), a, b))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn accepts(&self, tri: &Triangle) -> bool {
        self.min_vertex_distance(tri) <= self.half_width
    }
}

/// Distance from `p` to the segment `a`–`b`. A zero-length segment is
/// treated as the point `a`.
pub fn point_segment_distance(p: Point3, a: Point3, b: Point3) -> f64 {
    let ab = b - a;
    let len2 = ab.dot(ab);
    if len2 <= f64::EPSILON {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (p - a.lerp(b, t)).length()
}

/// Clips the segment `start`–`end` against `aabb` using the slab method and
/// returns the parameter range `(t0, t1)` inside the box, or `None` if the
/// segment misses it.
pub fn clip_segment_to_aabb(start: Point3, end: Point3, aabb: &Aabb) -> Option<(f64, f64)> {
    clip_axes(start, end, aabb, 3)
}

/// [`clip_segment_to_aabb`] on x and y only: the parameter range where the
/// plan projection of the segment lies over the box's footprint.
pub fn clip_segment_to_aabb_2d(start: Point3, end: Point3, aabb: &Aabb) -> Option<(f64, f64)> {
    clip_axes(start, end, aabb, 2)
}

fn clip_axes(start: Point3, end: Point3, aabb: &Aabb, axes: usize) -> Option<(f64, f64)> {
    if !aabb.is_valid() {
        return None;
    }
    let dir = end - start;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for axis in 0..axes {
        let s = start.component(axis);
        let d = dir.component(axis);
        let lo = aabb.min.component(axis);
        let hi = aabb.max.component(axis);
        if d.abs() <= f64::EPSILON {
            if s < lo || s > hi {
                return None;
            }
            continue;
        }
        let mut ta = (lo - s) / d;
        let mut tb = (hi - s) / d;
        if ta > tb {
            std::mem::swap(&mut ta, &mut tb);
        }
        t0 = t0.max(ta);
        t1 = t1.min(tb);
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Indices of the leaves whose bounds intersect the corridor's box, in
/// preorder.
pub fn corridor_leaves(bvh: &Bvh, corridor: &Corridor) -> Vec<usize> {
    let query = corridor.bounds();
    let mut out = Vec::new();
    if bvh.is_empty() {
        return out;
    }
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
        let Some(node) = bvh.node(index) else {
            continue;
        };
        if !node.bounds.intersects(&query) {
            continue;
        }
        match node.children() {
            Some((left, right)) => {
                stack.push(right);
                stack.push(left);
            }
            None => out.push(index),
        }
    }
    out
}

/// Appends the triangles of `leaf` accepted by `corridor` to `out`.
pub fn filter_leaf(leaf: &BvhNode, corridor: &Corridor, out: &mut Vec<Triangle>) {
    out.extend(leaf.triangles().iter().filter(|t| corridor.accepts(t)).copied());
}

/// Triangles whose minimum vertex-to-segment distance is within the
/// corridor's half-width.
pub fn corridor_triangles(bvh: &Bvh, corridor: &Corridor) -> Vec<Triangle> {
    let mut out = Vec::new();
    for index in corridor_leaves(bvh, corridor) {
        if let Some(leaf) = bvh.node(index) {
            filter_leaf(leaf, corridor, &mut out);
        }
    }
    log::trace!(
        "corridor half-width {} gathered {} triangles",
        corridor.half_width,
        out.len()
    );
    out
}
