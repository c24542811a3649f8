//! Bounding volume hierarchy over surface triangles.
//!
//! The tree is stored as an arena of [`BvhNode`]s with children referenced by
//! index; node 0 is the root. Construction splits at the median centroid on
//! the longest axis and is driven by an explicit work stack, so degenerate
//! inputs cannot exhaust the call stack.
//!
//! Coordinates are not validated. NaN values end up in the node bounds and
//! make them compare as invalid; they are not corrected.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Point3, Triangle};
use crate::progress::{CancelReason, CancelToken, NullSink, Phase, ProgressReporter, ProgressSink};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// An inverted box that any point expands.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    pub fn from_triangle(t: &Triangle) -> Self {
        Self {
            min: t.a.min(t.b).min(t.c),
            max: t.a.max(t.b).max(t.c),
        }
    }

    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        triangles
            .iter()
            .fold(Self::empty(), |acc, t| acc.union(&Self::from_triangle(t)))
    }

    pub fn expand_point(&mut self, p: Point3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Point3::new(margin, margin, margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    pub fn extent(&self) -> Point3 {
        self.max - self.min
    }

    /// Axis with the largest extent; ties prefer x, then y.
    pub fn longest_axis(&self) -> Axis {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            Axis::X
        } else if e.y >= e.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// `true` when min <= max on every axis (false for empty or NaN boxes).
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// `true` if `other` lies entirely within this box.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

/// Split axis of an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf { triangles: Vec<Triangle> },
    Internal { axis: Axis, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub kind: NodeKind,
}

impl BvhNode {
    pub(crate) fn placeholder() -> Self {
        Self {
            bounds: Aabb::empty(),
            kind: NodeKind::Leaf {
                triangles: Vec::new(),
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Triangles stored in a leaf; empty for internal nodes.
    pub fn triangles(&self) -> &[Triangle] {
        match &self.kind {
            NodeKind::Leaf { triangles } => triangles,
            NodeKind::Internal { .. } => &[],
        }
    }

    pub fn children(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Internal { left, right, .. } => Some((left, right)),
            NodeKind::Leaf { .. } => None,
        }
    }
}

/// Build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhConfig {
    /// Leaves hold at most this many triangles unless the depth cap is hit.
    pub max_leaf_size: usize,
    /// Nodes at this depth become leaves regardless of size.
    pub max_depth: usize,
    /// Minimum time between progress reports, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 100,
            max_depth: 40,
            progress_interval_ms: 100,
        }
    }
}

/// Summary counts of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BvhStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub triangle_count: usize,
    /// Depth of the deepest node (root = 0).
    pub max_depth: usize,
    pub max_leaf_size: usize,
}

/// Bounding volume hierarchy; immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
}

struct BuildTask {
    node: usize,
    triangles: Vec<Triangle>,
    depth: usize,
}

impl Bvh {
    /// Builds a tree over `triangles`.
    pub fn build(triangles: Vec<Triangle>, config: &BvhConfig) -> Self {
        // A fresh token is never tripped, so the build always completes.
        Self::build_with_progress(triangles, config, &mut NullSink, &CancelToken::new())
            .unwrap_or_default()
    }

    /// Builds a tree, reporting [`Phase::Build`] progress by the number of
    /// triangles placed into leaves and honouring `cancel` between nodes.
    pub fn build_with_progress(
        triangles: Vec<Triangle>,
        config: &BvhConfig,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Self, CancelReason> {
        if triangles.is_empty() {
            return Ok(Self::default());
        }
        let total = triangles.len();
        let max_leaf = config.max_leaf_size.max(1);
        let mut reporter = ProgressReporter::new(
            Phase::Build,
            total as u64,
            (0.0, 1.0),
            Instant::now(),
            Duration::from_millis(config.progress_interval_ms),
        );

        let mut nodes = Vec::with_capacity(2 * (total / max_leaf) + 1);
        nodes.push(BvhNode::placeholder());
        let mut stack = vec![BuildTask {
            node: 0,
            triangles,
            depth: 0,
        }];
        let mut placed = 0usize;

        while let Some(task) = stack.pop() {
            cancel.check()?;
            let bounds = Aabb::from_triangles(&task.triangles);
            if task.triangles.len() <= max_leaf || task.depth >= config.max_depth {
                placed += task.triangles.len();
                nodes[task.node] = BvhNode {
                    bounds,
                    kind: NodeKind::Leaf {
                        triangles: task.triangles,
                    },
                };
                reporter.update(placed as u64, sink);
                continue;
            }

            let axis = bounds.longest_axis();
            let mut tris = task.triangles;
            tris.sort_by(|p, q| {
                p.centroid()
                    .component(axis.index())
                    .total_cmp(&q.centroid().component(axis.index()))
            });
            let right_tris = tris.split_off(tris.len() / 2);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(BvhNode::placeholder());
            nodes.push(BvhNode::placeholder());
            nodes[task.node] = BvhNode {
                bounds,
                kind: NodeKind::Internal { axis, left, right },
            };
            stack.push(BuildTask {
                node: right,
                triangles: right_tris,
                depth: task.depth + 1,
            });
            stack.push(BuildTask {
                node: left,
                triangles: tris,
                depth: task.depth + 1,
            });
        }
        reporter.finish(sink);

        let bvh = Self { nodes };
        let stats = bvh.stats();
        log::debug!(
            "built bvh: {} triangles, {} nodes, {} leaves, depth {}",
            stats.triangle_count,
            stats.node_count,
            stats.leaf_count,
            stats.max_depth
        );
        Ok(bvh)
    }

    /// Wraps an arena produced elsewhere (the decoder). Node 0 must be the
    /// root and child indices must be in range.
    pub(crate) fn from_nodes(nodes: Vec<BvhNode>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&BvhNode> {
        self.nodes.first()
    }

    /// Bounds of the whole surface when the tree has valid bounds.
    pub fn root_bounds(&self) -> Option<Aabb> {
        self.root().map(|n| n.bounds).filter(Aabb::is_valid)
    }

    pub fn node(&self, index: usize) -> Option<&BvhNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Depth-first preorder walk yielding `(node index, depth)`.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            bvh: self,
            stack: if self.nodes.is_empty() {
                Vec::new()
            } else {
                vec![(0, 0)]
            },
        }
    }

    /// Leaves in preorder.
    pub fn leaves(&self) -> impl Iterator<Item = &BvhNode> + '_ {
        self.preorder()
            .map(move |(i, _)| &self.nodes[i])
            .filter(|n| n.is_leaf())
    }

    /// All triangles in leaf order.
    pub fn triangles(&self) -> impl Iterator<Item = &Triangle> + '_ {
        self.leaves().flat_map(|n| n.triangles().iter())
    }

    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats::default();
        for (i, depth) in self.preorder() {
            let node = &self.nodes[i];
            stats.node_count += 1;
            stats.max_depth = stats.max_depth.max(depth);
            if node.is_leaf() {
                stats.leaf_count += 1;
                stats.triangle_count += node.triangles().len();
                stats.max_leaf_size = stats.max_leaf_size.max(node.triangles().len());
            }
        }
        stats
    }

    /// Surface elevation below the plan point `p`, from the first triangle
    /// that contains it within `tol`. `None` off the surface.
    pub fn elevation_at(&self, p: Point, tol: f64) -> Option<f64> {
        let mut stack = if self.nodes.is_empty() { Vec::new() } else { vec![0usize] };
        while let Some(index) = stack.pop() {
            let node = self.nodes.get(index)?;
            let b = &node.bounds;
            if p.x < b.min.x - tol || p.x > b.max.x + tol || p.y < b.min.y - tol || p.y > b.max.y + tol {
                continue;
            }
            match node.children() {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => {
                    if let Some(z) = node.triangles().iter().find_map(|t| t.elevation_at(p, tol)) {
                        return Some(z);
                    }
                }
            }
        }
        None
    }
}

/// Iterator returned by [`Bvh::preorder`].
pub struct Preorder<'a> {
    bvh: &'a Bvh,
    stack: Vec<(usize, usize)>,
}

impl Iterator for Preorder<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, depth) = self.stack.pop()?;
        if let Some((left, right)) = self.bvh.nodes.get(index).and_then(BvhNode::children) {
            self.stack.push((right, depth + 1));
            self.stack.push((left, depth + 1));
        }
        Some((index, depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(n: usize) -> Vec<Triangle> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                Triangle::new(
                    Point3::new(x, 0.0, 0.0),
                    Point3::new(x + 1.0, 0.0, 0.0),
                    Point3::new(x, 1.0, 0.5),
                )
            })
            .collect()
    }

    #[test]
    fn empty_input_has_no_root() {
        let bvh = Bvh::build(Vec::new(), &BvhConfig::default());
        assert!(bvh.is_empty());
        assert!(bvh.root_bounds().is_none());
        assert_eq!(bvh.stats(), BvhStats::default());
    }

    #[test]
    fn small_input_is_single_leaf() {
        let bvh = Bvh::build(strip(10), &BvhConfig::default());
        let stats = bvh.stats();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.triangle_count, 10);
    }

    #[test]
    fn splits_on_longest_axis() {
        let config = BvhConfig {
            max_leaf_size: 4,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build(strip(16), &config);
        match bvh.root().unwrap().kind {
            NodeKind::Internal { axis, .. } => assert_eq!(axis, Axis::X),
            _ => panic!("root should be internal"),
        }
        let stats = bvh.stats();
        assert_eq!(stats.triangle_count, 16);
        assert!(stats.max_leaf_size <= 4);
        assert_eq!(stats.node_count, 2 * stats.leaf_count - 1);
    }

    #[test]
    fn depth_cap_forces_large_leaves() {
        let config = BvhConfig {
            max_leaf_size: 1,
            max_depth: 2,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build(strip(40), &config);
        let stats = bvh.stats();
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.leaf_count, 4);
        assert_eq!(stats.max_leaf_size, 10);
    }

    #[test]
    fn parent_bounds_contain_children() {
        let config = BvhConfig {
            max_leaf_size: 3,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build(strip(50), &config);
        for node in bvh.nodes() {
            if let Some((l, r)) = node.children() {
                assert!(node.bounds.contains(&bvh.nodes()[l].bounds));
                assert!(node.bounds.contains(&bvh.nodes()[r].bounds));
            }
        }
    }

    #[test]
    fn cancelled_build_stops() {
        let token = CancelToken::new();
        token.cancel();
        let res = Bvh::build_with_progress(strip(10), &BvhConfig::default(), &mut NullSink, &token);
        assert_eq!(res, Err(CancelReason::Terminated));
    }

    #[test]
    fn build_reports_progress_to_completion() {
        let mut last = None;
        let mut sink = |p: &crate::progress::Progress| last = Some(p.fraction);
        let config = BvhConfig {
            max_leaf_size: 2,
            progress_interval_ms: 0,
            ..BvhConfig::default()
        };
        Bvh::build_with_progress(strip(20), &config, &mut sink, &CancelToken::new()).unwrap();
        assert_eq!(last, Some(1.0));
    }

    #[test]
    fn aabb_intersection_and_expansion() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(1.5, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&b));
        assert!(a.expanded(0.5).intersects(&b));
        assert!(!Aabb::empty().is_valid());
    }

    #[test]
    fn elevation_below_plan_point() {
        let tree = Bvh::build(strip(20), &BvhConfig { max_leaf_size: 2, ..BvhConfig::default() });
        // Triangle 7 spans x in [7, 8]; z rises 0.5 per unit of y.
        let z = tree.elevation_at(Point::new(7.25, 0.5), 1e-9).unwrap();
        assert!((z - 0.25).abs() < 1e-12);
        assert_eq!(tree.elevation_at(Point::new(7.9, 0.9), 1e-9), None);
        assert_eq!(tree.elevation_at(Point::new(-3.0, 0.5), 1e-9), None);
        assert_eq!(Bvh::default().elevation_at(Point::new(0.0, 0.0), 1e-9), None);
    }
}
