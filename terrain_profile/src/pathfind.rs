//! Shortest paths constrained to the surface.
//!
//! Triangles near the straight line between two points are gathered through
//! a corridor query, turned into an undirected graph over their sides, and
//! searched with A* using straight-line distance as the heuristic. The
//! corridor is widened until it contains at least one triangle.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::bvh::Bvh;
use crate::corridor::{corridor_triangles, Corridor};
use crate::error::PathError;
use crate::geometry::{distance3, Point3, Triangle};
use crate::progress::{CancelReason, CancelToken, NullSink, Phase, ProgressReporter, ProgressSink};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Corridor half-width of the first attempt.
    pub initial_width: f64,
    pub max_attempts: usize,
    /// Factor applied to the width after an attempt found no triangles.
    pub growth_factor: f64,
    pub progress_interval_ms: u64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            initial_width: 1.0,
            max_attempts: 200,
            growth_factor: 2.0,
            progress_interval_ms: 100,
        }
    }
}

/// A path over the surface between two graph vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfacePath {
    /// Accumulated 3D length along triangle sides.
    pub distance: f64,
    pub vertices: Vec<Point3>,
    /// Corridor half-width that produced the graph.
    pub corridor_width: f64,
    /// Number of corridor queries issued.
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathOutcome {
    Found(SurfacePath),
    NoPath,
    Cancelled(CancelReason),
}

impl PathOutcome {
    pub fn distance(&self) -> Option<f64> {
        match self {
            PathOutcome::Found(path) => Some(path.distance),
            _ => None,
        }
    }
}

/// Undirected graph over triangle sides. Vertices are deduplicated by exact
/// coordinates.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    vertices: Vec<Point3>,
    neighbours: Vec<Vec<(usize, f64)>>,
}

fn coordinate_key(p: Point3) -> [u64; 3] {
    // -0.0 and 0.0 are the same coordinate.
    let bits = |v: f64| if v == 0.0 { 0 } else { v.to_bits() };
    [bits(p.x), bits(p.y), bits(p.z)]
}

impl AdjacencyGraph {
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        let mut graph = Self::default();
        let mut lookup: HashMap<[u64; 3], usize> = HashMap::new();
        for tri in triangles {
            let ids = tri.vertices().map(|v| {
                *lookup.entry(coordinate_key(v)).or_insert_with(|| {
                    graph.vertices.push(v);
                    graph.neighbours.push(Vec::new());
                    graph.vertices.len() - 1
                })
            });
            for (a, b) in [(ids[0], ids[1]), (ids[1], ids[2]), (ids[2], ids[0])] {
                graph.connect(a, b);
            }
        }
        graph
    }

    fn connect(&mut self, a: usize, b: usize) {
        if a == b || self.neighbours[a].iter().any(|&(n, _)| n == b) {
            return;
        }
        let w = distance3(self.vertices[a], self.vertices[b]);
        self.neighbours[a].push((b, w));
        self.neighbours[b].push((a, w));
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.neighbours.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn vertex(&self, index: usize) -> Option<Point3> {
        self.vertices.get(index).copied()
    }

    pub fn neighbours(&self, index: usize) -> &[(usize, f64)] {
        self.neighbours.get(index).map_or(&[], Vec::as_slice)
    }

    /// Index of the vertex closest to `p` (brute force).
    pub fn nearest(&self, p: Point3) -> Option<usize> {
        self.vertices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| distance3(**a, p).total_cmp(&distance3(**b, p)))
            .map(|(i, _)| i)
    }

    /// A* from `start` to `goal`. Returns the path length and the vertex
    /// sequence, `Ok(None)` when the two are disconnected.
    pub fn shortest_path(
        &self,
        start: usize,
        goal: usize,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
        interval: Duration,
    ) -> Result<Option<(f64, Vec<usize>)>, CancelReason> {
        let n = self.vertices.len();
        if start >= n || goal >= n {
            return Ok(None);
        }
        let target = self.vertices[goal];
        let mut g_score = vec![f64::INFINITY; n];
        let mut came_from = vec![usize::MAX; n];
        let mut closed = vec![false; n];
        let mut heap = BinaryHeap::new();
        let mut reporter = ProgressReporter::new(Phase::PathSearch, n as u64, (0.0, 1.0), Instant::now(), interval);

        g_score[start] = 0.0;
        heap.push(OpenEntry {
            f_score: distance3(self.vertices[start], target),
            vertex: start,
        });
        let mut settled = 0u64;
        while let Some(OpenEntry { vertex, .. }) = heap.pop() {
            if closed[vertex] {
                continue;
            }
            closed[vertex] = true;
            settled += 1;
            if settled % 256 == 0 {
                cancel.check()?;
                reporter.update(settled, sink);
            }
            if vertex == goal {
                reporter.finish(sink);
                let mut path = vec![goal];
                let mut cur = goal;
                while cur != start {
                    cur = came_from[cur];
                    path.push(cur);
                }
                path.reverse();
                return Ok(Some((g_score[goal], path)));
            }
            for &(next, w) in &self.neighbours[vertex] {
                if closed[next] {
                    continue;
                }
                let tentative = g_score[vertex] + w;
                if tentative < g_score[next] {
                    g_score[next] = tentative;
                    came_from[next] = vertex;
                    heap.push(OpenEntry {
                        f_score: tentative + distance3(self.vertices[next], target),
                        vertex: next,
                    });
                }
            }
        }
        reporter.finish(sink);
        Ok(None)
    }
}

/// Open-set entry ordered so that the max-heap pops the lowest f-score.
#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    f_score: f64,
    vertex: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score == other.f_score
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .partial_cmp(&self.f_score)
            .unwrap_or(Ordering::Equal)
    }
}

/// Gathers corridor triangles, widening the corridor until at least one is
/// found. Returns the triangles, the width used and the attempt count.
fn gather_widening(
    start: Point3,
    end: Point3,
    bvh: &Bvh,
    config: &PathConfig,
    cancel: &CancelToken,
) -> Result<Option<(Vec<Triangle>, f64, usize)>, CancelReason> {
    let mut width = config.initial_width;
    for attempt in 1..=config.max_attempts.max(1) {
        cancel.check()?;
        let triangles = corridor_triangles(bvh, &Corridor::new(start, end, width));
        if !triangles.is_empty() {
            return Ok(Some((triangles, width, attempt)));
        }
        log::trace!("path corridor width {} empty (attempt {})", width, attempt);
        width *= config.growth_factor;
        if !width.is_finite() {
            break;
        }
    }
    Ok(None)
}

/// Finds the shortest surface path between the graph vertices nearest to
/// `start` and `end`.
pub fn find_surface_path(
    start: Point3,
    end: Point3,
    bvh: &Bvh,
    config: &PathConfig,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<PathOutcome, PathError> {
    if !config.initial_width.is_finite() || config.initial_width <= 0.0 {
        return Err(PathError::InvalidWidth(config.initial_width));
    }
    if bvh.is_empty() {
        return Ok(PathOutcome::NoPath);
    }
    let (triangles, width, attempts) = match gather_widening(start, end, bvh, config, cancel) {
        Ok(Some(found)) => found,
        Ok(None) => {
            log::debug!("no corridor triangles after {} attempts", config.max_attempts);
            return Ok(PathOutcome::NoPath);
        }
        Err(reason) => return Ok(PathOutcome::Cancelled(reason)),
    };
    let graph = AdjacencyGraph::from_triangles(&triangles);
    let (Some(from), Some(to)) = (graph.nearest(start), graph.nearest(end)) else {
        return Err(PathError::NoCandidateVertices);
    };
    log::debug!(
        "path graph: {} vertices, {} edges from {} triangles (width {})",
        graph.vertex_count(),
        graph.edge_count(),
        triangles.len(),
        width
    );
    let interval = Duration::from_millis(config.progress_interval_ms);
    match graph.shortest_path(from, to, sink, cancel, interval) {
        Ok(Some((distance, ids))) => Ok(PathOutcome::Found(SurfacePath {
            distance,
            vertices: ids.into_iter().filter_map(|i| graph.vertex(i)).collect(),
            corridor_width: width,
            attempts,
        })),
        Ok(None) => Ok(PathOutcome::NoPath),
        Err(reason) => Ok(PathOutcome::Cancelled(reason)),
    }
}

/// Surface-constrained lengths over consecutive vertices of a polyline or
/// polygon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerimeterReport {
    pub total: f64,
    pub segments: Vec<f64>,
    /// Segments without a surface path, measured as straight 3D length.
    pub fallback_segments: usize,
}

/// Sums surface distances between consecutive `points`, closing the ring
/// when `closed`.
pub fn surface_perimeter(
    points: &[Point3],
    closed: bool,
    bvh: &Bvh,
    config: &PathConfig,
) -> Result<PerimeterReport, PathError> {
    let mut pairs: Vec<(Point3, Point3)> = points.windows(2).map(|w| (w[0], w[1])).collect();
    if closed && points.len() > 2 {
        if let (Some(&last), Some(&first)) = (points.last(), points.first()) {
            if last != first {
                pairs.push((last, first));
            }
        }
    }
    let cancel = CancelToken::new();
    let mut report = PerimeterReport::default();
    for (a, b) in pairs {
        let length = match find_surface_path(a, b, bvh, config, &mut NullSink, &cancel)? {
            PathOutcome::Found(path) => path.distance,
            _ => {
                report.fallback_segments += 1;
                distance3(a, b)
            }
        };
        report.total += length;
        report.segments.push(length);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BvhConfig;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    fn grid(n: usize) -> Vec<Triangle> {
        let mut tris = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let (x, y) = (i as f64, j as f64);
                tris.push(Triangle::new(p(x, y, 0.0), p(x + 1.0, y, 0.0), p(x + 1.0, y + 1.0, 0.0)));
                tris.push(Triangle::new(p(x, y, 0.0), p(x + 1.0, y + 1.0, 0.0), p(x, y + 1.0, 0.0)));
            }
        }
        tris
    }

    #[test]
    fn graph_deduplicates_shared_vertices() {
        let g = AdjacencyGraph::from_triangles(&grid(1));
        assert_eq!(g.vertex_count(), 4);
        assert_eq!(g.edge_count(), 5);
        let negative_zero = AdjacencyGraph::from_triangles(&[
            Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)),
            Triangle::new(p(-0.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(-1.0, 0.0, 0.0)),
        ]);
        assert_eq!(negative_zero.vertex_count(), 4);
    }

    #[test]
    fn path_on_flat_grid_follows_diagonals() {
        let bvh = Bvh::build(grid(5), &BvhConfig::default());
        let out = find_surface_path(
            p(0.0, 0.0, 0.0),
            p(3.0, 3.0, 0.0),
            &bvh,
            &PathConfig::default(),
            &mut NullSink,
            &CancelToken::new(),
        )
        .unwrap();
        let path = match out {
            PathOutcome::Found(path) => path,
            other => panic!("expected a path, got {:?}", other),
        };
        assert!((path.distance - 3.0 * 2f64.sqrt()).abs() < 1e-9);
        assert_eq!(path.vertices.first(), Some(&p(0.0, 0.0, 0.0)));
        assert_eq!(path.vertices.last(), Some(&p(3.0, 3.0, 0.0)));
        assert_eq!(path.attempts, 1);
    }

    #[test]
    fn corridor_widens_until_triangles_found() {
        let bvh = Bvh::build(grid(2), &BvhConfig::default());
        let out = find_surface_path(
            p(20.0, 20.0, 0.0),
            p(21.0, 20.0, 0.0),
            &bvh,
            &PathConfig::default(),
            &mut NullSink,
            &CancelToken::new(),
        )
        .unwrap();
        match out {
            PathOutcome::Found(path) => {
                assert!(path.attempts > 1);
                assert!(path.corridor_width >= 16.0);
            }
            other => panic!("expected a path, got {:?}", other),
        }
    }

    #[test]
    fn empty_surface_has_no_path() {
        let out = find_surface_path(
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            &Bvh::default(),
            &PathConfig::default(),
            &mut NullSink,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out, PathOutcome::NoPath);
    }

    #[test]
    fn disconnected_islands_have_no_path() {
        let tris = vec![
            Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)),
            Triangle::new(p(5.0, 0.0, 0.0), p(6.0, 0.0, 0.0), p(5.0, 1.0, 0.0)),
        ];
        let bvh = Bvh::build(tris, &BvhConfig::default());
        let out = find_surface_path(
            p(0.0, 0.0, 0.0),
            p(6.0, 0.0, 0.0),
            &bvh,
            &PathConfig::default(),
            &mut NullSink,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out, PathOutcome::NoPath);
    }

    #[test]
    fn invalid_width_is_rejected() {
        let config = PathConfig {
            initial_width: 0.0,
            ..PathConfig::default()
        };
        let err = find_surface_path(
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            &Bvh::build(grid(1), &BvhConfig::default()),
            &config,
            &mut NullSink,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.name(), "InvalidWidth");
    }

    #[test]
    fn perimeter_falls_back_to_straight_length() {
        let tris = vec![
            Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)),
            Triangle::new(p(5.0, 0.0, 0.0), p(6.0, 0.0, 0.0), p(5.0, 1.0, 0.0)),
        ];
        let bvh = Bvh::build(tris, &BvhConfig::default());
        let report = surface_perimeter(
            &[p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(5.0, 0.0, 0.0)],
            false,
            &bvh,
            &PathConfig::default(),
        )
        .unwrap();
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.fallback_segments, 1);
        assert!((report.total - 5.0).abs() < 1e-9);
    }
}
