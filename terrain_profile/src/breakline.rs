//! Break-line detection from triangle adjacency.
//!
//! Edges are matched by their endpoint coordinates rounded to a fixed number
//! of decimals, so triangles that repeat a vertex instead of sharing an index
//! are still recognised as neighbours.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Point3, Triangle};
use crate::progress::{CancelReason, CancelToken, NullSink, Phase, ProgressReporter, ProgressSink};

/// Why an edge was classified as a break-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakLineKind {
    /// Edge with exactly one adjacent triangle (surface outline or hole).
    Boundary,
    /// Ridge or valley: the two adjacent face normals diverge beyond the
    /// threshold angle.
    Dihedral,
}

/// Break-line edge between two surface points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakLineEdge {
    pub start: Point3,
    pub end: Point3,
    pub kind: BreakLineKind,
}

impl BreakLineEdge {
    pub fn new(start: Point3, end: Point3, kind: BreakLineKind) -> Self {
        Self { start, end, kind }
    }

    /// Plan bounding box as `(min, max)`.
    pub fn bbox2d(&self) -> (Point, Point) {
        (
            Point::new(self.start.x.min(self.end.x), self.start.y.min(self.end.y)),
            Point::new(self.start.x.max(self.end.x), self.start.y.max(self.end.y)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakLineConfig {
    /// Dihedral threshold between adjacent face normals, in degrees.
    pub angle_threshold_deg: f64,
    /// Decimals kept when matching coincident vertices.
    pub key_decimals: u32,
    /// Minimum time between progress reports, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for BreakLineConfig {
    fn default() -> Self {
        Self {
            angle_threshold_deg: 30.0,
            key_decimals: 5,
            progress_interval_ms: 100,
        }
    }
}

type VertexKey = (i64, i64, i64);

fn vertex_key(p: Point3, scale: f64) -> VertexKey {
    (
        (p.x * scale).round() as i64,
        (p.y * scale).round() as i64,
        (p.z * scale).round() as i64,
    )
}

struct EdgeEntry {
    start: Point3,
    end: Point3,
    triangles: Vec<usize>,
}

const CHECK_EVERY: usize = 4096;

/// Classifies the edges of `triangles` into boundary and dihedral
/// break-lines. Non-manifold edges (more than two adjacent triangles) are
/// ignored. Output follows the order in which edges are first seen.
pub fn detect_break_lines(triangles: &[Triangle], config: &BreakLineConfig) -> Vec<BreakLineEdge> {
    // A fresh token is never tripped.
    detect_break_lines_with_progress(triangles, config, &mut NullSink, &CancelToken::new()).unwrap_or_default()
}

/// [`detect_break_lines`] reporting [`Phase::BreakLines`] progress. The
/// adjacency pass counts triangles and the classification pass counts edges;
/// each covers half of the phase. `cancel` is checked every few thousand
/// items.
pub fn detect_break_lines_with_progress(
    triangles: &[Triangle],
    config: &BreakLineConfig,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Vec<BreakLineEdge>, CancelReason> {
    let started = Instant::now();
    let interval = Duration::from_millis(config.progress_interval_ms);
    let scale = 10f64.powi(config.key_decimals as i32);
    let mut lookup: HashMap<(VertexKey, VertexKey), usize> = HashMap::new();
    let mut edges: Vec<EdgeEntry> = Vec::new();

    let mut reporter = ProgressReporter::new(Phase::BreakLines, triangles.len() as u64, (0.0, 0.5), started, interval);
    for (ti, tri) in triangles.iter().enumerate() {
        if ti % CHECK_EVERY == 0 {
            cancel.check()?;
            reporter.update(ti as u64, sink);
        }
        for (p, q) in tri.edges() {
            let (kp, kq) = (vertex_key(p, scale), vertex_key(q, scale));
            if kp == kq {
                continue;
            }
            let key = if kp < kq { (kp, kq) } else { (kq, kp) };
            let idx = *lookup.entry(key).or_insert_with(|| {
                edges.push(EdgeEntry {
                    start: p,
                    end: q,
                    triangles: Vec::with_capacity(2),
                });
                edges.len() - 1
            });
            let entry = &mut edges[idx];
            if entry.triangles.last() != Some(&ti) {
                entry.triangles.push(ti);
            }
        }
    }

    reporter.finish(sink);

    let threshold = config.angle_threshold_deg.to_radians();
    let mut out = Vec::new();
    let mut non_manifold = 0usize;
    let mut reporter = ProgressReporter::new(Phase::BreakLines, edges.len() as u64, (0.5, 1.0), started, interval);
    for (ei, edge) in edges.iter().enumerate() {
        if ei % CHECK_EVERY == 0 {
            cancel.check()?;
            reporter.update(ei as u64, sink);
        }
        match edge.triangles.as_slice() {
            [_] => out.push(BreakLineEdge::new(edge.start, edge.end, BreakLineKind::Boundary)),
            [a, b] => {
                let (Some(na), Some(nb)) = (triangles[*a].normal(), triangles[*b].normal()) else {
                    log::trace!("skipping edge with degenerate adjacent face");
                    continue;
                };
                let angle = na.dot(nb).clamp(-1.0, 1.0).acos();
                if angle > threshold {
                    out.push(BreakLineEdge::new(edge.start, edge.end, BreakLineKind::Dihedral));
                }
            }
            _ => non_manifold += 1,
        }
    }
    log::debug!(
        "classified {} edges: {} break-lines, {} non-manifold ignored",
        edges.len(),
        out.len(),
        non_manifold
    );
    reporter.finish(sink);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    #[test]
    fn single_triangle_is_all_boundary() {
        let tri = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0));
        let lines = detect_break_lines(&[tri], &BreakLineConfig::default());
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.kind == BreakLineKind::Boundary));
    }

    #[test]
    fn flat_pair_shares_no_break_line() {
        let a = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(1.0, 1.0, 0.0));
        let b = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 1.0, 0.0), p(0.0, 1.0, 0.0));
        let lines = detect_break_lines(&[a, b], &BreakLineConfig::default());
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.kind == BreakLineKind::Boundary));
    }

    #[test]
    fn ridge_is_dihedral() {
        // Two faces meeting along the ridge x = 1 at 45 degrees each.
        let a = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 1.0), p(1.0, 1.0, 1.0));
        let b = Triangle::new(p(1.0, 0.0, 1.0), p(2.0, 0.0, 0.0), p(1.0, 1.0, 1.0));
        let lines = detect_break_lines(&[a, b], &BreakLineConfig::default());
        let ridge: Vec<_> = lines
            .iter()
            .filter(|l| l.kind == BreakLineKind::Dihedral)
            .collect();
        assert_eq!(ridge.len(), 1);
        assert!((ridge[0].start.x - 1.0).abs() < 1e-9 && (ridge[0].end.x - 1.0).abs() < 1e-9);

        let loose = BreakLineConfig {
            angle_threshold_deg: 120.0,
            ..BreakLineConfig::default()
        };
        assert!(detect_break_lines(&[a, b], &loose)
            .iter()
            .all(|l| l.kind == BreakLineKind::Boundary));
    }

    #[test]
    fn coincident_vertices_within_rounding_match() {
        let a = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(1.0, 1.0, 0.0));
        let b = Triangle::new(p(0.000_001, 0.0, 0.0), p(1.0, 1.000_001, 0.0), p(0.0, 1.0, 0.0));
        let lines = detect_break_lines(&[a, b], &BreakLineConfig::default());
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn non_manifold_edge_is_ignored() {
        let shared = (p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0));
        let fins = [
            Triangle::new(shared.0, shared.1, p(0.5, 1.0, 0.0)),
            Triangle::new(shared.0, shared.1, p(0.5, -1.0, 0.0)),
            Triangle::new(shared.0, shared.1, p(0.5, 0.0, 1.0)),
        ];
        let lines = detect_break_lines(&fins, &BreakLineConfig::default());
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|l| !(l.start == shared.0 && l.end == shared.1)));
    }

    #[test]
    fn progress_reports_break_line_phase_up_to_one() {
        let a = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 1.0), p(1.0, 1.0, 1.0));
        let b = Triangle::new(p(1.0, 0.0, 1.0), p(2.0, 0.0, 0.0), p(1.0, 1.0, 1.0));
        let config = BreakLineConfig {
            progress_interval_ms: 0,
            ..BreakLineConfig::default()
        };
        let mut seen = Vec::new();
        let mut sink = |pr: &crate::progress::Progress| seen.push((pr.phase, pr.fraction));
        let lines = detect_break_lines_with_progress(&[a, b], &config, &mut sink, &CancelToken::new()).unwrap();
        assert_eq!(lines, detect_break_lines(&[a, b], &config));
        assert!(seen.iter().all(|(phase, _)| *phase == Phase::BreakLines));
        assert!(seen.windows(2).all(|w| w[1].1 >= w[0].1));
        assert_eq!(seen.last().map(|s| s.1), Some(1.0));
    }

    #[test]
    fn cancelled_detection_stops() {
        let tri = Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0));
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = detect_break_lines_with_progress(&[tri], &BreakLineConfig::default(), &mut NullSink, &cancel);
        assert_eq!(out, Err(CancelReason::Terminated));
    }
}
