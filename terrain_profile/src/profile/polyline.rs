//! Batch profiles over multi-point lines and closed rings.

use serde::{Deserialize, Serialize};

use crate::breakline::BreakLineEdge;
use crate::bvh::Bvh;
use crate::geometry::{Point3, Segment3};
use crate::progress::{CancelReason, CancelToken, Progress, ProgressSink};

use super::{compute_profile, ProfileConfig, ProfileGraph, ProfileOutcome};

/// Outcome of one segment of a polyline profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SegmentResult {
    /// Vertex distances are already offset to the start of the polyline.
    Complete(ProfileGraph),
    Cancelled(CancelReason),
    Failed { name: String, message: String },
}

/// Per-segment results plus the combined profile of the completed segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolylineProfile {
    pub segments: Vec<SegmentResult>,
    pub combined: ProfileGraph,
}

impl PolylineProfile {
    pub fn failed_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, SegmentResult::Failed { .. }))
            .count()
    }

    /// Appends one segment's result, merging its graph into the combined
    /// profile.
    pub fn push(&mut self, result: SegmentResult, boundary_tolerance: f64) {
        if let SegmentResult::Complete(graph) = &result {
            let mut vertices = std::mem::take(&mut self.combined.vertices);
            for v in &graph.vertices {
                match vertices.last_mut() {
                    Some(last) if (v.distance - last.distance).abs() <= boundary_tolerance => {
                        last.tags |= v.tags;
                    }
                    _ => vertices.push(*v),
                }
            }
            self.combined = ProfileGraph::from_vertices(vertices);
        }
        self.segments.push(result);
    }
}

/// Segments of `points`, with the closing segment appended for rings.
pub fn polyline_segments(points: &[Point3], closed: bool) -> Vec<Segment3> {
    let mut segments: Vec<Segment3> = points.windows(2).map(|w| Segment3::new(w[0], w[1])).collect();
    if closed && points.len() > 2 {
        if let (Some(&last), Some(&first)) = (points.last(), points.first()) {
            if last != first {
                segments.push(Segment3::new(last, first));
            }
        }
    }
    segments
}

/// Shifts a segment graph by `offset` plan units.
pub(crate) fn offset_graph(mut graph: ProfileGraph, offset: f64) -> ProfileGraph {
    for v in &mut graph.vertices {
        v.distance += offset;
    }
    graph
}

/// Plan length contributed by `segment` to the cumulative offset. Non-finite
/// segments contribute nothing.
pub(crate) fn offset_length(segment: &Segment3) -> f64 {
    let len = segment.length_2d();
    if len.is_finite() {
        len
    } else {
        0.0
    }
}

/// Rescales a unit's progress into its slot of a batch.
pub(crate) struct BatchSink<'a> {
    pub inner: &'a mut dyn ProgressSink,
    pub index: usize,
    pub count: usize,
    pub floor: f64,
}

impl ProgressSink for BatchSink<'_> {
    fn report(&mut self, progress: &Progress) {
        let n = self.count.max(1) as f64;
        let fraction = ((self.index as f64 + progress.fraction) / n).max(self.floor);
        self.floor = fraction;
        self.inner.report(&Progress {
            fraction,
            ..progress.clone()
        });
    }
}

/// Profiles every segment of a polyline (or ring when `closed`) in turn.
///
/// A failing segment is logged and recorded while the remaining segments
/// continue. A termination request stops the batch after recording the
/// cancelled segment.
#[allow(clippy::too_many_arguments)]
pub fn profile_polyline(
    points: &[Point3],
    closed: bool,
    bvh: &Bvh,
    width: f64,
    break_lines: Option<&[BreakLineEdge]>,
    config: &ProfileConfig,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> PolylineProfile {
    let segments = polyline_segments(points, closed);
    let mut out = PolylineProfile::default();
    let mut offset = 0.0;
    let mut floor = 0.0;
    for (index, segment) in segments.iter().enumerate() {
        let mut batch = BatchSink {
            inner: &mut *sink,
            index,
            count: segments.len(),
            floor,
        };
        let result = match compute_profile(*segment, bvh, width, break_lines, config, &mut batch, cancel) {
            Ok(ProfileOutcome::Complete(graph)) => SegmentResult::Complete(offset_graph(graph, offset)),
            Ok(ProfileOutcome::Cancelled(reason)) => {
                log::warn!("segment {} cancelled: {}", index, reason);
                SegmentResult::Cancelled(reason)
            }
            Err(e) => {
                log::warn!("segment {} failed: {}", index, e);
                SegmentResult::Failed {
                    name: e.name().to_string(),
                    message: e.to_string(),
                }
            }
        };
        floor = batch.floor;
        let stop = result == SegmentResult::Cancelled(CancelReason::Terminated);
        out.push(result, config.boundary_tolerance);
        if stop {
            break;
        }
        offset += offset_length(segment);
    }
    log::debug!(
        "polyline profile: {} segments, {} failed, {} combined vertices",
        out.segments.len(),
        out.failed_segments(),
        out.combined.len()
    );
    out
}
