//! Background computation units.
//!
//! Each request runs on its own thread and talks to the caller only through
//! a channel: zero or more [`WorkerMessage::Progress`] messages followed by
//! exactly one [`WorkerMessage::Done`]. The worker drops its sender right
//! after the terminal message, so nothing can follow it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breakline::{BreakLineConfig, BreakLineEdge};
use crate::bvh::{Bvh, BvhConfig};
use crate::geometry::{Point3, Segment3, Triangle};
use crate::pathfind::{find_surface_path, PathConfig, PathOutcome, SurfacePath};
use crate::profile::{
    compute_profile, offset_graph, offset_length, polyline_segments, BatchSink, PolylineProfile, ProfileConfig,
    ProfileGraph, ProfileOutcome, SegmentResult,
};
use crate::progress::{CancelReason, CancelToken, Progress, ProgressSink};
use crate::registry::SpatialIndex;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Profile of one segment against a shared index.
#[derive(Debug, Clone)]
pub struct ProfileRequest {
    pub segment: Segment3,
    pub bvh: Arc<Bvh>,
    pub width: f64,
    pub break_lines: Option<Arc<Vec<BreakLineEdge>>>,
    pub config: ProfileConfig,
}

#[derive(Debug, Clone)]
pub struct PathRequest {
    pub start: Point3,
    pub end: Point3,
    pub bvh: Arc<Bvh>,
    pub config: PathConfig,
}

#[derive(Debug, Clone)]
pub enum Request {
    BuildIndex {
        triangles: Vec<Triangle>,
        bvh: BvhConfig,
        break_lines: BreakLineConfig,
    },
    Profile(ProfileRequest),
    Path(PathRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Index(SpatialIndex),
    Profile(ProfileGraph),
    /// `None` when the surface offers no path between the points.
    Path(Option<SurfacePath>),
}

/// Error reported by a unit that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub name: String,
    pub message: String,
}

/// Terminal result of a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed(WorkerOutput),
    Failed(WorkerFailure),
    Cancelled(CancelReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Progress(Progress),
    Done(WorkerOutcome),
}

/// Forwards progress over the channel, never letting the fraction go back.
struct ChannelSink {
    tx: Sender<WorkerMessage>,
    floor: f64,
}

impl ProgressSink for ChannelSink {
    fn report(&mut self, progress: &Progress) {
        let fraction = progress.fraction.max(self.floor);
        self.floor = fraction;
        // The receiver may already be gone; the unit keeps running until its
        // next cancellation check.
        let _ = self.tx.send(WorkerMessage::Progress(Progress {
            fraction,
            ..progress.clone()
        }));
    }
}

fn failure(name: &str, message: impl Into<String>) -> WorkerOutcome {
    WorkerOutcome::Failed(WorkerFailure {
        name: name.to_string(),
        message: message.into(),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run(request: Request, sink: &mut dyn ProgressSink, cancel: &CancelToken) -> WorkerOutcome {
    match request {
        Request::BuildIndex {
            triangles,
            bvh,
            break_lines,
        } => match SpatialIndex::build_with_progress(triangles, &bvh, &break_lines, sink, cancel) {
            Ok(index) => WorkerOutcome::Completed(WorkerOutput::Index(index)),
            Err(reason) => WorkerOutcome::Cancelled(reason),
        },
        Request::Profile(req) => {
            let lines = req.break_lines.as_deref().map(Vec::as_slice);
            match compute_profile(req.segment, &req.bvh, req.width, lines, &req.config, sink, cancel) {
                Ok(ProfileOutcome::Complete(graph)) => WorkerOutcome::Completed(WorkerOutput::Profile(graph)),
                Ok(ProfileOutcome::Cancelled(reason)) => WorkerOutcome::Cancelled(reason),
                Err(e) => failure(e.name(), e.to_string()),
            }
        }
        Request::Path(req) => match find_surface_path(req.start, req.end, &req.bvh, &req.config, sink, cancel) {
            Ok(PathOutcome::Found(path)) => WorkerOutcome::Completed(WorkerOutput::Path(Some(path))),
            Ok(PathOutcome::NoPath) => WorkerOutcome::Completed(WorkerOutput::Path(None)),
            Ok(PathOutcome::Cancelled(reason)) => WorkerOutcome::Cancelled(reason),
            Err(e) => failure(e.name(), e.to_string()),
        },
    }
}

/// Runs `request` on a new thread with its own cancel token.
pub fn spawn(request: Request) -> WorkerHandle {
    spawn_with_cancel(request, CancelToken::new())
}

/// Runs `request` on a new thread observing `cancel`.
pub fn spawn_with_cancel(request: Request, cancel: CancelToken) -> WorkerHandle {
    let (tx, rx) = mpsc::channel();
    let token = cancel.clone();
    let thread = thread::spawn(move || {
        let mut sink = ChannelSink {
            tx: tx.clone(),
            floor: 0.0,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(request, &mut sink, &token)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log::error!("worker panicked: {}", message);
                failure("panic", message)
            });
        drop(sink);
        let _ = tx.send(WorkerMessage::Done(outcome));
    });
    WorkerHandle {
        rx,
        cancel,
        thread: Some(thread),
    }
}

/// Caller side of a running unit.
#[derive(Debug)]
pub struct WorkerHandle {
    rx: Receiver<WorkerMessage>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Asks the unit to stop at its next yield point.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Token that terminates this unit when cancelled, for use from other
    /// threads.
    pub fn terminator(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Next message, blocking. `None` once the unit has finished and every
    /// message was received.
    pub fn recv(&self) -> Option<WorkerMessage> {
        self.rx.recv().ok()
    }

    /// Blocks until the unit finishes, passing progress to `on_progress`.
    ///
    /// After a termination request this returns `Cancelled(Terminated)`
    /// without waiting for the unit to reach its next yield point.
    pub fn wait(mut self, on_progress: &mut dyn ProgressSink) -> WorkerOutcome {
        loop {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(WorkerMessage::Progress(p)) => on_progress.report(&p),
                Ok(WorkerMessage::Done(outcome)) => {
                    self.join();
                    return outcome;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        log::debug!("worker terminated while waiting");
                        return WorkerOutcome::Cancelled(CancelReason::Terminated);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.join();
                    return failure("disconnected", "worker exited without a result");
                }
            }
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("worker thread exited abnormally");
            }
        }
    }
}

/// Profiles each segment of a polyline (or ring when `closed`) in its own
/// worker, one after the other. Cancelling `cancel` terminates the running
/// segment and stops the batch.
#[allow(clippy::too_many_arguments)]
pub fn profile_polyline_with_workers(
    points: &[Point3],
    closed: bool,
    bvh: Arc<Bvh>,
    width: f64,
    break_lines: Option<Arc<Vec<BreakLineEdge>>>,
    config: &ProfileConfig,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> PolylineProfile {
    let segments = polyline_segments(points, closed);
    let mut out = PolylineProfile::default();
    let mut offset = 0.0;
    let mut floor = 0.0;
    for (index, segment) in segments.iter().enumerate() {
        let handle = spawn_with_cancel(
            Request::Profile(ProfileRequest {
                segment: *segment,
                bvh: Arc::clone(&bvh),
                width,
                break_lines: break_lines.clone(),
                config: config.clone(),
            }),
            cancel.clone(),
        );
        let mut batch = BatchSink {
            inner: &mut *sink,
            index,
            count: segments.len(),
            floor,
        };
        let result = match handle.wait(&mut batch) {
            WorkerOutcome::Completed(WorkerOutput::Profile(graph)) => {
                SegmentResult::Complete(offset_graph(graph, offset))
            }
            WorkerOutcome::Completed(other) => SegmentResult::Failed {
                name: "UnexpectedOutput".to_string(),
                message: format!("profile worker returned {:?}", other),
            },
            WorkerOutcome::Failed(f) => {
                log::warn!("segment {} failed: {}: {}", index, f.name, f.message);
                SegmentResult::Failed {
                    name: f.name,
                    message: f.message,
                }
            }
            WorkerOutcome::Cancelled(reason) => {
                log::warn!("segment {} cancelled: {}", index, reason);
                SegmentResult::Cancelled(reason)
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
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    fn grid(n: usize) -> Vec<Triangle> {
        let mut out = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let (x, y) = (i as f64, j as f64);
                out.push(Triangle::new(p(x, y, 0.0), p(x + 1.0, y, 0.0), p(x + 1.0, y + 1.0, 0.0)));
                out.push(Triangle::new(p(x, y, 0.0), p(x + 1.0, y + 1.0, 0.0), p(x, y + 1.0, 0.0)));
            }
        }
        out
    }

    #[test]
    fn build_reports_progress_then_one_terminal_message() {
        let handle = spawn(Request::BuildIndex {
            triangles: grid(8),
            bvh: BvhConfig {
                max_leaf_size: 4,
                progress_interval_ms: 0,
                ..BvhConfig::default()
            },
            break_lines: BreakLineConfig::default(),
        });
        let mut messages = Vec::new();
        while let Some(m) = handle.recv() {
            messages.push(m);
        }
        let terminal = messages.iter().filter(|m| matches!(m, WorkerMessage::Done(_))).count();
        assert_eq!(terminal, 1);
        assert!(matches!(messages[0], WorkerMessage::Progress(_)));
        match messages.last() {
            Some(WorkerMessage::Done(WorkerOutcome::Completed(WorkerOutput::Index(index)))) => {
                assert_eq!(index.triangle_count, 128);
            }
            other => panic!("unexpected terminal message {:?}", other),
        }
        let mut last = 0.0;
        for m in &messages {
            if let WorkerMessage::Progress(p) = m {
                assert!(p.fraction >= last);
                last = p.fraction;
            }
        }
    }

    #[test]
    fn terminated_unit_reports_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let handle = spawn_with_cancel(
            Request::BuildIndex {
                triangles: grid(4),
                bvh: BvhConfig::default(),
                break_lines: BreakLineConfig::default(),
            },
            token,
        );
        assert_eq!(
            handle.wait(&mut NullSink),
            WorkerOutcome::Cancelled(CancelReason::Terminated)
        );
    }

    #[test]
    fn profile_error_is_reported_as_failure() {
        let bvh = Arc::new(Bvh::build(grid(2), &BvhConfig::default()));
        let handle = spawn(Request::Profile(ProfileRequest {
            segment: Segment3::new(p(0.5, 0.5, 0.0), p(1.5, 0.5, 0.0)),
            bvh,
            width: -1.0,
            break_lines: None,
            config: ProfileConfig::default(),
        }));
        match handle.wait(&mut NullSink) {
            WorkerOutcome::Failed(f) => assert_eq!(f.name, "InvalidWidth"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn path_request_completes() {
        let bvh = Arc::new(Bvh::build(grid(3), &BvhConfig::default()));
        let handle = spawn(Request::Path(PathRequest {
            start: p(0.0, 0.0, 0.0),
            end: p(3.0, 0.0, 0.0),
            bvh,
            config: PathConfig::default(),
        }));
        match handle.wait(&mut NullSink) {
            WorkerOutcome::Completed(WorkerOutput::Path(Some(path))) => {
                assert!((path.distance - 3.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn polyline_batch_matches_inline_offsets() {
        let bvh = Arc::new(Bvh::build(grid(4), &BvhConfig::default()));
        let points = [p(0.5, 0.5, 0.0), p(3.5, 0.5, 0.0), p(3.5, 3.5, 0.0)];
        let out = profile_polyline_with_workers(
            &points,
            false,
            bvh,
            0.5,
            None,
            &ProfileConfig::default(),
            &mut NullSink,
            &CancelToken::new(),
        );
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.failed_segments(), 0);
        let last = out.combined.vertices.last().unwrap();
        assert!((last.distance - 6.0).abs() < 1e-9);
        for w in out.combined.vertices.windows(2) {
            assert!(w[1].distance > w[0].distance);
        }
    }
}
