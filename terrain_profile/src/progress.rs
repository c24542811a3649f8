//! Progress reporting and cooperative cancellation for long-running work.
//!
//! Algorithms stay synchronous; they take a [`ProgressSink`] and a
//! [`CancelToken`] and check both at their yield points (between chunks of
//! triangles, between BVH nodes, between heap pops).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Stage of a computation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Build,
    BreakLines,
    Gather,
    PlanarMerge,
    Assemble,
    PathSearch,
}

/// Why a unit stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// An explicit termination request.
    Terminated,
    /// The soft memory ceiling was exceeded while gathering.
    MemoryCeiling,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Terminated => write!(f, "terminated"),
            CancelReason::MemoryCeiling => write!(f, "memory ceiling exceeded"),
        }
    }
}

/// Progress information passed to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    /// Items processed so far in this phase.
    pub processed: u64,
    /// Items in this phase.
    pub total: u64,
    /// Overall fraction of the unit (0.0 to 1.0), across phases.
    pub fraction: f64,
    /// Time since the unit started.
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
}

/// Receiver of progress snapshots.
pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Sink that discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&mut self, _progress: &Progress) {}
}

/// Forwards reports with their fraction rescaled into `span`, for a step
/// that runs as one stage of a larger unit.
pub struct SpanSink<'a> {
    inner: &'a mut dyn ProgressSink,
    span: (f64, f64),
}

impl<'a> SpanSink<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink, span: (f64, f64)) -> Self {
        Self { inner, span }
    }
}

impl ProgressSink for SpanSink<'_> {
    fn report(&mut self, progress: &Progress) {
        let (lo, hi) = self.span;
        self.inner.report(&Progress {
            fraction: lo + (hi - lo) * progress.fraction.clamp(0.0, 1.0),
            ..progress.clone()
        });
    }
}

/// Shared flag used to request termination of a running unit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Yield point: `Err(Terminated)` once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.is_cancelled() {
            Err(CancelReason::Terminated)
        } else {
            Ok(())
        }
    }
}

/// Throttled reporter for one phase of a unit.
///
/// The phase maps onto the span `[span.0, span.1]` of the unit's overall
/// fraction so that consecutive phases never move the fraction backwards.
#[derive(Debug)]
pub struct ProgressReporter {
    phase: Phase,
    total: u64,
    span: (f64, f64),
    started: Instant,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(phase: Phase, total: u64, span: (f64, f64), started: Instant, interval: Duration) -> Self {
        Self {
            phase,
            total,
            span,
            started,
            interval,
            last_emit: None,
        }
    }

    /// Builds the snapshot for `processed` items without emitting it.
    pub fn snapshot(&self, processed: u64) -> Progress {
        let local = if self.total == 0 {
            1.0
        } else {
            (processed.min(self.total) as f64) / (self.total as f64)
        };
        let fraction = (self.span.0 + (self.span.1 - self.span.0) * local).clamp(0.0, 1.0);
        let elapsed = self.started.elapsed();
        let estimated_remaining = if fraction > 0.0 && fraction < 1.0 {
            let secs = elapsed.as_secs_f64() * (1.0 - fraction) / fraction;
            Some(Duration::from_secs_f64(secs))
        } else if fraction >= 1.0 {
            Some(Duration::ZERO)
        } else {
            None
        };
        Progress {
            phase: self.phase,
            processed: processed.min(self.total),
            total: self.total,
            fraction,
            elapsed,
            estimated_remaining,
        }
    }

    /// Emits a snapshot if the reporting interval has passed since the last
    /// emission. The first call always emits.
    pub fn update(&mut self, processed: u64, sink: &mut dyn ProgressSink) {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        self.last_emit = Some(now);
        sink.report(&self.snapshot(processed));
    }

    /// Emits the end-of-phase snapshot unconditionally.
    pub fn finish(&mut self, sink: &mut dyn ProgressSink) {
        self.last_emit = Some(Instant::now());
        sink.report(&self.snapshot(self.total));
    }
}
