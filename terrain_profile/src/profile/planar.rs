//! Sampling of coplanar regions.
//!
//! Where several consecutive triangles along the segment share one plane,
//! exact crossings alone leave long gaps in the profile. Such regions are
//! approximated by a fixed number of evenly spaced samples.

use crate::geometry::{Point3, Segment3};
use crate::progress::{CancelReason, CancelToken, ProgressReporter, ProgressSink};

use super::intersect::PlaneRecord;
use super::{PointTags, ProfileConfig, RawPoint};

const INSIDE_TOL: f64 = 1e-9;

/// A run of plane records sharing one plane.
#[derive(Debug)]
struct Region {
    t_start: f64,
    t_end: f64,
    records: Vec<PlaneRecord>,
}

/// Groups `records` (in any order) into coplanar regions of at least two
/// records each.
fn group_regions(mut records: Vec<PlaneRecord>, tol: f64) -> Vec<Region> {
    records.sort_by(|a, b| a.t_start.total_cmp(&b.t_start));
    let mut regions = Vec::new();
    let mut current: Vec<PlaneRecord> = Vec::new();
    let close = |run: Vec<PlaneRecord>, regions: &mut Vec<Region>| {
        if run.len() < 2 {
            return;
        }
        let t_start = run.iter().map(|r| r.t_start).fold(f64::INFINITY, f64::min);
        let t_end = run.iter().map(|r| r.t_end).fold(f64::NEG_INFINITY, f64::max);
        regions.push(Region {
            t_start,
            t_end,
            records: run,
        });
    };
    for record in records {
        let matches = current.last().map_or(true, |last| last.same_plane(&record, tol));
        if !matches {
            close(std::mem::take(&mut current), &mut regions);
        }
        current.push(record);
    }
    close(current, &mut regions);
    regions
}

/// Samples every coplanar region of `records` and appends accepted samples
/// to `out` as [`PointTags::PLANE_SAMPLE`] points.
pub(crate) fn sample_regions(
    seg: &Segment3,
    records: Vec<PlaneRecord>,
    config: &ProfileConfig,
    out: &mut Vec<RawPoint>,
    reporter: &mut ProgressReporter,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<(), CancelReason> {
    let regions = group_regions(records, config.plane_tolerance);
    let steps = config.plane_samples;
    let mut processed = 0u64;
    let mut accepted = 0usize;
    for region in &regions {
        cancel.check()?;
        for i in 0..steps {
            let f = if steps > 1 {
                i as f64 / (steps - 1) as f64
            } else {
                0.5
            };
            let t = region.t_start + (region.t_end - region.t_start) * f;
            let plan = seg.point_at(t).xy();
            let hit = region
                .records
                .iter()
                .find_map(|r| r.triangle.elevation_at(plan, INSIDE_TOL));
            if let Some(z) = hit {
                out.push(RawPoint {
                    point: Point3::new(plan.x, plan.y, z),
                    tags: PointTags::PLANE_SAMPLE,
                });
                accepted += 1;
            }
        }
        processed += region.records.len() as u64;
        reporter.update(processed, sink);
    }
    log::debug!(
        "planar merge: {} regions, {} samples accepted",
        regions.len(),
        accepted
    );
    Ok(())
}
