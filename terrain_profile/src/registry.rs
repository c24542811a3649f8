//! Per-surface spatial indexes shared between queries.
//!
//! A [`SpatialIndex`] is immutable once built and handed out as an `Arc`.
//! Rebuilding a surface swaps the `Arc` under the write lock, so queries that
//! already hold the previous index keep using it until they finish.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::breakline::{detect_break_lines, detect_break_lines_with_progress, BreakLineConfig, BreakLineEdge};
use crate::bvh::{Bvh, BvhConfig};
use crate::codec::{self, LoadedSurface, SurfaceDescriptor};
use crate::error::CodecError;
use crate::geometry::Triangle;
use crate::progress::{CancelReason, CancelToken, ProgressSink, SpanSink};

/// BVH and break-lines of one surface. Both are shared, so queries can hold
/// them without copying the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialIndex {
    pub bvh: Arc<Bvh>,
    pub break_lines: Arc<Vec<BreakLineEdge>>,
    pub triangle_count: usize,
}

impl SpatialIndex {
    pub fn build(triangles: Vec<Triangle>, bvh: &BvhConfig, break_lines: &BreakLineConfig) -> Self {
        let lines = detect_break_lines(&triangles, break_lines);
        let triangle_count = triangles.len();
        Self {
            bvh: Arc::new(Bvh::build(triangles, bvh)),
            break_lines: Arc::new(lines),
            triangle_count,
        }
    }

    /// Builds with progress and cancellation. Break-line detection covers
    /// the first 30% of the reported fraction, the BVH build the rest.
    pub fn build_with_progress(
        triangles: Vec<Triangle>,
        bvh: &BvhConfig,
        break_lines: &BreakLineConfig,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Self, CancelReason> {
        cancel.check()?;
        let lines = detect_break_lines_with_progress(&triangles, break_lines, &mut SpanSink::new(sink, (0.0, 0.3)), cancel)?;
        let triangle_count = triangles.len();
        let bvh = Bvh::build_with_progress(triangles, bvh, &mut SpanSink::new(sink, (0.3, 1.0)), cancel)?;
        Ok(Self {
            bvh: Arc::new(bvh),
            break_lines: Arc::new(lines),
            triangle_count,
        })
    }

    fn from_loaded(surface: LoadedSurface) -> (String, Self) {
        let triangle_count = surface.bvh.stats().triangle_count;
        (
            surface.id,
            Self {
                bvh: Arc::new(surface.bvh),
                break_lines: Arc::new(surface.break_lines),
                triangle_count,
            },
        )
    }
}

/// Surface id to index map.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: RwLock<HashMap<String, Arc<SpatialIndex>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SpatialIndex>>> {
        self.surfaces.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SpatialIndex>>> {
        self.surfaces.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `index` for `id`, returning the index it replaced.
    pub fn insert(&self, id: impl Into<String>, index: SpatialIndex) -> Option<Arc<SpatialIndex>> {
        let id = id.into();
        log::info!(
            "registering surface '{}' ({} triangles, {} break-lines)",
            id,
            index.triangle_count,
            index.break_lines.len()
        );
        self.write().insert(id, Arc::new(index))
    }

    /// Builds and stores the index for `triangles`.
    pub fn build(
        &self,
        id: impl Into<String>,
        triangles: Vec<Triangle>,
        bvh: &BvhConfig,
        break_lines: &BreakLineConfig,
    ) -> Arc<SpatialIndex> {
        let id = id.into();
        let index = Arc::new(SpatialIndex::build(triangles, bvh, break_lines));
        self.write().insert(id, Arc::clone(&index));
        index
    }

    pub fn get(&self, id: &str) -> Option<Arc<SpatialIndex>> {
        self.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SpatialIndex>> {
        self.write().remove(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Writes every surface to a BVH payload file and a break-line payload
    /// file, in id order.
    pub fn persist(&self, bvh_path: &Path, break_lines_path: &Path) -> Result<(), CodecError> {
        let snapshot: Vec<(String, Arc<SpatialIndex>)> = {
            let map = self.read();
            let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };
        let descriptors: Vec<SurfaceDescriptor<'_>> = snapshot
            .iter()
            .map(|(id, index)| SurfaceDescriptor {
                id,
                bvh: &index.bvh,
                break_lines: &index.break_lines,
            })
            .collect();
        let (bvh_bytes, line_bytes) = codec::serialize_surfaces(&descriptors)?;
        codec::write_file(bvh_path, &bvh_bytes)?;
        codec::write_file(break_lines_path, &line_bytes)?;
        Ok(())
    }

    /// Loads surfaces from files written by [`SurfaceRegistry::persist`],
    /// replacing any registered under the same ids. Returns the loaded ids.
    pub fn load(&self, bvh_path: &Path, break_lines_path: &Path) -> Result<Vec<String>, CodecError> {
        let surfaces = codec::deserialize_surfaces(&codec::read_file(bvh_path)?, &codec::read_file(break_lines_path)?)?;
        let mut ids = Vec::with_capacity(surfaces.len());
        let mut map = self.write();
        for surface in surfaces {
            let (id, index) = SpatialIndex::from_loaded(surface);
            ids.push(id.clone());
            map.insert(id, Arc::new(index));
        }
        log::info!("loaded {} surfaces from {}", ids.len(), bvh_path.display());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;

    fn square(z: f64) -> Vec<Triangle> {
        let p = |x: f64, y: f64| Point3::new(x, y, z);
        vec![
            Triangle::new(p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)),
            Triangle::new(p(0.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)),
        ]
    }

    #[test]
    fn replacement_leaves_old_readers_untouched() {
        let registry = SurfaceRegistry::new();
        registry.build("ground", square(0.0), &BvhConfig::default(), &BreakLineConfig::default());
        let held = registry.get("ground").unwrap();
        let previous = registry
            .insert(
                "ground",
                SpatialIndex::build(square(5.0), &BvhConfig::default(), &BreakLineConfig::default()),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&held, &previous));
        assert_eq!(held.bvh.root_bounds().unwrap().max.z, 0.0);
        assert_eq!(registry.get("ground").unwrap().bvh.root_bounds().unwrap().max.z, 5.0);
    }

    #[test]
    fn index_counts_and_break_lines() {
        let index = SpatialIndex::build(square(1.0), &BvhConfig::default(), &BreakLineConfig::default());
        assert_eq!(index.triangle_count, 2);
        assert_eq!(index.break_lines.len(), 4);
    }

    #[test]
    fn ids_are_sorted_and_removable() {
        let registry = SurfaceRegistry::new();
        for id in ["b", "a", "c"] {
            registry.build(id, square(0.0), &BvhConfig::default(), &BreakLineConfig::default());
        }
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
        assert!(registry.remove("b").is_some());
        assert_eq!(registry.len(), 2);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn cancelled_build_with_progress() {
        let token = CancelToken::new();
        token.cancel();
        let res = SpatialIndex::build_with_progress(
            square(0.0),
            &BvhConfig::default(),
            &BreakLineConfig::default(),
            &mut crate::progress::NullSink,
            &token,
        );
        assert_eq!(res, Err(CancelReason::Terminated));
    }

    #[test]
    fn handed_out_index_shares_tree_and_lines() {
        let registry = SurfaceRegistry::new();
        let built = registry.build("ground", square(0.0), &BvhConfig::default(), &BreakLineConfig::default());
        let got = registry.get("ground").unwrap();
        let bvh = Arc::clone(&got.bvh);
        assert!(Arc::ptr_eq(&bvh, &built.bvh));
        assert!(Arc::ptr_eq(&got.break_lines, &built.break_lines));
    }

    #[test]
    fn build_reports_break_lines_then_bvh() {
        use crate::progress::{Phase, Progress};

        let mut seen: Vec<(Phase, f64)> = Vec::new();
        let mut sink = |p: &Progress| seen.push((p.phase, p.fraction));
        SpatialIndex::build_with_progress(
            square(0.0),
            &BvhConfig {
                progress_interval_ms: 0,
                ..BvhConfig::default()
            },
            &BreakLineConfig {
                progress_interval_ms: 0,
                ..BreakLineConfig::default()
            },
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(seen.first().map(|s| s.0), Some(Phase::BreakLines));
        assert_eq!(seen.last().map(|s| s.0), Some(Phase::Build));
        assert!(seen.windows(2).all(|w| w[1].1 >= w[0].1));
        assert!(seen.iter().filter(|s| s.0 == Phase::BreakLines).all(|s| s.1 <= 0.3));
        assert_eq!(seen.last().map(|s| s.1), Some(1.0));
    }
}
