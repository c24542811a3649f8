use proptest::prelude::*;
use terrain_profile::{
    bvh::{Bvh, BvhConfig},
    geometry::{distance3, Point3, Triangle},
    pathfind::{find_surface_path, surface_perimeter, AdjacencyGraph, PathConfig, PathOutcome},
    progress::{CancelReason, CancelToken, NullSink},
};

fn p(x: f64, y: f64, z: f64) -> Point3 {
    Point3::new(x, y, z)
}

fn find(start: Point3, end: Point3, bvh: &Bvh) -> PathOutcome {
    find_surface_path(start, end, bvh, &PathConfig::default(), &mut NullSink, &CancelToken::new()).unwrap()
}

fn hills(n: usize) -> Vec<Triangle> {
    let z = |x: f64, y: f64| (x * 0.8).sin() * 2.0 + (y * 0.5).cos();
    let mut tris = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let (x, y) = (i as f64, j as f64);
            let a = p(x, y, z(x, y));
            let b = p(x + 1.0, y, z(x + 1.0, y));
            let c = p(x + 1.0, y + 1.0, z(x + 1.0, y + 1.0));
            let d = p(x, y + 1.0, z(x, y + 1.0));
            tris.push(Triangle::new(a, b, c));
            tris.push(Triangle::new(a, c, d));
        }
    }
    tris
}

#[test]
fn two_triangles_take_the_two_edge_path() {
    let a = p(0.0, 0.0, 0.0);
    let b = p(1.0, 0.0, 0.5);
    let c = p(0.0, 1.0, 0.0);
    let d = p(1.0, 1.0, 0.0);
    let bvh = Bvh::build(vec![Triangle::new(a, b, c), Triangle::new(b, d, c)], &BvhConfig::default());
    match find(a, d, &bvh) {
        PathOutcome::Found(path) => {
            assert!((path.distance - 2.0).abs() < 1e-12);
            assert_eq!(path.vertices, vec![a, c, d]);
            assert_eq!(path.attempts, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn corridor_widens_until_triangles_are_found() {
    let bvh = Bvh::build(
        vec![Triangle::new(p(10.0, 10.0, 0.0), p(11.0, 10.0, 0.0), p(10.0, 11.0, 0.0))],
        &BvhConfig::default(),
    );
    match find(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), &bvh) {
        PathOutcome::Found(path) => {
            assert!(path.attempts > 1);
            assert!(path.corridor_width > 1.0);
            // Both ends snap to the same triangle corner.
            assert_eq!(path.distance, 0.0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn disconnected_islands_have_no_path() {
    let bvh = Bvh::build(
        vec![
            Triangle::new(p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)),
            Triangle::new(p(5.0, 0.0, 0.0), p(6.0, 0.0, 0.0), p(5.0, 1.0, 0.0)),
        ],
        &BvhConfig::default(),
    );
    assert_eq!(find(p(0.0, 0.0, 0.0), p(6.0, 0.0, 0.0), &bvh), PathOutcome::NoPath);
}

#[test]
fn empty_surface_has_no_path() {
    assert_eq!(find(p(0.0, 0.0, 0.0), p(1.0, 1.0, 0.0), &Bvh::default()), PathOutcome::NoPath);
}

#[test]
fn cancelled_search_reports_cancellation() {
    let bvh = Bvh::build(hills(4), &BvhConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = find_surface_path(p(0.0, 0.0, 0.0), p(4.0, 4.0, 0.0), &bvh, &PathConfig::default(), &mut NullSink, &cancel)
        .unwrap();
    assert_eq!(outcome, PathOutcome::Cancelled(CancelReason::Terminated));
}

#[test]
fn invalid_width_is_an_error() {
    let bvh = Bvh::build(hills(2), &BvhConfig::default());
    let config = PathConfig {
        initial_width: 0.0,
        ..PathConfig::default()
    };
    let err = find_surface_path(p(0.0, 0.0, 0.0), p(1.0, 1.0, 0.0), &bvh, &config, &mut NullSink, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.name(), "InvalidWidth");
}

#[test]
fn perimeter_of_flat_square() {
    let flat: Vec<Triangle> = hills(4)
        .into_iter()
        .map(|t| {
            let [a, b, c] = t.vertices().map(|v| p(v.x, v.y, 0.0));
            Triangle::new(a, b, c)
        })
        .collect();
    let bvh = Bvh::build(flat, &BvhConfig::default());
    let ring = [p(0.0, 0.0, 0.0), p(4.0, 0.0, 0.0), p(4.0, 4.0, 0.0), p(0.0, 4.0, 0.0)];
    let report = surface_perimeter(&ring, true, &bvh, &PathConfig::default()).unwrap();
    assert_eq!(report.segments.len(), 4);
    assert_eq!(report.fallback_segments, 0);
    assert!((report.total - 16.0).abs() < 1e-9);
}

#[test]
fn adjacency_graph_shares_vertices() {
    let graph = AdjacencyGraph::from_triangles(&hills(2));
    assert_eq!(graph.vertex_count(), 9);
    // 12 grid sides plus 4 diagonals
    assert_eq!(graph.edge_count(), 16);
}

proptest! {
    #[test]
    fn surface_distance_is_at_least_straight_line(
        i0 in 0usize..6, j0 in 0usize..6, i1 in 0usize..6, j1 in 0usize..6,
    ) {
        let tris = hills(5);
        let graph = AdjacencyGraph::from_triangles(&tris);
        let bvh = Bvh::build(tris, &BvhConfig::default());
        let a = graph.vertex(graph.nearest(p(i0 as f64, j0 as f64, 0.0)).unwrap()).unwrap();
        let b = graph.vertex(graph.nearest(p(i1 as f64, j1 as f64, 0.0)).unwrap()).unwrap();
        if let PathOutcome::Found(path) = find(a, b, &bvh) {
            prop_assert!(path.distance + 1e-9 >= distance3(a, b));
            let walked: f64 = path.vertices.windows(2).map(|w| distance3(w[0], w[1])).sum();
            prop_assert!((walked - path.distance).abs() < 1e-9);
        }
    }
}
