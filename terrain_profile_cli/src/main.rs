use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use terrain_profile::{
    breakline::{detect_break_lines, BreakLineEdge, BreakLineKind},
    geometry::{Point3, Segment3},
    io::{read_points_csv3, read_surface, write_string},
    pathfind::{surface_perimeter, PathOutcome},
    profile::{PolylineProfile, ProfileGraph, SegmentResult},
    progress::{CancelToken, Progress},
    registry::{SpatialIndex, SurfaceRegistry},
    worker::{self, PathRequest, ProfileRequest, Request, WorkerOutcome, WorkerOutput},
    EngineConfig,
};

/// Terrain surface indexing, profiles and surface distances.
#[derive(Parser)]
#[command(name = "terrain_profile_cli", version)]
struct Cli {
    /// JSON engine configuration file
    #[arg(long, global = true)]
    config: Option<String>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Persisted index files and the surface to query.
#[derive(Args)]
struct IndexArgs {
    /// BVH payload written by build-index
    bvh: String,
    /// Break-line payload written by build-index
    breaklines: String,
    /// Surface id; defaults to the first surface in the files
    #[arg(long)]
    surface: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the spatial index of a surface (LandXML, triangle CSV or raw f32 buffer).
    BuildIndex {
        input: String,
        bvh_out: String,
        breaklines_out: String,
        #[arg(long, default_value = "surface")]
        id: String,
        #[arg(long)]
        max_leaf: Option<usize>,
        #[arg(long)]
        angle: Option<f64>,
    },
    /// Print statistics of persisted surface indexes.
    IndexInfo {
        bvh: String,
        breaklines: String,
        #[arg(long)]
        json: bool,
    },
    /// Detect break-lines of a surface and write them as CSV.
    BreakLines {
        input: String,
        output: String,
        #[arg(long)]
        angle: Option<f64>,
    },
    /// Elevation profile along a straight line.
    Profile {
        #[command(flatten)]
        index: IndexArgs,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[arg(long, default_value_t = 1.0)]
        width: f64,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Elevation profile along a polyline read from an x,y,z CSV file.
    PolylineProfile {
        #[command(flatten)]
        index: IndexArgs,
        points: String,
        #[arg(long)]
        closed: bool,
        #[arg(long, default_value_t = 1.0)]
        width: f64,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Shortest distance over the surface between two points.
    Path {
        #[command(flatten)]
        index: IndexArgs,
        x1: f64,
        y1: f64,
        z1: f64,
        x2: f64,
        y2: f64,
        z2: f64,
        #[arg(long)]
        width: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Surface length of a polyline or polygon read from an x,y,z CSV file.
    Perimeter {
        #[command(flatten)]
        index: IndexArgs,
        points: String,
        #[arg(long)]
        closed: bool,
    },
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error {}", msg);
    std::process::exit(1);
}

fn log_progress(p: &Progress) {
    log::debug!(
        "{:?}: {}/{} ({:.0}%)",
        p.phase,
        p.processed,
        p.total,
        p.fraction * 100.0
    );
}

fn load_config(path: Option<&str>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::from_json_file(Path::new(path)).unwrap_or_else(|e| fail(e)),
        None => EngineConfig::default(),
    }
}

fn load_index(args: &IndexArgs) -> (String, Arc<SpatialIndex>) {
    let registry = SurfaceRegistry::new();
    let ids = registry
        .load(Path::new(&args.bvh), Path::new(&args.breaklines))
        .unwrap_or_else(|e| fail(format!("reading {}: {}", args.bvh, e)));
    let id = match &args.surface {
        Some(id) => id.clone(),
        None => ids
            .first()
            .cloned()
            .unwrap_or_else(|| fail(format!("no surfaces in {}", args.bvh))),
    };
    match registry.get(&id) {
        Some(index) => (id, index),
        None => fail(format!("unknown surface {}", id)),
    }
}

fn read_points(path: &str) -> Vec<Point3> {
    read_points_csv3(path).unwrap_or_else(|e| fail(format!("reading {}: {}", path, e)))
}

fn break_lines_csv(lines: &[BreakLineEdge]) -> String {
    let mut out = String::from("x1,y1,z1,x2,y2,z2,kind\n");
    for l in lines {
        let kind = match l.kind {
            BreakLineKind::Boundary => "boundary",
            BreakLineKind::Dihedral => "dihedral",
        };
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            l.start.x, l.start.y, l.start.z, l.end.x, l.end.y, l.end.z, kind
        );
    }
    out
}

fn profile_csv(graph: &ProfileGraph) -> String {
    let mut out = String::from("distance,elevation,x,y,tags\n");
    for v in &graph.vertices {
        let _ = writeln!(
            out,
            "{:.3},{:.3},{:.3},{:.3},{}",
            v.distance, v.elevation, v.x, v.y, v.tags
        );
    }
    out
}

fn emit(text: &str, output: Option<&str>) {
    match output {
        Some(path) => match write_string(path, text) {
            Ok(()) => println!("Wrote {}", path),
            Err(e) => fail(format!("writing {}: {}", path, e)),
        },
        None => print!("{}", text),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(e)) + "\n"
}

fn report_polyline(out: &PolylineProfile) {
    for (i, segment) in out.segments.iter().enumerate() {
        match segment {
            SegmentResult::Complete(_) => {}
            SegmentResult::Cancelled(reason) => eprintln!("Segment {} cancelled: {}", i, reason),
            SegmentResult::Failed { name, message } => eprintln!("Segment {} failed ({}): {}", i, name, message),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose && std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
    let mut config = load_config(cli.config.as_deref());
    let cancel = CancelToken::new();
    let mut progress = log_progress;

    match cli.command {
        Commands::BuildIndex {
            input,
            bvh_out,
            breaklines_out,
            id,
            max_leaf,
            angle,
        } => {
            if let Some(n) = max_leaf {
                config.bvh.max_leaf_size = n;
            }
            if let Some(a) = angle {
                config.break_lines.angle_threshold_deg = a;
            }
            if let Err(e) = config.validate() {
                fail(e);
            }
            let triangles = read_surface(&input).unwrap_or_else(|e| fail(format!("reading {}: {}", input, e)));
            let handle = worker::spawn(Request::BuildIndex {
                triangles,
                bvh: config.bvh.clone(),
                break_lines: config.break_lines.clone(),
            });
            let index = match handle.wait(&mut progress) {
                WorkerOutcome::Completed(WorkerOutput::Index(index)) => index,
                other => fail(format!("building index: {:?}", other)),
            };
            let stats = index.bvh.stats();
            println!(
                "Indexed {} triangles: {} nodes, {} leaves, depth {}, {} break-lines",
                index.triangle_count,
                stats.node_count,
                stats.leaf_count,
                stats.max_depth,
                index.break_lines.len()
            );
            let registry = SurfaceRegistry::new();
            registry.insert(id, index);
            match registry.persist(Path::new(&bvh_out), Path::new(&breaklines_out)) {
                Ok(()) => {
                    println!("Wrote {}", bvh_out);
                    println!("Wrote {}", breaklines_out);
                }
                Err(e) => fail(format!("writing {}: {}", bvh_out, e)),
            }
        }
        Commands::IndexInfo { bvh, breaklines, json } => {
            let registry = SurfaceRegistry::new();
            let ids = registry
                .load(Path::new(&bvh), Path::new(&breaklines))
                .unwrap_or_else(|e| fail(format!("reading {}: {}", bvh, e)));
            let mut rows = Vec::new();
            for id in ids {
                if let Some(index) = registry.get(&id) {
                    rows.push(serde_json::json!({
                        "id": &id,
                        "stats": index.bvh.stats(),
                        "break_lines": index.break_lines.len(),
                    }));
                    if !json {
                        let s = index.bvh.stats();
                        println!(
                            "{}: {} triangles, {} nodes, {} leaves, depth {}, {} break-lines",
                            id,
                            s.triangle_count,
                            s.node_count,
                            s.leaf_count,
                            s.max_depth,
                            index.break_lines.len()
                        );
                    }
                }
            }
            if json {
                print!("{}", to_json(&rows));
            }
        }
        Commands::BreakLines { input, output, angle } => {
            if let Some(a) = angle {
                config.break_lines.angle_threshold_deg = a;
            }
            if let Err(e) = config.validate() {
                fail(e);
            }
            let triangles = read_surface(&input).unwrap_or_else(|e| fail(format!("reading {}: {}", input, e)));
            let lines = detect_break_lines(&triangles, &config.break_lines);
            println!("Found {} break-lines", lines.len());
            emit(&break_lines_csv(&lines), Some(output.as_str()));
        }
        Commands::Profile {
            index,
            x1,
            y1,
            x2,
            y2,
            width,
            output,
            json,
        } => {
            let (id, surface) = load_index(&index);
            log::info!("profiling surface {}", id);
            let handle = worker::spawn(Request::Profile(ProfileRequest {
                segment: Segment3::new(Point3::new(x1, y1, 0.0), Point3::new(x2, y2, 0.0)),
                bvh: Arc::clone(&surface.bvh),
                width,
                break_lines: Some(Arc::clone(&surface.break_lines)),
                config: config.profile.clone(),
            }));
            let graph = match handle.wait(&mut progress) {
                WorkerOutcome::Completed(WorkerOutput::Profile(graph)) => graph,
                WorkerOutcome::Failed(f) => fail(format!("{}: {}", f.name, f.message)),
                other => fail(format!("profile: {:?}", other)),
            };
            let text = if json { to_json(&graph) } else { profile_csv(&graph) };
            emit(&text, output.as_deref());
        }
        Commands::PolylineProfile {
            index,
            points,
            closed,
            width,
            output,
            json,
        } => {
            let (_, surface) = load_index(&index);
            let pts = read_points(&points);
            let out = worker::profile_polyline_with_workers(
                &pts,
                closed,
                Arc::clone(&surface.bvh),
                width,
                Some(Arc::clone(&surface.break_lines)),
                &config.profile,
                &mut progress,
                &cancel,
            );
            report_polyline(&out);
            let text = if json { to_json(&out) } else { profile_csv(&out.combined) };
            emit(&text, output.as_deref());
        }
        Commands::Path {
            index,
            x1,
            y1,
            z1,
            x2,
            y2,
            z2,
            width,
            json,
        } => {
            if let Some(w) = width {
                config.path.initial_width = w;
            }
            let (_, surface) = load_index(&index);
            let handle = worker::spawn(Request::Path(PathRequest {
                start: Point3::new(x1, y1, z1),
                end: Point3::new(x2, y2, z2),
                bvh: Arc::clone(&surface.bvh),
                config: config.path.clone(),
            }));
            match handle.wait(&mut progress) {
                WorkerOutcome::Completed(WorkerOutput::Path(Some(path))) => {
                    if json {
                        print!("{}", to_json(&path));
                    } else {
                        println!("Distance: {:.3}", path.distance);
                    }
                }
                WorkerOutcome::Completed(WorkerOutput::Path(None)) => {
                    if json {
                        print!("{}", to_json(&PathOutcome::NoPath));
                    } else {
                        println!("No path");
                    }
                }
                WorkerOutcome::Failed(f) => fail(format!("{}: {}", f.name, f.message)),
                other => fail(format!("path: {:?}", other)),
            }
        }
        Commands::Perimeter { index, points, closed } => {
            let (_, surface) = load_index(&index);
            let pts = read_points(&points);
            match surface_perimeter(&pts, closed, &surface.bvh, &config.path) {
                Ok(report) => {
                    if report.fallback_segments > 0 {
                        eprintln!("{} segments measured off the surface", report.fallback_segments);
                    }
                    println!("Perimeter: {:.3}", report.total);
                }
                Err(e) => fail(e),
            }
        }
    }
}
