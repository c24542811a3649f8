//! Spatial queries and elevation profiles over triangulated terrain surfaces.
//!
//! Surfaces are indexed with a bounding volume hierarchy ([`bvh`]) and
//! queried through corridors around line segments ([`corridor`]). On top of
//! that sit break-line detection ([`breakline`]), elevation profiles
//! ([`profile`]), surface-constrained shortest paths ([`pathfind`]) and a
//! compact binary format for persisting the results ([`codec`]).

pub mod breakline;
pub mod bvh;
pub mod codec;
pub mod config;
pub mod corridor;
pub mod error;
pub mod geometry;
pub mod io;
pub mod pathfind;
pub mod profile;
pub mod progress;
pub mod registry;
pub mod worker;

pub use config::EngineConfig;
pub use error::{CodecError, ConfigError, GeometryError, PathError, ProfileError};
pub use geometry::{Point, Point3, Segment3, Triangle};
