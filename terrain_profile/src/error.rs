//! Error types for index building, queries and persistence.
//!
//! Structural corruption of persisted data is always reported through
//! [`CodecError`] with the byte offset where it was detected. Geometric
//! degeneracies never surface as errors; they are skipped where they occur.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding raw geometry input.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Flat position buffers hold nine values per triangle.
    #[error("position buffer length {0} is not a multiple of 9")]
    PositionBufferLength(usize),
}

/// Fatal corruption or IO failure while writing or reading binary payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic number at offset {offset}: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        offset: usize,
        expected: u32,
        found: u32,
    },

    #[error("payload truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("{what} count mismatch at offset {offset}: declared {declared}, found {actual}")]
    CountMismatch {
        what: &'static str,
        offset: usize,
        declared: usize,
        actual: usize,
    },

    #[error("encoded size mismatch: precomputed {expected} bytes, wrote {written}")]
    SizeMismatch { expected: usize, written: usize },

    #[error("{count} trailing bytes after payload end at offset {offset}")]
    TrailingBytes { offset: usize, count: usize },

    #[error("invalid {what} tag {tag} at offset {offset}")]
    InvalidTag {
        what: &'static str,
        tag: u8,
        offset: usize,
    },

    #[error("invalid UTF-8 in {what} at offset {offset}")]
    InvalidUtf8 { what: &'static str, offset: usize },

    #[error("{what} too large to encode: {len}")]
    TooLarge { what: &'static str, len: usize },

    #[error("metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a profile computation. Cancellation is not an error and is
/// reported through the profile outcome instead.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("corridor half-width must be finite and non-negative, got {0}")]
    InvalidWidth(f64),

    #[error("segment endpoint is not finite")]
    NonFiniteSegment,

    #[error("profile computation failed: {0}")]
    Internal(String),
}

impl ProfileError {
    /// Short machine-readable name used in worker failure messages.
    pub fn name(&self) -> &'static str {
        match self {
            ProfileError::InvalidWidth(_) => "InvalidWidth",
            ProfileError::NonFiniteSegment => "NonFiniteSegment",
            ProfileError::Internal(_) => "Internal",
        }
    }
}

/// Failures of a surface-constrained path search.
#[derive(Debug, Error)]
pub enum PathError {
    /// The corridor yielded triangles but no graph vertices could be derived.
    #[error("corridor produced no candidate vertices")]
    NoCandidateVertices,

    #[error("corridor half-width must be finite and positive, got {0}")]
    InvalidWidth(f64),
}

impl PathError {
    pub fn name(&self) -> &'static str {
        match self {
            PathError::NoCandidateVertices => "NoCandidateVertices",
            PathError::InvalidWidth(_) => "InvalidWidth",
        }
    }
}

/// Errors loading an engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
