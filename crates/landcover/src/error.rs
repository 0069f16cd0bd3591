use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline conditions. Per-file problems (unreadable file, unknown
/// code, missing attribute, unmatched category value) are warnings, not
/// errors; they never leave the scope of one file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resolution must be positive, got {0}")]
    InvalidResolution(f64),

    #[error("cannot read input directory {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no input file produced any classified feature")]
    NoData,

    #[error("degenerate raster extent: {width}x{height} pixels from ({min_x}, {min_y}, {max_x}, {max_y})")]
    InvalidExtent {
        width: i64,
        height: i64,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },

    #[error("raster of {pixels} pixels exceeds the limit of {limit}")]
    ResourceLimit { pixels: u64, limit: u64 },

    #[error("spatial reference mismatch: expected {expected:?}, found {found:?}")]
    CrsMismatch { expected: String, found: String },
}
