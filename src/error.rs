// THEORY:
// Every failure the crate can produce is classified here. The split follows the
// lifetime of a run: configuration problems are caught before any work starts,
// layout problems are tied to a single image, store problems are tied to a
// single table, and filter problems are tied to the shape of one batch. The
// top-level `Error` only aggregates; it never adds new failure modes except the
// per-image context the indexer attaches to layout failures.

use std::path::PathBuf;
use thiserror::Error;

use crate::core_modules::layout_builder::Axis;

/// Invalid parameters, rejected eagerly at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be at least {min}, got {value}")]
    TooSmall { name: &'static str, min: f64, value: f64 },

    #[error("{min_name} ({min}) must not exceed {max_name} ({max})")]
    InvertedRange {
        min_name: &'static str,
        max_name: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Numerical degeneracies met while mapping points into image space.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("zero extent along {axis} axis: every point shares that coordinate")]
    ZeroExtent { axis: Axis },

    #[error("non-finite extent along {axis} axis")]
    NonFinite { axis: Axis },

    #[error("points have {dims} dimension(s), layout needs at least 2")]
    TooFewDimensions { dims: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("expected a [B, N, C] batch with C >= {min_columns}, got C = {columns}")]
    ShapeMismatch { min_columns: usize, columns: usize },
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector failed: {0}")]
    Inference(String),

    #[error("detector returned a batch of {got} images for {expected} inputs")]
    BatchSize { expected: usize, got: usize },
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("image {image}: {source}")]
    Layout {
        image: usize,
        #[source]
        source: LayoutError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool failure: {0}")]
    Worker(String),

    #[error("git error: {0}")]
    Git(String),
}

pub type Result<T> = std::result::Result<T, Error>;
