//! Core types and error definitions for density_dataset.

use data_contracts::ValidationError;
use ndarray::{Array2, Array3};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("npy decode error at {path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },
    #[error("unsupported array rank {ndim} in {path} (expected {expected})")]
    UnsupportedShape {
        path: PathBuf,
        ndim: usize,
        expected: &'static str,
    },
    #[error("not identical: {images} image samples vs {labels} label samples")]
    Alignment { images: usize, labels: usize },
    #[error("not identical: {images} image samples vs {inits} init samples")]
    InitAlignment { images: usize, inits: usize },
    #[error(transparent)]
    Contract(#[from] ValidationError),
    #[error("error encountered while loading sample {index}: {source}")]
    SampleRetrieval {
        index: usize,
        #[source]
        source: Box<DatasetError>,
    },
    #[error("sample index {index} out of bounds for store of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("invalid train split ratio {0}; expected a finite value in [0, 1]")]
    InvalidSplitRatio(f64),
    #[error("batch size must be positive")]
    ZeroBatchSize,
    #[error("batch size {batch_size} exceeds split length {len}")]
    BatchTooLarge { batch_size: usize, len: usize },
    #[error("split contains no samples")]
    EmptySplit,
    #[error("failed to start loader workers: {0}")]
    WorkerPool(String),
    #[error("prefetch worker disconnected with {remaining} batches outstanding")]
    WorkerDisconnected { remaining: usize },
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// One aligned sample, produced on demand by index.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Image stack in CHW layout.
    pub image: Array3<f32>,
    /// Initial-condition map with a leading channel axis (`[1, H, W]`).
    pub init: Option<Array3<f32>>,
    /// Target density map (`[H, W]`).
    pub label: Array2<f32>,
}
