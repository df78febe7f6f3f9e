use density_dataset::DatasetError;
use models::ModelError;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required parameter `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint directory {0} does not exist")]
    DirMissing(PathBuf),
    #[error("checkpoint not found at {0}")]
    NotFound(PathBuf),
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint recorder error: {0}")]
    Recorder(String),
    #[error("checkpoint holds {found} parameters but the model has {expected}")]
    ShapeMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("prediction shape {prediction:?} does not match label shape {label:?}")]
    ShapeMismatch {
        prediction: Vec<usize>,
        label: Vec<usize>,
    },
    #[error("correlation input is empty")]
    Empty,
    #[error("{0} contains non-finite values")]
    NonFinite(&'static str),
    #[error("failed to render correlation plot {path}: {reason}")]
    Render { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Train => f.write_str("training"),
            Phase::Eval => f.write_str("testing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("non-finite {phase} loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        phase: Phase,
        epoch: usize,
        batch: usize,
    },
    #[error("model expects {model} inputs but the dataset provides {data}")]
    ArityMismatch {
        model: data_contracts::InputArity,
        data: data_contracts::InputArity,
    },
    #[error("evaluation split produced no batches")]
    NoEvalBatches,
    #[error("tensor readback failed: {0}")]
    TensorData(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
