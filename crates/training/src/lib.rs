#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod plot;
pub mod run;
pub mod schedule;
pub mod trainer;
pub mod visualize;

pub use checkpoint::CheckpointManager;
pub use config::{BackendKind, OptimizerKind, RunConfig, TrainArgs};
pub use correlation::{corrcoef, normalize_rows, pearson, CorrelationReport};
pub use error::{
    CheckpointError, ConfigError, CorrelationError, Phase, TrainError, TrainResult,
};
pub use run::run_train;
pub use schedule::StepDecay;
pub use trainer::{
    checkpoint_name, eval_epoch, testing_result_dir, train_epoch, EpochReport, EvalOutcome,
    RunOutcome, RunReport, Trainer,
};
pub use visualize::{EvalVisualizer, HeatmapVisualizer, NoopVisualizer};
