use crate::error::ConfigError;
use crate::schedule::StepDecay;
use clap::{Parser, ValueEnum};
use data_contracts::RunParameters;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DENSITY_TRAIN_CONFIG";

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::Sgd => "sgd",
        }
    }
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    #[value(name = "ndarray")]
    #[serde(rename = "ndarray")]
    NdArray,
    #[value(name = "wgpu")]
    #[serde(rename = "wgpu")]
    Wgpu,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "train",
    about = "Train the density-field regression model (or evaluate a checkpoint with --eval-only)"
)]
pub struct TrainArgs {
    /// TOML run configuration; flags given on the command line take precedence.
    #[arg(long, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,
    /// Image stack array file (`[N, C, H, W]` or `[N, H, W]`).
    #[arg(long)]
    pub data_path: Option<PathBuf>,
    /// Initial-condition map array file (`[N, H, W]`). Omit for the image-only model.
    #[arg(long)]
    pub init_path: Option<PathBuf>,
    /// Label density array file (`[N, H, W]`).
    #[arg(long)]
    pub label_path: Option<PathBuf>,
    /// Initial learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Momentum (SGD only).
    #[arg(long)]
    pub momentum: Option<f64>,
    /// L2 weight decay.
    #[arg(long)]
    pub weight_decay: Option<f64>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub num_epochs: Option<usize>,
    /// Fraction of samples used for training; the rest is the test split.
    #[arg(long)]
    pub split_ratio: Option<f64>,
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    #[arg(long)]
    pub model_checkpoint_name: Option<String>,
    /// Load `checkpoint_dir/model_checkpoint_name` before running.
    #[arg(long)]
    pub load_from_checkpoint: bool,
    /// Run a single evaluation pass and exit.
    #[arg(long)]
    pub eval_only: bool,
    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,
    /// Epochs between learning-rate decays.
    #[arg(long)]
    pub lr_step: Option<usize>,
    /// Multiplicative learning-rate decay factor.
    #[arg(long)]
    pub lr_gamma: Option<f64>,
    /// Sample-assembly worker threads (0 = load on the training thread).
    #[arg(long)]
    pub num_workers: Option<usize>,
    /// Batches buffered ahead of the training loop.
    #[arg(long)]
    pub prefetch: Option<usize>,
    /// Seed for the train/test split and epoch shuffles.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// Append per-epoch metrics as JSON lines to this file.
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,
    /// Output directory for `correlation_test.png` in eval-only mode.
    #[arg(long)]
    pub eval_output_dir: Option<PathBuf>,
    /// Write a heatmap strip for every evaluation batch.
    #[arg(long)]
    pub save_eval_heatmaps: bool,
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    data_path: Option<PathBuf>,
    init_path: Option<PathBuf>,
    label_path: Option<PathBuf>,
    lr: Option<f64>,
    momentum: Option<f64>,
    weight_decay: Option<f64>,
    batch_size: Option<usize>,
    num_epochs: Option<usize>,
    split_ratio: Option<f64>,
    checkpoint_dir: Option<PathBuf>,
    model_checkpoint_name: Option<String>,
    load_from_checkpoint: Option<bool>,
    eval_only: Option<bool>,
    optimizer: Option<OptimizerKind>,
    lr_step: Option<usize>,
    lr_gamma: Option<f64>,
    num_workers: Option<usize>,
    prefetch: Option<usize>,
    seed: Option<u64>,
    backend: Option<BackendKind>,
    metrics_path: Option<PathBuf>,
    eval_output_dir: Option<PathBuf>,
    save_eval_heatmaps: Option<bool>,
}

/// Fully resolved run parameters.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub init_path: Option<PathBuf>,
    pub label_path: PathBuf,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub split_ratio: f64,
    pub checkpoint_dir: PathBuf,
    pub model_checkpoint_name: String,
    pub load_from_checkpoint: bool,
    pub eval_only: bool,
    pub optimizer: OptimizerKind,
    pub lr_step: usize,
    pub lr_gamma: f64,
    pub num_workers: usize,
    pub prefetch: usize,
    pub seed: u64,
    pub backend: BackendKind,
    pub metrics_path: Option<PathBuf>,
    pub eval_output_dir: Option<PathBuf>,
    pub save_eval_heatmaps: bool,
}

impl RunConfig {
    pub const DEFAULT_LR_STEP: usize = 20;
    pub const DEFAULT_LR_GAMMA: f64 = 0.1;
    pub const DEFAULT_NUM_WORKERS: usize = 4;
    pub const DEFAULT_PREFETCH: usize = 2;

    /// Merge command-line flags over an optional TOML file and validate the result.
    pub fn from_args(args: TrainArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => load_file(path)?,
            None => RunConfigFile::default(),
        };
        let eval_only = args.eval_only || file.eval_only.unwrap_or(false);
        let cfg = Self {
            data_path: args
                .data_path
                .or(file.data_path)
                .ok_or(ConfigError::Missing("data_path"))?,
            init_path: args.init_path.or(file.init_path),
            label_path: args
                .label_path
                .or(file.label_path)
                .ok_or(ConfigError::Missing("label_path"))?,
            lr: args.lr.or(file.lr).ok_or(ConfigError::Missing("lr"))?,
            momentum: args
                .momentum
                .or(file.momentum)
                .ok_or(ConfigError::Missing("momentum"))?,
            weight_decay: args
                .weight_decay
                .or(file.weight_decay)
                .ok_or(ConfigError::Missing("weight_decay"))?,
            batch_size: args
                .batch_size
                .or(file.batch_size)
                .ok_or(ConfigError::Missing("batch_size"))?,
            num_epochs: args
                .num_epochs
                .or(file.num_epochs)
                .or(eval_only.then_some(0))
                .ok_or(ConfigError::Missing("num_epochs"))?,
            split_ratio: args
                .split_ratio
                .or(file.split_ratio)
                .ok_or(ConfigError::Missing("split_ratio"))?,
            checkpoint_dir: args
                .checkpoint_dir
                .or(file.checkpoint_dir)
                .ok_or(ConfigError::Missing("checkpoint_dir"))?,
            model_checkpoint_name: args
                .model_checkpoint_name
                .or(file.model_checkpoint_name)
                .ok_or(ConfigError::Missing("model_checkpoint_name"))?,
            load_from_checkpoint: args.load_from_checkpoint
                || file.load_from_checkpoint.unwrap_or(false),
            eval_only,
            optimizer: args.optimizer.or(file.optimizer).unwrap_or_default(),
            lr_step: args
                .lr_step
                .or(file.lr_step)
                .unwrap_or(Self::DEFAULT_LR_STEP),
            lr_gamma: args
                .lr_gamma
                .or(file.lr_gamma)
                .unwrap_or(Self::DEFAULT_LR_GAMMA),
            num_workers: args
                .num_workers
                .or(file.num_workers)
                .unwrap_or(Self::DEFAULT_NUM_WORKERS),
            prefetch: args
                .prefetch
                .or(file.prefetch)
                .unwrap_or(Self::DEFAULT_PREFETCH),
            seed: args.seed.or(file.seed).unwrap_or(0),
            backend: args.backend.or(file.backend).unwrap_or_default(),
            metrics_path: args.metrics_path.or(file.metrics_path),
            eval_output_dir: args.eval_output_dir.or(file.eval_output_dir),
            save_eval_heatmaps: args.save_eval_heatmaps
                || file.save_eval_heatmaps.unwrap_or(false),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: String| ConfigError::Invalid { name, reason };
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(invalid("lr", format!("{} is not a positive number", self.lr)));
        }
        if !(self.momentum.is_finite() && self.momentum >= 0.0) {
            return Err(invalid("momentum", format!("{} is negative", self.momentum)));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(invalid(
                "weight_decay",
                format!("{} is negative", self.weight_decay),
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1".into()));
        }
        if self.num_epochs == 0 && !self.eval_only {
            return Err(invalid("num_epochs", "must be at least 1".into()));
        }
        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            return Err(invalid(
                "split_ratio",
                format!("{} is outside (0, 1)", self.split_ratio),
            ));
        }
        if self.model_checkpoint_name.trim().is_empty() {
            return Err(invalid("model_checkpoint_name", "must not be empty".into()));
        }
        if self.lr_step == 0 {
            return Err(invalid("lr_step", "must be at least 1".into()));
        }
        if !(self.lr_gamma.is_finite() && self.lr_gamma > 0.0) {
            return Err(invalid(
                "lr_gamma",
                format!("{} is not a positive number", self.lr_gamma),
            ));
        }
        validate_backend_choice(self.backend)
    }

    pub fn schedule(&self) -> StepDecay {
        StepDecay::new(self.lr, self.lr_step, self.lr_gamma)
    }

    pub fn parameters(&self) -> RunParameters {
        RunParameters {
            data_path: self.data_path.clone(),
            init_path: self.init_path.clone(),
            label_path: self.label_path.clone(),
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            batch_size: self.batch_size,
            num_epochs: self.num_epochs,
            split_ratio: self.split_ratio,
            seed: self.seed,
            optimizer: self.optimizer.as_str().to_string(),
        }
    }
}

fn load_file(path: &Path) -> Result<RunConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded run config file");
    Ok(file)
}

/// WGPU is only selectable when the crate was built with `backend-wgpu`.
pub fn validate_backend_choice(kind: BackendKind) -> Result<(), ConfigError> {
    if kind == BackendKind::Wgpu && !cfg!(feature = "backend-wgpu") {
        return Err(ConfigError::Invalid {
            name: "backend",
            reason: "backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_args() -> TrainArgs {
        TrainArgs {
            data_path: Some("data.npy".into()),
            init_path: Some("init.npy".into()),
            label_path: Some("label.npy".into()),
            lr: Some(1e-3),
            momentum: Some(0.9),
            weight_decay: Some(1e-4),
            batch_size: Some(4),
            num_epochs: Some(3),
            split_ratio: Some(0.8),
            checkpoint_dir: Some("runs/check_point".into()),
            model_checkpoint_name: Some("model".into()),
            ..Default::default()
        }
    }

    #[test]
    fn flags_alone_resolve_with_defaults() {
        let cfg = RunConfig::from_args(full_args()).unwrap();
        assert_eq!(cfg.optimizer, OptimizerKind::Adam);
        assert_eq!(cfg.lr_step, 20);
        assert_eq!(cfg.lr_gamma, 0.1);
        assert_eq!(cfg.backend, BackendKind::NdArray);
        assert!(!cfg.eval_only);
    }

    #[test]
    fn missing_parameter_is_named() {
        let args = TrainArgs {
            lr: None,
            ..full_args()
        };
        match RunConfig::from_args(args) {
            Err(ConfigError::Missing(name)) => assert_eq!(name, "lr"),
            other => panic!("expected missing lr, got {other:?}"),
        }
    }

    #[test]
    fn invalid_values_are_named() {
        for (args, expected) in [
            (
                TrainArgs {
                    batch_size: Some(0),
                    ..full_args()
                },
                "batch_size",
            ),
            (
                TrainArgs {
                    split_ratio: Some(1.0),
                    ..full_args()
                },
                "split_ratio",
            ),
            (
                TrainArgs {
                    lr: Some(-1.0),
                    ..full_args()
                },
                "lr",
            ),
            (
                TrainArgs {
                    weight_decay: Some(-0.5),
                    ..full_args()
                },
                "weight_decay",
            ),
        ] {
            match RunConfig::from_args(args) {
                Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected invalid {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn eval_only_does_not_need_epochs() {
        let args = TrainArgs {
            num_epochs: None,
            eval_only: true,
            ..full_args()
        };
        assert_eq!(RunConfig::from_args(args).unwrap().num_epochs, 0);
        let args = TrainArgs {
            num_epochs: None,
            ..full_args()
        };
        assert!(matches!(
            RunConfig::from_args(args),
            Err(ConfigError::Missing("num_epochs"))
        ));
    }

    #[cfg(not(feature = "backend-wgpu"))]
    #[test]
    fn wgpu_without_feature_is_rejected() {
        let args = TrainArgs {
            backend: Some(BackendKind::Wgpu),
            ..full_args()
        };
        assert!(matches!(
            RunConfig::from_args(args),
            Err(ConfigError::Invalid {
                name: "backend",
                ..
            })
        ));
    }

    #[test]
    fn cli_parses_flags() {
        let args = TrainArgs::try_parse_from([
            "train",
            "--data-path",
            "d.npy",
            "--label-path",
            "l.npy",
            "--lr",
            "0.01",
            "--momentum",
            "0.9",
            "--weight-decay",
            "0",
            "--batch-size",
            "8",
            "--num-epochs",
            "2",
            "--split-ratio",
            "0.75",
            "--checkpoint-dir",
            "ck",
            "--model-checkpoint-name",
            "m",
            "--optimizer",
            "sgd",
            "--backend",
            "ndarray",
            "--eval-only",
        ])
        .unwrap();
        assert!(args.eval_only);
        assert!(!args.load_from_checkpoint);
        assert_eq!(args.optimizer, Some(OptimizerKind::Sgd));
        assert_eq!(args.init_path, None);
    }
}
