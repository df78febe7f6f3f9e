//! Epoch orchestration: training passes, evaluation passes, checkpoint decisions and
//! the per-epoch correlation diagnostic.

use crate::checkpoint::CheckpointManager;
use crate::config::{OptimizerKind, RunConfig};
use crate::correlation::{corrcoef, CorrelationReport};
use crate::error::{Phase, TrainError, TrainResult};
use crate::visualize::{EvalVisualizer, HeatmapVisualizer, NoopVisualizer};
use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use data_contracts::{RunManifest, RunManifestSchemaVersion};
use density_dataset::{split_indices, BatchLoader, LoaderConfig, SampleStore};
use models::DensityModel;
use ndarray::Array3;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Batches between progress log lines.
pub const LOG_EVERY: usize = 50;
pub const EVAL_ONLY_PLOT: &str = "correlation_test.png";

#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub eval_loss: f64,
    pub eval_batches: usize,
    pub correlation: f64,
    pub correlation_path: PathBuf,
    /// Set when this epoch improved on the best loss and was checkpointed.
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub epochs: Vec<EpochReport>,
    pub best_loss: f64,
    /// Populated in eval-only mode instead of `epochs`.
    pub evaluation: Option<EvaluationSummary>,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    pub loss: f64,
    pub batches: usize,
    pub correlation: CorrelationReport,
}

pub struct RunOutcome<M> {
    pub model: M,
    pub report: RunReport,
}

/// Result of one evaluation pass. `prediction`/`label` are the final batch, detached.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub loss: f64,
    pub batches: usize,
    pub prediction: Array3<f32>,
    pub label: Array3<f32>,
}

/// Where diagnostics for a checkpoint directory go: `check_point` becomes `testing_result`.
pub fn testing_result_dir(checkpoint_dir: &Path) -> PathBuf {
    PathBuf::from(
        checkpoint_dir
            .to_string_lossy()
            .replace("check_point", "testing_result"),
    )
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> TrainResult<f64> {
    let values = loss
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::TensorData(format!("{e:?}")))?;
    values
        .first()
        .map(|v| *v as f64)
        .ok_or_else(|| TrainError::TensorData("empty loss tensor".into()))
}

fn to_array3<B: Backend>(t: Tensor<B, 3>) -> TrainResult<Array3<f32>> {
    let [b, h, w] = t.dims();
    let values = t
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::TensorData(format!("{e:?}")))?;
    Array3::from_shape_vec((b, h, w), values).map_err(|e| TrainError::TensorData(e.to_string()))
}

/// One optimization pass over `loader`. Returns the updated model and the epoch's mean loss.
pub fn train_epoch<B, M, O>(
    mut model: M,
    optim: &mut O,
    loader: &BatchLoader,
    lr: f64,
    epoch: usize,
    device: &B::Device,
) -> TrainResult<(M, f64)>
where
    B: AutodiffBackend,
    M: DensityModel<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let mse = MseLoss::new();
    let total = loader.num_batches();
    let mut running = 0.0f64;
    let mut seen = 0usize;
    for (batch_idx, batch) in loader.epoch(epoch as u64)?.enumerate() {
        let batch = batch?.to_device::<B>(device);
        let batch_size = batch.batch_size();
        let prediction = model.predict(batch.image, batch.init)?;
        let loss = mse.forward(prediction, batch.label, Reduction::Sum);
        let loss_value = scalar(loss.clone().detach())?;
        if !loss_value.is_finite() {
            return Err(TrainError::NonFiniteLoss {
                phase: Phase::Train,
                epoch,
                batch: batch_idx,
            });
        }
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        running += loss_value * batch_size as f64;
        seen += batch_size;
        if batch_idx % LOG_EVERY == 0 || batch_idx + 1 == total {
            tracing::info!(
                epoch,
                batch = batch_idx,
                loss = running / seen as f64,
                "training phase"
            );
        }
    }
    let mean = if seen == 0 {
        0.0
    } else {
        running / seen as f64
    };
    Ok((model, mean))
}

/// One no-gradient pass over `loader`. The mean loss divides by the full split length,
/// including samples dropped with the last partial batch.
pub fn eval_epoch<B, M>(
    model: &M,
    loader: &BatchLoader,
    epoch: usize,
    device: &B::Device,
    visualizer: &mut dyn EvalVisualizer,
) -> TrainResult<EvalOutcome>
where
    B: Backend,
    M: DensityModel<B>,
{
    let mse = MseLoss::new();
    let mut running = 0.0f64;
    let mut batches = 0usize;
    let mut last = None;
    for (batch_idx, host) in loader.epoch(epoch as u64)?.enumerate() {
        let host = host?;
        let batch = host.to_device::<B>(device);
        let batch_size = batch.batch_size();
        let prediction = model.predict(batch.image, batch.init)?;
        let loss = scalar(mse.forward(prediction.clone(), batch.label, Reduction::Sum))?;
        if !loss.is_finite() {
            return Err(TrainError::NonFiniteLoss {
                phase: Phase::Eval,
                epoch,
                batch: batch_idx,
            });
        }
        running += loss * batch_size as f64;
        batches += 1;

        let prediction = to_array3(prediction)?;
        visualizer.observe(epoch, batch_idx, &host, &prediction)?;
        last = Some((prediction, host.label));
    }
    let (prediction, label) = last.ok_or(TrainError::NoEvalBatches)?;
    let loss = running / loader.len() as f64;
    tracing::info!(epoch, loss, batches, "testing phase");
    Ok(EvalOutcome {
        loss,
        batches,
        prediction,
        label,
    })
}

/// `<name>_<loss>`, with the loss in `Debug` form so whole values keep their `.0`.
pub fn checkpoint_name(name: &str, loss: f64) -> String {
    format!("{name}_{loss:?}")
}

/// Drives a full run from a loaded `SampleStore`.
pub struct Trainer {
    cfg: RunConfig,
    checkpoints: CheckpointManager,
    visualizer: Box<dyn EvalVisualizer>,
    best_loss: f64,
}

impl Trainer {
    pub fn new(cfg: RunConfig) -> Self {
        let visualizer: Box<dyn EvalVisualizer> = if cfg.save_eval_heatmaps {
            Box::new(HeatmapVisualizer::new(testing_result_dir(&cfg.checkpoint_dir)))
        } else {
            Box::new(NoopVisualizer)
        };
        Self {
            checkpoints: CheckpointManager::new(cfg.checkpoint_dir.clone()),
            cfg,
            visualizer,
            best_loss: f64::INFINITY,
        }
    }

    /// Replace the per-batch evaluation side effect chosen from the config.
    pub fn with_visualizer(mut self, visualizer: Box<dyn EvalVisualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// Save `model` as `<name>_<loss>` if `loss` is strictly below the best seen so far.
    pub fn checkpoint_if_improved<B: Backend, M: burn::module::Module<B>>(
        &mut self,
        model: &M,
        loss: f64,
    ) -> TrainResult<Option<PathBuf>> {
        if loss.is_nan() || loss >= self.best_loss {
            return Ok(None);
        }
        let name = checkpoint_name(&self.cfg.model_checkpoint_name, loss);
        let path = self.checkpoints.save::<B, M>(&name, model)?;
        self.best_loss = loss;
        Ok(Some(path))
    }

    pub fn run<B, M>(
        &mut self,
        model: M,
        store: Arc<SampleStore>,
        device: &B::Device,
    ) -> TrainResult<RunOutcome<M>>
    where
        B: AutodiffBackend,
        M: DensityModel<B> + AutodiffModule<B>,
        M::InnerModule: DensityModel<B::InnerBackend>,
    {
        if model.arity() != store.arity() {
            return Err(TrainError::ArityMismatch {
                model: model.arity(),
                data: store.arity(),
            });
        }
        let split = split_indices(store.len(), self.cfg.split_ratio, self.cfg.seed)?;
        let test_loader = BatchLoader::new(
            store.clone(),
            split.test.clone(),
            LoaderConfig::eval(self.cfg.batch_size, self.cfg.num_workers)
                .with_prefetch(self.cfg.prefetch),
        )?;

        let mut model = model;
        if self.cfg.load_from_checkpoint {
            model = self.checkpoints.load_named::<B, M>(
                &self.cfg.model_checkpoint_name,
                model,
                device,
            )?;
        }

        if self.cfg.eval_only {
            let evaluation = self.evaluate_only::<B, M>(&model, &test_loader, device)?;
            return Ok(RunOutcome {
                model,
                report: RunReport {
                    best_loss: evaluation.loss,
                    evaluation: Some(evaluation),
                    ..Default::default()
                },
            });
        }

        let train_loader = BatchLoader::new(
            store.clone(),
            split.train.clone(),
            LoaderConfig::train(self.cfg.batch_size, self.cfg.num_workers, self.cfg.seed)
                .with_prefetch(self.cfg.prefetch),
        )?;
        ensure_dir(&self.cfg.checkpoint_dir)?;
        let manifest = self.write_manifest(&store, split.train_len(), split.test_len())?;

        let (model, epochs) = match self.cfg.optimizer {
            OptimizerKind::Adam => {
                let optim = AdamConfig::new()
                    .with_weight_decay(Some(WeightDecayConfig::new(self.cfg.weight_decay as _)))
                    .init::<B, M>();
                self.fit::<B, M, _>(model, optim, &train_loader, &test_loader, device)?
            }
            OptimizerKind::Sgd => {
                let optim = SgdConfig::new()
                    .with_weight_decay(Some(WeightDecayConfig::new(self.cfg.weight_decay as _)))
                    .with_momentum(Some(
                        MomentumConfig::new()
                            .with_momentum(self.cfg.momentum as _)
                            .with_dampening(0.0),
                    ))
                    .init::<B, M>();
                self.fit::<B, M, _>(model, optim, &train_loader, &test_loader, device)?
            }
        };

        Ok(RunOutcome {
            model,
            report: RunReport {
                epochs,
                best_loss: self.best_loss,
                evaluation: None,
                manifest: Some(manifest),
            },
        })
    }

    fn fit<B, M, O>(
        &mut self,
        mut model: M,
        mut optim: O,
        train_loader: &BatchLoader,
        test_loader: &BatchLoader,
        device: &B::Device,
    ) -> TrainResult<(M, Vec<EpochReport>)>
    where
        B: AutodiffBackend,
        M: DensityModel<B> + AutodiffModule<B>,
        M::InnerModule: DensityModel<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let schedule = self.cfg.schedule();
        let results_root = testing_result_dir(&self.cfg.checkpoint_dir);
        let mut reports = Vec::with_capacity(self.cfg.num_epochs);
        for epoch in 0..self.cfg.num_epochs {
            let lr = schedule.lr(epoch);
            tracing::info!(epoch, last = self.cfg.num_epochs - 1, lr, "starting epoch");
            let (trained, train_loss) =
                train_epoch::<B, M, O>(model, &mut optim, train_loader, lr, epoch, device)?;
            model = trained;

            let eval = eval_epoch::<B::InnerBackend, M::InnerModule>(
                &model.valid(),
                test_loader,
                epoch,
                device,
                self.visualizer.as_mut(),
            )?;
            let checkpoint = self.checkpoint_if_improved::<B, M>(&model, eval.loss)?;

            let epoch_dir = results_root.join(format!("epoch_{epoch}"));
            ensure_dir(&epoch_dir)?;
            let correlation = corrcoef(
                &eval.prediction,
                &eval.label,
                &epoch_dir.join(format!("correlation_{epoch}.png")),
            )?;
            tracing::info!(epoch, coefficient = correlation.coefficient, "correlation coefficient");

            let report = EpochReport {
                epoch,
                lr,
                train_loss,
                eval_loss: eval.loss,
                eval_batches: eval.batches,
                correlation: correlation.coefficient,
                correlation_path: correlation.path,
                checkpoint,
            };
            if let Some(path) = &self.cfg.metrics_path {
                append_metrics(path, &report)?;
            }
            reports.push(report);
        }
        Ok((model, reports))
    }

    fn evaluate_only<B, M>(
        &mut self,
        model: &M,
        test_loader: &BatchLoader,
        device: &B::Device,
    ) -> TrainResult<EvaluationSummary>
    where
        B: AutodiffBackend,
        M: DensityModel<B> + AutodiffModule<B>,
        M::InnerModule: DensityModel<B::InnerBackend>,
    {
        let eval = eval_epoch::<B::InnerBackend, M::InnerModule>(
            &model.valid(),
            test_loader,
            0,
            device,
            self.visualizer.as_mut(),
        )?;
        let out_dir = self
            .cfg
            .eval_output_dir
            .clone()
            .unwrap_or_else(|| testing_result_dir(&self.cfg.checkpoint_dir));
        ensure_dir(&out_dir)?;
        let correlation = corrcoef(&eval.prediction, &eval.label, &out_dir.join(EVAL_ONLY_PLOT))?;
        tracing::info!(
            loss = eval.loss,
            coefficient = correlation.coefficient,
            "evaluation complete"
        );
        Ok(EvaluationSummary {
            loss: eval.loss,
            batches: eval.batches,
            correlation,
        })
    }

    fn write_manifest(
        &self,
        store: &SampleStore,
        train_len: usize,
        test_len: usize,
    ) -> TrainResult<PathBuf> {
        let started_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let manifest = RunManifest {
            schema_version: RunManifestSchemaVersion::V1,
            checkpoint_dir: self.cfg.checkpoint_dir.clone(),
            model_checkpoint_name: self.cfg.model_checkpoint_name.clone(),
            started_at_unix,
            arity: store.arity(),
            sample_shape: store.shape(),
            dataset_len: store.len(),
            train_len,
            test_len,
            parameters: self.cfg.parameters(),
        };
        if let Err(reason) = manifest.validate() {
            tracing::warn!(%reason, "run manifest failed validation");
        }
        let path = self.cfg.checkpoint_dir.join(RunManifest::FILE_NAME);
        manifest.write(&path).map_err(|source| TrainError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn ensure_dir(dir: &Path) -> TrainResult<()> {
    fs::create_dir_all(dir).map_err(|source| TrainError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn append_metrics(path: &Path, report: &EpochReport) -> TrainResult<()> {
    let io_err = |source| TrainError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let line = serde_json::to_string(report).map_err(|e| io_err(std::io::Error::other(e)))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    writeln!(file, "{line}").map_err(io_err)
}
