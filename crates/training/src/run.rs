use crate::config::{BackendKind, RunConfig, TrainArgs};
use crate::trainer::{RunReport, Trainer};
use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use data_contracts::InputArity;
use density_dataset::SampleStore;
use models::{MainNet, MainNetConfig, SixtyChannels, SixtyChannelsConfig};
use std::sync::Arc;

/// Resolve configuration, load the data, and run on the backend the config selects.
pub fn run_train(args: TrainArgs) -> anyhow::Result<RunReport> {
    let cfg = RunConfig::from_args(args)?;
    let store = SampleStore::load(&cfg.data_path, cfg.init_path.as_deref(), &cfg.label_path)
        .with_context(|| format!("failed to load dataset from {}", cfg.data_path.display()))?;
    let store = Arc::new(store);

    let outcome = match cfg.backend {
        BackendKind::NdArray => {
            tracing::info!(backend = "ndarray", "selected compute backend");
            run_on::<Autodiff<burn_ndarray::NdArray<f32>>>(cfg, store, &Default::default())?
        }
        #[cfg(feature = "backend-wgpu")]
        BackendKind::Wgpu => {
            tracing::info!(backend = "wgpu", "selected compute backend");
            run_on::<Autodiff<burn_wgpu::Wgpu<f32>>>(cfg, store, &Default::default())?
        }
        #[cfg(not(feature = "backend-wgpu"))]
        BackendKind::Wgpu => anyhow::bail!("backend `wgpu` requires the backend-wgpu feature"),
    };

    match &outcome.evaluation {
        Some(eval) => tracing::info!(
            loss = eval.loss,
            coefficient = eval.correlation.coefficient,
            plot = %eval.correlation.path.display(),
            "eval-only run finished"
        ),
        None => tracing::info!(
            epochs = outcome.epochs.len(),
            best_loss = outcome.best_loss,
            "training run finished"
        ),
    }
    Ok(outcome)
}

/// Build the model matching the store's arity on `B` and run it.
fn run_on<B: AutodiffBackend>(
    cfg: RunConfig,
    store: Arc<SampleStore>,
    device: &B::Device,
) -> anyhow::Result<RunReport> {
    let shape = store.shape();
    let mut trainer = Trainer::new(cfg);
    let report = match store.arity() {
        InputArity::ImageAndInit => {
            let model_cfg = MainNetConfig::for_shape(shape);
            model_cfg.sub.validate()?;
            let model = MainNet::<B>::new(model_cfg, device);
            trainer.run::<B, _>(model, store, device)?.report
        }
        InputArity::ImageOnly => {
            let model_cfg = SixtyChannelsConfig::for_shape(shape);
            model_cfg.validate()?;
            let model = SixtyChannels::<B>::new(model_cfg, device);
            trainer.run::<B, _>(model, store, device)?.report
        }
    };
    Ok(report)
}
