//! Batch iteration for training and evaluation.

use crate::store::SampleStore;
use crate::types::{DatasetError, DatasetResult, Sample};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use crossbeam_channel::{bounded, Receiver};
use ndarray::{Array3, Array4};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;
use std::thread;

pub const DEFAULT_PREFETCH: usize = 2;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle the split every epoch (order derived from `seed + epoch`).
    pub shuffle: bool,
    /// Discard a final batch smaller than `batch_size`.
    pub drop_last: bool,
    /// Sample-assembly threads; 0 assembles on the caller's thread.
    pub num_workers: usize,
    /// Assembled batches buffered ahead of the consumer.
    pub prefetch: usize,
    pub seed: u64,
}

impl LoaderConfig {
    pub fn train(batch_size: usize, num_workers: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: true,
            num_workers,
            prefetch: DEFAULT_PREFETCH,
            seed,
        }
    }

    pub fn eval(batch_size: usize, num_workers: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: true,
            num_workers,
            prefetch: DEFAULT_PREFETCH,
            seed: 0,
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }
}

/// Host-side batch with a leading batch dimension.
#[derive(Debug, Clone)]
pub struct HostBatch {
    /// `[B, C, H, W]`
    pub image: Array4<f32>,
    /// `[B, 1, H, W]`
    pub init: Option<Array4<f32>>,
    /// `[B, H, W]`
    pub label: Array3<f32>,
    /// Store indices in batch order.
    pub indices: Vec<usize>,
}

/// Device-resident batch consumed by the trainer.
#[derive(Debug, Clone)]
pub struct DensityBatch<B: Backend> {
    pub image: Tensor<B, 4>,
    pub init: Option<Tensor<B, 4>>,
    pub label: Tensor<B, 3>,
}

impl<B: Backend> DensityBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.image.dims()[0]
    }
}

impl HostBatch {
    fn from_samples(samples: Vec<Sample>, indices: Vec<usize>) -> DatasetResult<Self> {
        let batch = samples.len();
        let (c, h, w) = samples
            .first()
            .map(|s| s.image.dim())
            .ok_or(DatasetError::EmptySplit)?;
        let has_init = samples.iter().all(|s| s.init.is_some());

        let mut image_buf: Vec<f32> = Vec::with_capacity(batch * c * h * w);
        let mut init_buf: Vec<f32> = Vec::with_capacity(if has_init { batch * h * w } else { 0 });
        let mut label_buf: Vec<f32> = Vec::with_capacity(batch * h * w);
        for sample in &samples {
            image_buf.extend(sample.image.iter().copied());
            if has_init {
                if let Some(init) = &sample.init {
                    init_buf.extend(init.iter().copied());
                }
            }
            label_buf.extend(sample.label.iter().copied());
        }

        let image = Array4::from_shape_vec((batch, c, h, w), image_buf)?;
        let init = if has_init {
            Some(Array4::from_shape_vec((batch, 1, h, w), init_buf)?)
        } else {
            None
        };
        let label = Array3::from_shape_vec((batch, h, w), label_buf)?;
        Ok(Self {
            image,
            init,
            label,
            indices,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Upload to `device`. All tensors of the batch land on the same device.
    pub fn to_device<B: Backend>(&self, device: &B::Device) -> DensityBatch<B> {
        let (b, c, h, w) = self.image.dim();
        let image = Tensor::<B, 4>::from_data(
            TensorData::new(self.image.iter().copied().collect::<Vec<f32>>(), [b, c, h, w]),
            device,
        );
        let init = self.init.as_ref().map(|init| {
            Tensor::<B, 4>::from_data(
                TensorData::new(init.iter().copied().collect::<Vec<f32>>(), [b, 1, h, w]),
                device,
            )
        });
        let label = Tensor::<B, 3>::from_data(
            TensorData::new(self.label.iter().copied().collect::<Vec<f32>>(), [b, h, w]),
            device,
        );
        DensityBatch { image, init, label }
    }
}

/// Drop-last batching over one split of a `SampleStore`.
pub struct BatchLoader {
    store: Arc<SampleStore>,
    indices: Vec<usize>,
    cfg: LoaderConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl BatchLoader {
    pub fn new(
        store: Arc<SampleStore>,
        indices: Vec<usize>,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        if indices.is_empty() {
            return Err(DatasetError::EmptySplit);
        }
        if cfg.batch_size > indices.len() {
            return Err(DatasetError::BatchTooLarge {
                batch_size: cfg.batch_size,
                len: indices.len(),
            });
        }
        if let Some(&index) = indices.iter().find(|&&i| i >= store.len()) {
            return Err(DatasetError::IndexOutOfBounds {
                index,
                len: store.len(),
            });
        }
        Self::build(store, indices, cfg)
    }

    /// Like `new`, but indices are not checked against the store, so out-of-range entries
    /// surface as `SampleRetrieval` errors from the epoch iterator.
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_unchecked_indices(
        store: Arc<SampleStore>,
        indices: Vec<usize>,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        Self::build(store, indices, cfg)
    }

    fn build(
        store: Arc<SampleStore>,
        indices: Vec<usize>,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        let pool = if cfg.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.num_workers)
                .thread_name(|i| format!("density-loader-{i}"))
                .build()
                .map_err(|e| DatasetError::WorkerPool(e.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self {
            store,
            indices,
            cfg,
            pool,
        })
    }

    /// Number of samples in the split (not just those covered by full batches).
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn num_batches(&self) -> usize {
        if self.cfg.drop_last {
            self.indices.len() / self.cfg.batch_size
        } else {
            self.indices.len().div_ceil(self.cfg.batch_size)
        }
    }

    /// Sample order for `epoch`. Fixed for a given seed and epoch.
    pub fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order = self.indices.clone();
        if self.cfg.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.cfg.seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    fn plan(&self, epoch: u64) -> Vec<Vec<usize>> {
        self.epoch_order(epoch)
            .chunks(self.cfg.batch_size)
            .filter(|chunk| !self.cfg.drop_last || chunk.len() == self.cfg.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Batches for one epoch, yielded strictly in the epoch's declared order.
    pub fn epoch(&self, epoch: u64) -> DatasetResult<EpochBatches> {
        let plan = self.plan(epoch);
        let remaining = plan.len();
        tracing::debug!(
            epoch,
            batches = remaining,
            workers = self.cfg.num_workers,
            shuffle = self.cfg.shuffle,
            "starting epoch batches"
        );
        let inner = match &self.pool {
            None => EpochBatchesKind::Direct {
                store: self.store.clone(),
                plan: plan.into_iter(),
            },
            Some(pool) => {
                let (tx, rx) = bounded(self.cfg.prefetch.max(1));
                let store = self.store.clone();
                let pool = pool.clone();
                thread::Builder::new()
                    .name("density-prefetch".into())
                    .spawn(move || {
                        for indices in plan {
                            let batch = assemble_batch(&store, indices, Some(&pool));
                            let failed = batch.is_err();
                            if tx.send(batch).is_err() || failed {
                                break;
                            }
                        }
                    })
                    .map_err(|e| DatasetError::WorkerPool(e.to_string()))?;
                EpochBatchesKind::Prefetch { rx, ended: false }
            }
        };
        Ok(EpochBatches { inner, remaining })
    }
}

fn assemble_batch(
    store: &SampleStore,
    indices: Vec<usize>,
    pool: Option<&rayon::ThreadPool>,
) -> DatasetResult<HostBatch> {
    let samples: DatasetResult<Vec<Sample>> = match pool {
        Some(pool) => pool.install(|| indices.par_iter().map(|&i| store.get(i)).collect()),
        None => indices.iter().map(|&i| store.get(i)).collect(),
    };
    HostBatch::from_samples(samples?, indices)
}

pub struct EpochBatches {
    inner: EpochBatchesKind,
    remaining: usize,
}

enum EpochBatchesKind {
    Direct {
        store: Arc<SampleStore>,
        plan: std::vec::IntoIter<Vec<usize>>,
    },
    Prefetch {
        rx: Receiver<DatasetResult<HostBatch>>,
        ended: bool,
    },
}

impl Iterator for EpochBatches {
    type Item = DatasetResult<HostBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match &mut self.inner {
            EpochBatchesKind::Direct { store, plan } => {
                let indices = plan.next()?;
                let batch = assemble_batch(store, indices, None);
                self.remaining = if batch.is_ok() { self.remaining - 1 } else { 0 };
                Some(batch)
            }
            EpochBatchesKind::Prefetch { rx, ended } => {
                if *ended {
                    return None;
                }
                match rx.recv() {
                    Ok(Ok(batch)) => {
                        self.remaining -= 1;
                        Some(Ok(batch))
                    }
                    Ok(Err(e)) => {
                        *ended = true;
                        self.remaining = 0;
                        Some(Err(e))
                    }
                    Err(_) => {
                        *ended = true;
                        let remaining = std::mem::take(&mut self.remaining);
                        Some(Err(DatasetError::WorkerDisconnected { remaining }))
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
