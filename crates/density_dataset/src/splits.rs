//! Seeded train/test partitioning of sample indices.

use crate::types::{DatasetError, DatasetResult};
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }
}

/// Shuffle `0..len` with a fixed seed and cut it into train/test.
///
/// The train split holds `floor(train_ratio * len)` indices; the test split gets the rest.
pub fn split_indices(len: usize, train_ratio: f64, seed: u64) -> DatasetResult<SplitIndices> {
    if !train_ratio.is_finite() || !(0.0..=1.0).contains(&train_ratio) {
        return Err(DatasetError::InvalidSplitRatio(train_ratio));
    }
    let train_len = ((train_ratio * len as f64).floor() as usize).min(len);
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let test = order.split_off(train_len);
    tracing::info!(train = order.len(), test = test.len(), seed, "split sample indices");
    Ok(SplitIndices { train: order, test })
}
