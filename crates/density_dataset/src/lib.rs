//! Dataset loading, splitting, and Burn-compatible batching for density regression.
//!
//! This crate provides:
//! - `SampleStore`: aligned image / init / label arrays loaded from `.npy` files
//! - Seeded train/test index splits
//! - `BatchLoader`: drop-last batching with an optional prefetching worker pool

pub mod batch;
pub mod splits;
pub mod store;
pub mod types;

pub use batch::{BatchLoader, DensityBatch, EpochBatches, HostBatch, LoaderConfig};
pub use splits::{split_indices, SplitIndices};
pub use store::{load_npy_f32, SampleStore};
pub use types::*;

pub use data_contracts::{InputArity, SampleShape};
