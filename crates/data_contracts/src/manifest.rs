use crate::shape::{InputArity, SampleShape};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunManifestSchemaVersion {
    V1,
}

/// Hyper-parameters and inputs a run was started with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunParameters {
    pub data_path: PathBuf,
    pub init_path: Option<PathBuf>,
    pub label_path: PathBuf,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub split_ratio: f64,
    pub seed: u64,
    pub optimizer: String,
}

/// Written once at the start of a training run next to its checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: RunManifestSchemaVersion,
    pub checkpoint_dir: PathBuf,
    pub model_checkpoint_name: String,
    pub started_at_unix: f64,
    pub arity: InputArity,
    pub sample_shape: SampleShape,
    pub dataset_len: usize,
    pub train_len: usize,
    pub test_len: usize,
    pub parameters: RunParameters,
}

impl RunManifest {
    pub const FILE_NAME: &'static str = "run_manifest.json";

    pub fn validate(&self) -> Result<(), String> {
        if self.started_at_unix.is_nan() || self.started_at_unix < 0.0 {
            return Err("started_at_unix must be non-negative".into());
        }
        if self.train_len == 0 || self.test_len == 0 {
            return Err(format!(
                "train/test split must be non-empty (train={}, test={})",
                self.train_len, self.test_len
            ));
        }
        if self.train_len + self.test_len != self.dataset_len {
            return Err("train + test sizes must cover the dataset".into());
        }
        self.sample_shape.validate().map_err(|e| e.to_string())
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
