use crate::error::CheckpointError;
use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use std::fs;
use std::path::{Path, PathBuf};

type CheckpointRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Persists model parameters as `directory/name`.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `model` to `dir/name`. The directory must already exist.
    pub fn save<B: Backend, M: Module<B>>(
        &self,
        name: &str,
        model: &M,
    ) -> Result<PathBuf, CheckpointError> {
        if !self.dir.is_dir() {
            return Err(CheckpointError::DirMissing(self.dir.clone()));
        }
        let path = self.path_for(name);
        let bytes = <CheckpointRecorder as Recorder<B>>::record(
            &CheckpointRecorder::default(),
            model.clone().into_record(),
            (),
        )
        .map_err(|e| CheckpointError::Recorder(e.to_string()))?;
        fs::write(&path, bytes).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    /// Load parameters from `path` into `model`, which must have the saved architecture.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        path: &Path,
        model: M,
        device: &B::Device,
    ) -> Result<M, CheckpointError> {
        if !path.is_file() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let expected = model.num_params();
        let record: M::Record =
            <CheckpointRecorder as Recorder<B>>::load(&CheckpointRecorder::default(), bytes, device)
                .map_err(|e| CheckpointError::Recorder(e.to_string()))?;
        let loaded = model.load_record(record);
        let found = loaded.num_params();
        if found != expected {
            return Err(CheckpointError::ShapeMismatch { expected, found });
        }
        tracing::info!(path = %path.display(), params = found, "loaded checkpoint");
        Ok(loaded)
    }

    /// Load `dir/name`.
    pub fn load_named<B: Backend, M: Module<B>>(
        &self,
        name: &str,
        model: M,
        device: &B::Device,
    ) -> Result<M, CheckpointError> {
        self.load(&self.path_for(name), model, device)
    }
}
