//! In-memory store of aligned image / init / label arrays.

use crate::types::{DatasetError, DatasetResult, Sample};
use data_contracts::{InputArity, SampleShape};
use ndarray::{Array3, Array4, ArrayD, Axis, Ix3, Ix4};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Read-only collection of samples, loaded once at startup.
#[derive(Debug, Clone)]
pub struct SampleStore {
    /// `[N, C, H, W]`
    images: Array4<f32>,
    /// `[N, H, W]`
    inits: Option<Array3<f32>>,
    /// `[N, H, W]`
    labels: Array3<f32>,
    shape: SampleShape,
}

impl SampleStore {
    /// Load the three-input variant (image stack + init map + label).
    pub fn from_paths(image_path: &Path, init_path: &Path, label_path: &Path) -> DatasetResult<Self> {
        Self::load(image_path, Some(init_path), label_path)
    }

    /// Load the two-input variant (image + label, no init map).
    pub fn from_image_label_paths(image_path: &Path, label_path: &Path) -> DatasetResult<Self> {
        Self::load(image_path, None, label_path)
    }

    pub fn load(
        image_path: &Path,
        init_path: Option<&Path>,
        label_path: &Path,
    ) -> DatasetResult<Self> {
        let t0 = Instant::now();
        let images = images_from_raw(load_npy_f32(image_path)?, image_path)?;
        let inits = match init_path {
            Some(path) => Some(maps_from_raw(load_npy_f32(path)?, path)?),
            None => None,
        };
        let labels = maps_from_raw(load_npy_f32(label_path)?, label_path)?;
        let store = Self::from_arrays(images, inits, labels)?;
        tracing::info!(
            samples = store.len(),
            arity = %store.arity(),
            channels = store.shape.channels,
            height = store.shape.height,
            width = store.shape.width,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "loaded sample store"
        );
        Ok(store)
    }

    /// Build a store from arrays already in memory. Applies the same alignment checks as
    /// loading from disk.
    pub fn from_arrays(
        images: Array4<f32>,
        inits: Option<Array3<f32>>,
        labels: Array3<f32>,
    ) -> DatasetResult<Self> {
        let n_images = images.len_of(Axis(0));
        let n_labels = labels.len_of(Axis(0));
        if n_images != n_labels {
            return Err(DatasetError::Alignment {
                images: n_images,
                labels: n_labels,
            });
        }
        let (_, c, h, w) = images.dim();
        let shape = SampleShape::new(c, h, w);
        shape.validate()?;
        let (_, lh, lw) = labels.dim();
        shape.check_plane(lh, lw)?;
        if let Some(inits) = &inits {
            let (n_inits, ih, iw) = inits.dim();
            if n_inits != n_images {
                return Err(DatasetError::InitAlignment {
                    images: n_images,
                    inits: n_inits,
                });
            }
            shape.check_plane(ih, iw)?;
        }
        Ok(Self {
            images,
            inits,
            labels,
            shape,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> SampleShape {
        self.shape
    }

    pub fn arity(&self) -> InputArity {
        if self.inits.is_some() {
            InputArity::ImageAndInit
        } else {
            InputArity::ImageOnly
        }
    }

    /// Fetch one sample. Failures are logged with the offending index and returned as
    /// `SampleRetrieval`; nothing is skipped.
    pub fn get(&self, index: usize) -> DatasetResult<Sample> {
        self.assemble(index).map_err(|e| {
            tracing::error!(index, error = %e, "error encountered while loading sample");
            DatasetError::SampleRetrieval {
                index,
                source: Box::new(e),
            }
        })
    }

    fn assemble(&self, index: usize) -> DatasetResult<Sample> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let image = self.images.index_axis(Axis(0), index).to_owned();
        let init = self
            .inits
            .as_ref()
            .map(|inits| inits.index_axis(Axis(0), index).to_owned().insert_axis(Axis(0)));
        let label = self.labels.index_axis(Axis(0), index).to_owned();
        Ok(Sample { image, init, label })
    }

    /// Ratio of label mass to total label elements, and its complement.
    ///
    /// Treats label values as binary-ish mass. Inspection only; the training path never
    /// calls this.
    pub fn class_counts(&self) -> (f64, f64) {
        let total = (self.len() * self.shape.plane()) as f64;
        if total == 0.0 {
            return (0.0, 0.0);
        }
        let positive: f64 = self.labels.iter().map(|v| *v as f64).sum();
        tracing::info!(
            positive,
            negative = total - positive,
            "label mass per class"
        );
        (positive / total, (total - positive) / total)
    }
}

/// Read an `.npy` file of any supported element type and promote it to `f32`.
pub fn load_npy_f32(path: &Path) -> DatasetResult<ArrayD<f32>> {
    let bytes = fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_npy(&bytes).map_err(|source| DatasetError::Npy {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_npy(bytes: &[u8]) -> Result<ArrayD<f32>, ReadNpyError> {
    let first_err = match ArrayD::<f32>::read_npy(bytes) {
        Ok(arr) => return Ok(arr),
        Err(e) => e,
    };
    if let Ok(arr) = ArrayD::<f64>::read_npy(bytes) {
        return Ok(arr.mapv(|v| v as f32));
    }
    if let Ok(arr) = ArrayD::<i64>::read_npy(bytes) {
        return Ok(arr.mapv(|v| v as f32));
    }
    if let Ok(arr) = ArrayD::<i32>::read_npy(bytes) {
        return Ok(arr.mapv(|v| v as f32));
    }
    if let Ok(arr) = ArrayD::<u8>::read_npy(bytes) {
        return Ok(arr.mapv(|v| v as f32));
    }
    if let Ok(arr) = ArrayD::<bool>::read_npy(bytes) {
        return Ok(arr.mapv(|v| if v { 1.0 } else { 0.0 }));
    }
    Err(first_err)
}

fn images_from_raw(raw: ArrayD<f32>, path: &Path) -> DatasetResult<Array4<f32>> {
    match raw.ndim() {
        4 => Ok(raw.into_dimensionality::<Ix4>()?),
        // Single-channel images gain a channel axis.
        3 => Ok(raw.into_dimensionality::<Ix3>()?.insert_axis(Axis(1))),
        ndim => Err(DatasetError::UnsupportedShape {
            path: path.to_path_buf(),
            ndim,
            expected: "[N, C, H, W] or [N, H, W]",
        }),
    }
}

fn maps_from_raw(raw: ArrayD<f32>, path: &Path) -> DatasetResult<Array3<f32>> {
    match raw.ndim() {
        3 => Ok(raw.into_dimensionality::<Ix3>()?),
        ndim => Err(DatasetError::UnsupportedShape {
            path: path.to_path_buf(),
            ndim,
            expected: "[N, H, W]",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn store(n: usize, with_init: bool) -> SampleStore {
        let images = Array::from_shape_fn((n, 3, 4, 5), |(i, c, y, x)| {
            (i * 100 + c * 20 + y * 5 + x) as f32
        });
        let inits = with_init.then(|| Array3::from_elem((n, 4, 5), 0.5));
        let labels = Array3::from_shape_fn((n, 4, 5), |(i, _, _)| i as f32);
        SampleStore::from_arrays(images, inits, labels).unwrap()
    }

    #[test]
    fn get_returns_channel_first_sample() {
        let store = store(3, true);
        assert_eq!(store.len(), 3);
        assert_eq!(store.arity(), InputArity::ImageAndInit);
        let sample = store.get(2).unwrap();
        assert_eq!(sample.image.dim(), (3, 4, 5));
        assert_eq!(sample.init.as_ref().unwrap().dim(), (1, 4, 5));
        assert_eq!(sample.label.dim(), (4, 5));
        assert_eq!(sample.image[[1, 0, 0]], 220.0);
        assert_eq!(sample.label[[3, 4]], 2.0);
    }

    #[test]
    fn image_only_variant_has_no_init() {
        let store = store(2, false);
        assert_eq!(store.arity(), InputArity::ImageOnly);
        assert!(store.get(0).unwrap().init.is_none());
    }

    #[test]
    fn mismatched_counts_fail_construction() {
        let images = Array4::<f32>::zeros((4, 1, 2, 2));
        let labels = Array3::<f32>::zeros((3, 2, 2));
        let err = SampleStore::from_arrays(images, None, labels).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Alignment {
                images: 4,
                labels: 3
            }
        ));
    }

    #[test]
    fn mismatched_init_count_fails_construction() {
        let images = Array4::<f32>::zeros((4, 1, 2, 2));
        let inits = Array3::<f32>::zeros((2, 2, 2));
        let labels = Array3::<f32>::zeros((4, 2, 2));
        let err = SampleStore::from_arrays(images, Some(inits), labels).unwrap_err();
        assert!(matches!(err, DatasetError::InitAlignment { .. }));
    }

    #[test]
    fn label_plane_must_match_images() {
        let images = Array4::<f32>::zeros((2, 1, 4, 4));
        let labels = Array3::<f32>::zeros((2, 4, 3));
        let err = SampleStore::from_arrays(images, None, labels).unwrap_err();
        assert!(matches!(err, DatasetError::Contract(_)));
    }

    #[test]
    fn out_of_range_index_surfaces_retrieval_error() {
        let store = store(2, true);
        match store.get(7) {
            Err(DatasetError::SampleRetrieval { index, source }) => {
                assert_eq!(index, 7);
                assert!(matches!(
                    *source,
                    DatasetError::IndexOutOfBounds { index: 7, len: 2 }
                ));
            }
            other => panic!("expected retrieval error, got {other:?}"),
        }
    }

    #[test]
    fn class_counts_sum_label_mass() {
        // 2 samples of 2x2; 3 of 8 elements are set.
        let images = Array4::<f32>::zeros((2, 1, 2, 2));
        let mut labels = Array3::<f32>::zeros((2, 2, 2));
        labels[[0, 0, 0]] = 1.0;
        labels[[0, 1, 1]] = 1.0;
        labels[[1, 0, 1]] = 1.0;
        let store = SampleStore::from_arrays(images, None, labels).unwrap();
        let (pos, neg) = store.class_counts();
        assert!((pos - 0.375).abs() < 1e-12);
        assert!((neg - 0.625).abs() < 1e-12);
    }
}
