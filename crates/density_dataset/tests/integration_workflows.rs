//! Integration tests for end-to-end density_dataset workflows.
//!
//! These tests verify that the major workflows work correctly together:
//! 1. `.npy` files → SampleStore (type promotion, rank handling, alignment)
//! 2. SampleStore → split → BatchLoader iteration

use density_dataset::{
    split_indices, BatchLoader, DatasetError, InputArity, LoaderConfig, SampleStore,
};
use ndarray::{Array, Array3, Array4};
use ndarray_npy::write_npy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Fixture {
    _dir: tempfile::TempDir,
    image: PathBuf,
    init: PathBuf,
    label: PathBuf,
}

/// Write an aligned triple of arrays: images as f32, init maps as f64, labels as u8.
fn write_fixture(n: usize, channels: usize, side: usize) -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("data_subnet_output.npy");
    let init = dir.path().join("data_init_density.npy");
    let label = dir.path().join("label.npy");

    let images: Array4<f32> =
        Array::from_shape_fn((n, channels, side, side), |(i, c, _, _)| (i + c) as f32);
    let inits: Array3<f64> = Array::from_shape_fn((n, side, side), |(i, y, x)| {
        (i * side * side + y * side + x) as f64 * 0.5
    });
    let labels: Array3<u8> = Array::from_shape_fn((n, side, side), |(i, y, _)| ((i + y) % 2) as u8);
    write_npy(&image, &images)?;
    write_npy(&init, &inits)?;
    write_npy(&label, &labels)?;
    Ok(Fixture {
        _dir: dir,
        image,
        init,
        label,
    })
}

fn write_labels(path: &Path, n: usize, side: usize) -> anyhow::Result<()> {
    let labels = Array3::<f32>::zeros((n, side, side));
    write_npy(path, &labels)?;
    Ok(())
}

#[test]
fn full_size_store_splits_eight_two() -> anyhow::Result<()> {
    let fx = write_fixture(10, 60, 100)?;
    let store = SampleStore::from_paths(&fx.image, &fx.init, &fx.label)?;
    assert_eq!(store.len(), 10);
    assert_eq!(store.arity(), InputArity::ImageAndInit);
    for i in 0..store.len() {
        let sample = store.get(i)?;
        assert_eq!(sample.image.dim(), (60, 100, 100));
        assert_eq!(sample.init.as_ref().map(|a| a.dim()), Some((1, 100, 100)));
        assert_eq!(sample.label.dim(), (100, 100));
    }

    let split = split_indices(store.len(), 0.8, 0)?;
    assert_eq!(split.train_len(), 8);
    assert_eq!(split.test_len(), 2);
    Ok(())
}

#[test]
fn element_types_are_promoted_to_f32() -> anyhow::Result<()> {
    let fx = write_fixture(3, 2, 4)?;
    let store = SampleStore::from_paths(&fx.image, &fx.init, &fx.label)?;
    let sample = store.get(1)?;
    assert_eq!(sample.image[[1, 0, 0]], 2.0);
    assert_eq!(sample.init.as_ref().map(|a| a[[0, 0, 1]]), Some(8.5));
    assert_eq!(sample.label[[0, 0]], 1.0);
    Ok(())
}

#[test]
fn misaligned_files_fail_before_any_batch() -> anyhow::Result<()> {
    let fx = write_fixture(4, 2, 4)?;
    let short_labels = fx.label.with_file_name("short_label.npy");
    write_labels(&short_labels, 3, 4)?;
    let err = SampleStore::from_paths(&fx.image, &fx.init, &short_labels).unwrap_err();
    assert!(matches!(err, DatasetError::Alignment { images: 4, labels: 3 }));
    Ok(())
}

#[test]
fn missing_file_reports_path() {
    let err = SampleStore::from_image_label_paths(
        Path::new("/nonexistent/images.npy"),
        Path::new("/nonexistent/labels.npy"),
    )
    .unwrap_err();
    match err {
        DatasetError::Io { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/images.npy")),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn single_channel_images_gain_channel_axis() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("images.npy");
    let label = dir.path().join("labels.npy");
    write_npy(&image, &Array3::<f32>::ones((5, 6, 6)))?;
    write_labels(&label, 5, 6)?;
    let store = SampleStore::from_image_label_paths(&image, &label)?;
    assert_eq!(store.arity(), InputArity::ImageOnly);
    assert_eq!(store.shape().channels, 1);
    assert_eq!(store.get(4)?.image.dim(), (1, 6, 6));
    Ok(())
}

#[test]
fn split_then_batch_with_workers() -> anyhow::Result<()> {
    let fx = write_fixture(23, 3, 5)?;
    let store = Arc::new(SampleStore::from_paths(&fx.image, &fx.init, &fx.label)?);
    let split = split_indices(store.len(), 0.7, 3)?;
    assert_eq!(split.train_len(), 16);

    let train = BatchLoader::new(store.clone(), split.train.clone(), LoaderConfig::train(5, 3, 0))?;
    let test = BatchLoader::new(store.clone(), split.test.clone(), LoaderConfig::eval(2, 3))?;
    assert_eq!(train.num_batches(), 3);
    assert_eq!(test.num_batches(), 3);

    for epoch in 0..2 {
        let mut seen = Vec::new();
        for batch in train.epoch(epoch)? {
            let batch = batch?;
            assert_eq!(batch.image.dim(), (5, 3, 5, 5));
            seen.extend(batch.indices);
        }
        assert_eq!(seen.len(), 15);
        assert!(seen.iter().all(|i| split.train.contains(i)));
    }

    let test_indices: Vec<usize> = test
        .epoch(0)?
        .map(|b| b.map(|b| b.indices))
        .collect::<Result<Vec<_>, _>>()?
        .concat();
    assert_eq!(test_indices, split.test[..6].to_vec());
    Ok(())
}
