//! Per-batch side effects of the evaluation pass.

use crate::error::TrainError;
use density_dataset::HostBatch;
use image::{GrayImage, Luma};
use ndarray::{Array3, ArrayView2, Axis};
use std::fs;
use std::path::PathBuf;

/// Called once per evaluation batch with the host inputs and the detached prediction.
pub trait EvalVisualizer {
    fn observe(
        &mut self,
        epoch: usize,
        batch: usize,
        inputs: &HostBatch,
        prediction: &Array3<f32>,
    ) -> Result<(), TrainError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVisualizer;

impl EvalVisualizer for NoopVisualizer {
    fn observe(
        &mut self,
        _epoch: usize,
        _batch: usize,
        _inputs: &HostBatch,
        _prediction: &Array3<f32>,
    ) -> Result<(), TrainError> {
        Ok(())
    }
}

/// Writes `root/epoch_<N>/batch_<K>.png`: the first sample of each batch as a grayscale
/// `[init | prediction | label]` strip (init omitted for image-only data).
#[derive(Debug, Clone)]
pub struct HeatmapVisualizer {
    root: PathBuf,
}

impl HeatmapVisualizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl EvalVisualizer for HeatmapVisualizer {
    fn observe(
        &mut self,
        epoch: usize,
        batch: usize,
        inputs: &HostBatch,
        prediction: &Array3<f32>,
    ) -> Result<(), TrainError> {
        if inputs.is_empty() {
            return Ok(());
        }
        let mut panels = Vec::with_capacity(3);
        if let Some(init) = &inputs.init {
            panels.push(init.index_axis(Axis(0), 0).index_axis_move(Axis(0), 0));
        }
        panels.push(prediction.index_axis(Axis(0), 0));
        panels.push(inputs.label.index_axis(Axis(0), 0));

        let dir = self.root.join(format!("epoch_{epoch}"));
        fs::create_dir_all(&dir).map_err(|source| TrainError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("batch_{batch}.png"));
        strip(&panels)
            .save(&path)
            .map_err(|source| TrainError::Image { path, source })
    }
}

fn strip(panels: &[ArrayView2<'_, f32>]) -> GrayImage {
    let (h, w) = panels.first().map(|p| p.dim()).unwrap_or((0, 0));
    let mut img = GrayImage::new((w * panels.len()) as u32, h as u32);
    for (k, panel) in panels.iter().enumerate() {
        let (lo, hi) = panel
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = hi - lo;
        for ((y, x), &v) in panel.indexed_iter() {
            let shade = if range.is_finite() && range > 0.0 {
                ((v - lo) / range * 255.0).round() as u8
            } else {
                0
            };
            img.put_pixel((k * w + x) as u32, y as u32, Luma([shade]));
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    #[test]
    fn heatmap_strip_has_one_panel_per_map() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = HostBatch {
            image: Array4::zeros((2, 3, 4, 5)),
            init: Some(Array4::from_elem((2, 1, 4, 5), 1.0)),
            label: Array3::from_shape_fn((2, 4, 5), |(_, y, x)| (y + x) as f32),
            indices: vec![0, 1],
        };
        let prediction = Array3::from_shape_fn((2, 4, 5), |(_, y, _)| y as f32);
        let mut vis = HeatmapVisualizer::new(dir.path());
        vis.observe(3, 1, &inputs, &prediction).unwrap();

        let img = image::open(dir.path().join("epoch_3").join("batch_1.png"))
            .unwrap()
            .to_luma8();
        assert_eq!(img.dimensions(), (15, 4));
        // Constant init panel renders black; label panel spans the full range.
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(14, 3).0[0], 255);
    }
}
