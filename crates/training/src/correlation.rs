//! Row-normalized Pearson correlation between predictions and labels.

use crate::error::CorrelationError;
use crate::plot::{self, ChartText};
use ndarray::{Array, RemoveAxis};
use std::path::{Path, PathBuf};

pub const X_LABEL: &str = "prediction";
pub const Y_LABEL: &str = "label";

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationReport {
    pub coefficient: f64,
    /// Rows (across both inputs) whose range was zero and were mapped to zeros.
    pub degenerate_rows: usize,
    pub path: PathBuf,
}

impl CorrelationReport {
    pub fn title(&self) -> String {
        title(self.coefficient)
    }
}

/// Chart caption: the coefficient rounded to two decimals.
pub fn title(coefficient: f64) -> String {
    format!("Correlation Coefficient = {coefficient:.2}")
}

/// Min-max normalize every slice along axis 0 to `[0, 1]` in place.
///
/// Rows without a positive finite range become all zeros. Returns how many rows that happened to.
pub fn normalize_rows<D: RemoveAxis>(a: &mut Array<f32, D>) -> usize {
    let mut degenerate = 0;
    for mut row in a.outer_iter_mut() {
        let (lo, hi) = row
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = hi - lo;
        if range.is_finite() && range > 0.0 {
            row.mapv_inplace(|v| (v - lo) / range);
        } else {
            row.fill(0.0);
            degenerate += 1;
        }
    }
    degenerate
}

/// Pearson correlation of two equal-length series, clamped to `[-1, 1]`.
///
/// Sums run sequentially in index order. A series with zero variance yields 0.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&a, &b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        tracing::warn!(n, "zero variance in correlation input; coefficient set to 0");
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// Normalize, flatten, correlate, and render `prediction` against `label` to `path`.
pub fn corrcoef<D: RemoveAxis>(
    prediction: &Array<f32, D>,
    label: &Array<f32, D>,
    path: &Path,
) -> Result<CorrelationReport, CorrelationError> {
    if prediction.shape() != label.shape() {
        return Err(CorrelationError::ShapeMismatch {
            prediction: prediction.shape().to_vec(),
            label: label.shape().to_vec(),
        });
    }
    if prediction.is_empty() {
        return Err(CorrelationError::Empty);
    }
    if prediction.iter().any(|v| !v.is_finite()) {
        return Err(CorrelationError::NonFinite(X_LABEL));
    }
    if label.iter().any(|v| !v.is_finite()) {
        return Err(CorrelationError::NonFinite(Y_LABEL));
    }

    let mut prediction = prediction.clone();
    let mut label = label.clone();
    let degenerate_rows = normalize_rows(&mut prediction) + normalize_rows(&mut label);
    if degenerate_rows > 0 {
        tracing::warn!(
            rows = degenerate_rows,
            "constant rows in correlation input mapped to zero"
        );
    }

    let x: Vec<f64> = prediction.iter().map(|&v| v as f64).collect();
    let y: Vec<f64> = label.iter().map(|&v| v as f64).collect();
    let coefficient = pearson(&x, &y);
    let caption = title(coefficient);
    plot::render_correlation(
        &x,
        &y,
        coefficient,
        ChartText {
            title: &caption,
            x_desc: X_LABEL,
            y_desc: Y_LABEL,
        },
        path,
    )?;

    let report = CorrelationReport {
        coefficient,
        degenerate_rows,
        path: path.to_path_buf(),
    };
    tracing::info!(title = %caption, path = %path.display(), "wrote correlation plot");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn rows_map_min_to_zero_and_max_to_one() {
        let mut a = array![[2.0f32, 4.0, 6.0], [-1.0, 1.0, 0.0]];
        assert_eq!(normalize_rows(&mut a), 0);
        assert_eq!(a, array![[0.0f32, 0.5, 1.0], [0.0, 1.0, 0.5]]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut a = Array3::from_shape_fn((3, 4, 5), |(i, y, x)| {
            ((i * 7 + y * 3 + x * 11) % 13) as f32 * 0.37 - 2.0
        });
        normalize_rows(&mut a);
        let once = a.clone();
        normalize_rows(&mut a);
        assert_eq!(a, once);
    }

    #[test]
    fn constant_rows_become_zero() {
        let mut a = array![[3.0f32, 3.0], [1.0, 2.0]];
        assert_eq!(normalize_rows(&mut a), 1);
        assert_eq!(a, array![[0.0f32, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn pearson_is_symmetric_and_bounded() {
        let x: Vec<f64> = (0..40).map(|i| ((i * 17) % 23) as f64).collect();
        let y: Vec<f64> = (0..40).map(|i| ((i * 5) % 11) as f64 + i as f64 * 0.1).collect();
        let a = pearson(&x, &y);
        let b = pearson(&y, &x);
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((-1.0..=1.0).contains(&a));
    }

    #[test]
    fn pearson_of_identical_series_is_one() {
        let x: Vec<f64> = (0..25).map(|i| (i as f64).sin()).collect();
        assert!((pearson(&x, &x) - 1.0).abs() < 1e-12);
        let neg: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((pearson(&x, &neg) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_variance_gives_zero() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]), 0.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = Array3::<f32>::zeros((2, 3, 3));
        let b = Array3::<f32>::zeros((2, 3, 4));
        let err = corrcoef(&a, &b, &dir.path().join("c.png")).unwrap_err();
        assert!(matches!(err, CorrelationError::ShapeMismatch { .. }));
    }

    #[test]
    fn title_rounds_to_two_decimals() {
        assert_eq!(title(0.8765), "Correlation Coefficient = 0.88");
        assert_eq!(title(-1.0), "Correlation Coefficient = -1.00");
    }

    #[test]
    fn corrcoef_renders_identical_inputs_as_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("correlation_0.png");
        let a = Array3::from_shape_fn((2, 4, 4), |(i, y, x)| (i * 16 + y * 4 + x) as f32);
        let report = corrcoef(&a, &a, &path).unwrap();
        assert!((report.coefficient - 1.0).abs() < 1e-12);
        assert_eq!(report.title(), "Correlation Coefficient = 1.00");
        assert!(path.is_file());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Array3::<f32>::ones((1, 2, 2));
        a[[0, 1, 1]] = f32::NAN;
        let b = Array3::<f32>::ones((1, 2, 2));
        let err = corrcoef(&a, &b, &dir.path().join("c.png")).unwrap_err();
        assert!(matches!(err, CorrelationError::NonFinite("prediction")));
    }
}
