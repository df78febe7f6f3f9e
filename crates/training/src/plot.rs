//! Scatter/line chart for the correlation diagnostic.

use crate::error::CorrelationError;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
const FONT: &str = "sans-serif";

/// First color of the Set1 palette.
pub const SCATTER: RGBColor = RGBColor(228, 26, 28);
pub const LINE: RGBColor = BLUE;

/// Text drawn around the chart.
#[derive(Debug, Clone, Copy)]
pub struct ChartText<'a> {
    pub title: &'a str,
    pub x_desc: &'a str,
    pub y_desc: &'a str,
}

fn padded(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    if hi - lo <= f64::EPSILON {
        return (lo - 0.5)..(hi + 0.5);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

/// Render `(x[i], y[i])` as a scatter with the line `y = r * x` on top and write a PNG to `path`.
pub fn render_correlation(
    x: &[f64],
    y: &[f64],
    r: f64,
    text: ChartText<'_>,
    path: &Path,
) -> Result<(), CorrelationError> {
    let fail = |stage: &str, e: &dyn std::fmt::Display| CorrelationError::Render {
        path: path.to_path_buf(),
        reason: format!("{stage}: {e}"),
    };
    let x_range = padded(x.iter().copied());
    let y_range = padded(
        y.iter()
            .copied()
            .chain([r * x_range.start, r * x_range.end]),
    );

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| fail("canvas", &e))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .caption(text.title, (FONT, 22.0))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), y_range)
        .map_err(|e| fail("chart", &e))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(text.x_desc)
        .y_desc(text.y_desc)
        .draw()
        .map_err(|e| fail("mesh", &e))?;

    chart
        .draw_series(
            x.iter()
                .zip(y)
                .map(|(&a, &b)| Circle::new((a, b), 2, SCATTER.filled())),
        )
        .map_err(|e| fail("scatter", &e))?;
    chart
        .draw_series(LineSeries::new(
            [
                (x_range.start, r * x_range.start),
                (x_range.end, r * x_range.end),
            ],
            LINE.stroke_width(2),
        ))
        .map_err(|e| fail("line", &e))?;

    root.present().map_err(|e| fail("write", &e))
}
