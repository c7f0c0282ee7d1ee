//! SVG renderings of training runs. Presentation only.

use std::{fs, path::Path};

use plotters::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{error::PlotError, training::TrainingHistory};

const JITTER: f32 = 0.08;

fn render<E: std::fmt::Display>(err: E) -> PlotError {
    PlotError::Render(err.to_string())
}

fn ensure_parent(path: &Path) -> Result<(), PlotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(())
}

fn points(series: &[f32]) -> Vec<(f32, f32)> {
    series
        .iter()
        .enumerate()
        .map(|(epoch, &v)| (epoch as f32, v))
        .collect()
}

/// Loss (left axis) and accuracy (right axis) per epoch, train in green, validation in red.
pub fn learning_curve(path: &Path, history: &TrainingHistory) -> Result<(), PlotError> {
    ensure_parent(path)?;

    let epochs = history.epochs().max(2) as f32;
    let max_loss = history
        .train_loss
        .iter()
        .chain(&history.valid_loss)
        .copied()
        .filter(|v| v.is_finite())
        .fold(1e-3f32, f32::max);

    let root = SVGBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(render)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Learning curve", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .right_y_label_area_size(60)
        .build_cartesian_2d(0f32..epochs - 1.0, 0f32..max_loss * 1.1)
        .map_err(render)?
        .set_secondary_coord(0f32..epochs - 1.0, 0f32..100f32);

    chart
        .configure_mesh()
        .x_desc("Epochs")
        .y_desc("Normalized loss [loss/data size]")
        .draw()
        .map_err(render)?;
    chart
        .configure_secondary_axes()
        .y_desc("Accuracy [%]")
        .draw()
        .map_err(render)?;

    for (series, label, color) in [
        (&history.train_loss, "Train loss", GREEN),
        (&history.valid_loss, "Validation loss", RED),
    ] {
        chart
            .draw_series(LineSeries::new(points(series), color.stroke_width(2)))
            .map_err(render)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    for (series, label, color) in [
        (&history.train_accuracy, "Train acc", GREEN),
        (&history.valid_accuracy, "Validation acc", RED),
    ] {
        chart
            .draw_secondary_series(LineSeries::new(points(series), color.stroke_width(1)).point_size(3))
            .map_err(render)?
            .label(label)
            .legend(move |(x, y)| Circle::new((x + 10, y), 3, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(render)?;

    root.present().map_err(render)
}

/// Train vs. test accuracy across seeds as two boxes with a jittered scatter of the raw values.
pub fn boxplot(path: &Path, title: &str, train: &[f32], test: &[f32]) -> Result<(), PlotError> {
    ensure_parent(path)?;

    let all = train.iter().chain(test).copied().filter(|v| v.is_finite());
    let (lo, hi) = all.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let (lo, hi) = if lo.is_finite() {
        (lo - 1.0, hi + 1.0)
    } else {
        (0.0, 100.0)
    };

    let root = SVGBackend::new(path, (1000, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(render)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..3f32, lo..hi)
        .map_err(render)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(4)
        .x_label_formatter(&|x| {
            if (x - 1.0).abs() < 1e-3 {
                "Train".to_owned()
            } else if (x - 2.0).abs() < 1e-3 {
                "Test".to_owned()
            } else {
                String::new()
            }
        })
        .y_desc("Accuracy (%)")
        .draw()
        .map_err(render)?;

    let mut rng = StdRng::seed_from_u64(0);

    for (x, values) in [(1f32, train), (2f32, test)] {
        if values.is_empty() {
            continue;
        }

        chart
            .draw_series(std::iter::once(
                Boxplot::new_vertical(x, &Quartiles::new(values))
                    .width(60)
                    .whisker_width(0.0)
                    .style(BLACK.stroke_width(2)),
            ))
            .map_err(render)?;

        let scatter: Vec<_> = values
            .iter()
            .map(|&v| (x + rng.gen_range(-JITTER..JITTER), v))
            .collect();

        chart
            .draw_series(scatter.into_iter().map(|p| Circle::new(p, 3, RED.filled())))
            .map_err(render)?;
    }

    root.present().map_err(render)
}
