//! Exhaustive hyperparameter search shared by every model family.

use itertools::Itertools;
use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{GridError, Result},
    evaluate::{check_learning_rate, Hyperparameters},
    experiment::Experiment,
    models::ModelFamily,
    plot,
    training::TrainingHistory,
};

const TRAIN_ACCURACY: usize = 1;
const VALID_ACCURACY: usize = 3;

/// Candidate values, learning rate first, then one list per family axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperGrid {
    pub learning_rates: Vec<f32>,
    pub axes: Vec<Vec<f32>>,
}

impl HyperGrid {
    pub fn check(&self, family: &dyn ModelFamily) -> std::result::Result<(), GridError> {
        let names = family.axes();

        if self.axes.len() != names.len() {
            return Err(GridError::AxisCount {
                family: family.name(),
                expected: names.len(),
                got: self.axes.len(),
            });
        }

        if self.learning_rates.is_empty() {
            return Err(GridError::EmptyAxis("lr".to_owned()));
        }

        for (axis, values) in names.iter().zip(&self.axes) {
            if values.is_empty() {
                return Err(GridError::EmptyAxis(axis.name.to_owned()));
            }
        }

        for &lr in &self.learning_rates {
            check_learning_rate(lr)?;
        }

        for (axis, values) in names.iter().zip(&self.axes) {
            values.iter().try_for_each(|&value| axis.check(value))?;
        }

        Ok(())
    }

    /// Lengths of the grid dimensions, learning rate first.
    pub fn shape(&self) -> Vec<usize> {
        std::iter::once(self.learning_rates.len())
            .chain(self.axes.iter().map(Vec::len))
            .collect()
    }

    /// Hyperparameters at a grid index (without the seed).
    pub fn point(&self, index: &[usize]) -> Hyperparameters {
        Hyperparameters {
            learning_rate: self.learning_rates[index[0]],
            values: self
                .axes
                .iter()
                .zip(&index[1..])
                .map(|(values, &i)| values[i])
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GridResults {
    /// `[lr, axes..., seed, metric kind, epoch]`.
    pub train_results: ArrayD<f32>,
    /// `[lr, axes..., seed]`.
    pub test_losses: ArrayD<f32>,
    pub test_accuracies: ArrayD<f32>,
    /// Final-epoch accuracies reduced over seeds, `[lr, axes...]`.
    pub valid_mean: ArrayD<f32>,
    pub valid_std: ArrayD<f32>,
    pub train_mean: ArrayD<f32>,
    pub train_std: ArrayD<f32>,
    pub best_index: Vec<usize>,
    pub best: Hyperparameters,
    pub best_mean: f32,
    pub best_std: f32,
}

/// Mean and std over the last axis, unbiased unless there is a single sample.
fn reduce_seeds(
    values: &ArrayD<f32>,
) -> std::result::Result<(ArrayD<f32>, ArrayD<f32>), GridError> {
    let axis = Axis(values.ndim() - 1);
    let ddof = if values.len_of(axis) > 1 { 1.0 } else { 0.0 };
    let mean = values.mean_axis(axis).ok_or(GridError::NoSeeds)?;

    Ok((mean, values.std_axis(axis, ddof)))
}

/// First maximum in row-major order. NaN entries never win.
pub fn first_argmax(values: &ArrayD<f32>) -> Vec<usize> {
    let mut best: Option<(IxDyn, f32)> = None;

    for (index, &value) in values.indexed_iter() {
        let wins = match &best {
            Some((_, current)) => value > *current,
            None => !value.is_nan(),
        };

        if wins {
            best = Some((index, value));
        }
    }

    best.map(|(index, _)| index.slice().to_vec())
        .unwrap_or_else(|| vec![0; values.ndim()])
}

fn history_at(train_results: &ArrayD<f32>, index: &[usize]) -> TrainingHistory {
    let mut slot = train_results.view();
    for &i in index {
        slot = slot.index_axis_move(Axis(0), i);
    }

    let series =
        |kind: usize| -> Vec<f32> { slot.index_axis(Axis(0), kind).iter().copied().collect() };

    TrainingHistory {
        train_loss: series(0),
        train_accuracy: series(1),
        valid_loss: series(2),
        valid_accuracy: series(3),
    }
}

/// Trains `family` at every grid point for every seed and selects the point with
/// the best mean final validation accuracy.
pub fn grid_search(
    family: &dyn ModelFamily,
    grid: &HyperGrid,
    seeds: &[u64],
    experiment: &Experiment,
) -> Result<GridResults> {
    grid.check(family)?;
    if seeds.is_empty() {
        return Err(GridError::NoSeeds.into());
    }

    let n_epochs = experiment.training.n_epochs;
    if n_epochs == 0 {
        return Err(GridError::NoEpochs.into());
    }

    let grid_shape = grid.shape();
    let mut test_shape = grid_shape.clone();
    test_shape.push(seeds.len());
    let mut train_shape = test_shape.clone();
    train_shape.extend([4, n_epochs]);

    let mut train_results = ArrayD::<f32>::zeros(IxDyn(&train_shape));
    let mut test_losses = ArrayD::<f32>::zeros(IxDyn(&test_shape));
    let mut test_accuracies = ArrayD::<f32>::zeros(IxDyn(&test_shape));

    for cell in grid_shape.iter().map(|&len| 0..len).multi_cartesian_product() {
        let params = grid.point(&cell);

        for (n, &seed) in seeds.iter().enumerate() {
            info!("{} (n= {})", params.describe(family), n);

            let outcome = experiment.run(family, params.learning_rate, &params.values, seed)?;

            let mut slot = cell.clone();
            slot.push(n);
            test_losses[slot.as_slice()] = outcome.test.loss;
            test_accuracies[slot.as_slice()] = outcome.test.accuracy;

            for (kind, series) in outcome.history.series().iter().enumerate() {
                for (epoch, &value) in series.iter().enumerate() {
                    let mut index = slot.clone();
                    index.extend([kind, epoch]);
                    train_results[index.as_slice()] = value;
                }
            }
        }
    }

    let final_epoch = train_results.index_axis(Axis(train_shape.len() - 1), n_epochs - 1);
    let kind_axis = Axis(final_epoch.ndim() - 1);
    let (valid_mean, valid_std) =
        reduce_seeds(&final_epoch.index_axis(kind_axis, VALID_ACCURACY).to_owned())?;
    let (train_mean, train_std) =
        reduce_seeds(&final_epoch.index_axis(kind_axis, TRAIN_ACCURACY).to_owned())?;

    let best_index = first_argmax(&valid_mean);
    let best = grid.point(&best_index);
    let best_mean = valid_mean[best_index.as_slice()];
    let best_std = valid_std[best_index.as_slice()];

    info!(
        "Best mean validation accuracy on {} seeds : {:.2}%, std = {:.2} with: {}",
        seeds.len(),
        best_mean,
        best_std,
        best.describe(family)
    );

    if let Some(dir) = &experiment.plots {
        let mut first_seed = best_index.clone();
        first_seed.push(0);

        plot::learning_curve(
            &dir.join(format!("grid_search_{}.svg", family.name())),
            &history_at(&train_results, &first_seed),
        )?;
    }

    Ok(GridResults {
        train_results,
        test_losses,
        test_accuracies,
        valid_mean,
        valid_std,
        train_mean,
        train_std,
        best_index,
        best,
        best_mean,
        best_std,
    })
}
