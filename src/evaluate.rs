use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{GridError, Result},
    experiment::Experiment,
    models::ModelFamily,
    plot,
    training::TrainingHistory,
};

pub(crate) fn check_learning_rate(value: f32) -> std::result::Result<(), GridError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GridError::InvalidValue {
            axis: "lr".to_owned(),
            value,
        })
    }
}

/// One point of a family's hyperparameter space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f32,
    /// One value per family axis, in declared order.
    pub values: Vec<f32>,
}

impl Hyperparameters {
    pub fn check(&self, family: &dyn ModelFamily) -> std::result::Result<(), GridError> {
        let expected = family.axes().len();

        if self.values.len() != expected {
            return Err(GridError::AxisCount {
                family: family.name(),
                expected,
                got: self.values.len(),
            });
        }

        check_learning_rate(self.learning_rate)?;

        family
            .axes()
            .iter()
            .zip(&self.values)
            .try_for_each(|(axis, &value)| axis.check(value))
    }

    /// `lr : 0.0010, prob : 0.20, nb_hidden : 64`
    pub fn describe(&self, family: &dyn ModelFamily) -> String {
        std::iter::once(format!("lr : {:.4}", self.learning_rate))
            .chain(
                family
                    .axes()
                    .iter()
                    .zip(&self.values)
                    .map(|(axis, &value)| axis.format(value)),
            )
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-seed results of [`evaluate_model`].
#[derive(Clone, Debug)]
pub struct EvaluationResults {
    /// `(seed, metric kind, epoch)`; metric kinds follow [`TrainingHistory::series`].
    pub train_results: Array3<f32>,
    pub test_losses: Array1<f32>,
    pub test_accuracies: Array1<f32>,
}

/// Trains once on `seed` and reports the test score.
pub fn validate_model(
    family: &dyn ModelFamily,
    params: &Hyperparameters,
    seed: u64,
    experiment: &Experiment,
) -> Result<TrainingHistory> {
    params.check(family)?;
    if experiment.training.n_epochs == 0 {
        return Err(GridError::NoEpochs.into());
    }

    let outcome = experiment.run(family, params.learning_rate, &params.values, seed)?;

    if let Some(dir) = &experiment.plots {
        plot::learning_curve(
            &dir.join(format!("validate_{}.svg", family.name())),
            &outcome.history,
        )?;
    }

    info!(
        "Test Set | Loss: {:.4} | Accuracy: {:.2}%",
        outcome.test.loss, outcome.test.accuracy
    );

    Ok(outcome.history)
}

/// Repeats a full run for every seed. Summary statistics are left to the caller.
pub fn evaluate_model(
    family: &dyn ModelFamily,
    params: &Hyperparameters,
    seeds: &[u64],
    experiment: &Experiment,
) -> Result<EvaluationResults> {
    params.check(family)?;
    if seeds.is_empty() {
        return Err(GridError::NoSeeds.into());
    }

    let n_epochs = experiment.training.n_epochs;
    if n_epochs == 0 {
        return Err(GridError::NoEpochs.into());
    }

    let mut train_results = Array3::zeros((seeds.len(), 4, n_epochs));
    let mut test_losses = Array1::zeros(seeds.len());
    let mut test_accuracies = Array1::zeros(seeds.len());

    info!("Evaluating {} with {}", family.name(), params.describe(family));

    for (n, &seed) in seeds.iter().enumerate() {
        let outcome = experiment.run(family, params.learning_rate, &params.values, seed)?;

        for (kind, series) in outcome.history.series().iter().enumerate() {
            for (epoch, &value) in series.iter().enumerate() {
                train_results[[n, kind, epoch]] = value;
            }
        }
        test_losses[n] = outcome.test.loss;
        test_accuracies[n] = outcome.test.accuracy;

        info!(
            "Trial {} | Test Loss: {:.4} | Test Accuracy: {:.2}%",
            n, outcome.test.loss, outcome.test.accuracy
        );

        if let Some(dir) = &experiment.plots {
            plot::learning_curve(
                &dir.join(format!("evaluate_{}_seed{}.svg", family.name(), seed)),
                &outcome.history,
            )?;
        }
    }

    if let Some(dir) = &experiment.plots {
        let final_train: Vec<f32> = train_results
            .index_axis(ndarray::Axis(2), n_epochs - 1)
            .index_axis(ndarray::Axis(1), 1)
            .to_vec();

        plot::boxplot(
            &dir.join(format!("evaluate_{}_boxplot.svg", family.name())),
            &format!("{} accuracy over {} seeds", family.name(), seeds.len()),
            &final_train,
            &test_accuracies.to_vec(),
        )?;
    }

    Ok(EvaluationResults {
        train_results,
        test_losses,
        test_accuracies,
    })
}
