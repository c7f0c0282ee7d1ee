use std::path::PathBuf;

use tracing::debug;

use crate::{
    device::Device,
    error::DataError,
    metrics::{compute_metrics, Metrics},
    mnist::MNISTData,
    models::ModelFamily,
    network::CrossEntropyLoss,
    pairs::{DataSettings, PairSplits},
    rng::RunContext,
    training::{train_model, TrainingConfig, TrainingHistory},
};

/// Shared inputs of every run driven by the evaluation and grid-search drivers.
pub struct Experiment<'a> {
    pub digits: &'a MNISTData,
    pub data: DataSettings,
    pub training: TrainingConfig,
    pub device: Device,
    /// Directory plots are written to; `None` disables plotting.
    pub plots: Option<PathBuf>,
}

pub struct RunOutcome {
    pub history: TrainingHistory,
    pub test: Metrics,
}

impl<'a> Experiment<'a> {
    /// Builds fresh data and a fresh model for `seed`, trains it, then scores the test split.
    pub fn run(
        &self,
        family: &dyn ModelFamily,
        learning_rate: f32,
        values: &[f32],
        seed: u64,
    ) -> Result<RunOutcome, DataError> {
        let mut ctx = RunContext::new(seed);
        let splits = PairSplits::build(self.digits, &self.data, &mut ctx)?;
        let mut model = family.build(values, &mut ctx.framework);

        let history = train_model(
            model.as_mut(),
            &splits.train,
            &splits.validation,
            self.device,
            &CrossEntropyLoss,
            &self.training,
            learning_rate,
            &mut ctx.framework,
        );

        let test = compute_metrics(
            model.as_mut(),
            &splits.test,
            self.device,
            self.training.batch_size,
            &CrossEntropyLoss,
            &mut ctx.framework,
        );

        debug!(seed, family = family.name(), ?test, "run finished");

        Ok(RunOutcome { history, test })
    }
}
