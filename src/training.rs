use itertools::Itertools;
use permutation_iterator::Permutor;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    device::Device,
    metrics::{compute_metrics, Metrics},
    models::{OutputGrads, PairNet},
    network::{Criterion, Gradients, OptimizerKind},
    pairs::PairSet,
};

/// Everything about a training run except the model and the learning rate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub n_epochs: usize,
    /// Weight decay added to every gradient as `l2_penalty * w`.
    pub l2_penalty: f32,
    /// Weight of the comparison loss for auxiliary-loss models.
    pub alpha: f32,
    /// Weight of the summed per-digit losses for auxiliary-loss models.
    pub beta: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            optimizer: OptimizerKind::Adam,
            n_epochs: 40,
            l2_penalty: 0.0,
            alpha: 0.5,
            beta: 0.5,
        }
    }
}

/// Per-epoch metric series of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub train_accuracy: Vec<f32>,
    pub valid_loss: Vec<f32>,
    pub valid_accuracy: Vec<f32>,
}

impl TrainingHistory {
    pub fn with_capacity(epochs: usize) -> Self {
        Self {
            train_loss: Vec::with_capacity(epochs),
            train_accuracy: Vec::with_capacity(epochs),
            valid_loss: Vec::with_capacity(epochs),
            valid_accuracy: Vec::with_capacity(epochs),
        }
    }

    fn record(&mut self, train: Metrics, valid: Metrics) {
        self.train_loss.push(train.loss);
        self.train_accuracy.push(train.accuracy);
        self.valid_loss.push(valid.loss);
        self.valid_accuracy.push(valid.accuracy);
    }

    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    /// The four series in results-tensor order: train loss, train acc, valid loss, valid acc.
    pub fn series(&self) -> [&[f32]; 4] {
        [
            &self.train_loss,
            &self.train_accuracy,
            &self.valid_loss,
            &self.valid_accuracy,
        ]
    }
}

/// Loss of one example and its gradient w.r.t. every model output, already scaled by `scale`.
fn example_loss(
    model: &dyn PairNet,
    data: &PairSet,
    idx: usize,
    criterion: &dyn Criterion,
    config: &TrainingConfig,
    scale: f32,
    rng: &mut StdRng,
) -> (f32, Gradients) {
    let forward = model.forward(data.input(idx), rng);
    let (main_loss, main_grad) = criterion.loss_and_grad(&forward.output, data.targets[idx] as usize);

    let (loss, grads) = match &forward.aux {
        Some([digit_a, digit_b]) => {
            let [class_a, class_b] = data.classes[idx];
            let (loss_a, grad_a) = criterion.loss_and_grad(digit_a, class_a as usize);
            let (loss_b, grad_b) = criterion.loss_and_grad(digit_b, class_b as usize);
            let aux_scale = config.beta * scale;

            (
                config.alpha * main_loss + config.beta * (loss_a + loss_b),
                OutputGrads {
                    output: main_grad * (config.alpha * scale),
                    aux: Some([grad_a * aux_scale, grad_b * aux_scale]),
                },
            )
        }
        None => (
            main_loss,
            OutputGrads {
                output: main_grad * scale,
                aux: None,
            },
        ),
    };

    (loss * scale, model.backward(&forward, grads))
}

/// Trains `model` for `config.n_epochs` epochs of shuffled mini-batch descent.
///
/// After each epoch both splits are scored with [`compute_metrics`]; there is no early stopping.
#[allow(clippy::too_many_arguments)]
pub fn train_model(
    model: &mut dyn PairNet,
    train: &PairSet,
    validation: &PairSet,
    device: Device,
    criterion: &dyn Criterion,
    config: &TrainingConfig,
    learning_rate: f32,
    rng: &mut StdRng,
) -> TrainingHistory {
    let mut optimizer = config.optimizer.build(learning_rate, config.l2_penalty);
    let mut history = TrainingHistory::with_capacity(config.n_epochs);
    let batch_size = config.batch_size.max(1);

    debug!(
        aux = model.has_aux(),
        learning_rate,
        train = train.len(),
        "training for {} epochs",
        config.n_epochs
    );

    for epoch in 0..config.n_epochs {
        model.train();

        let batches = if train.is_empty() {
            Vec::new()
        } else {
            Permutor::new_with_u64_key(train.len() as u64, rng.gen())
                .chunks(batch_size)
                .into_iter()
                .map(|batch| batch.map(|i| i as usize).collect::<Vec<_>>())
                .collect()
        };

        let mut epoch_loss = 0.0;

        for batch in batches {
            // Dropout masks are drawn from per-example streams so devices agree.
            let jobs: Vec<(usize, u64)> = batch.iter().map(|&idx| (idx, rng.gen())).collect();
            let scale = 1.0 / jobs.len() as f32;
            let net: &dyn PairNet = model;

            let per_example = device.map(&jobs, |&(idx, seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                example_loss(net, train, idx, criterion, config, scale, &mut rng)
            });

            let mut nablas = net.zero_gradients();

            for (loss, gradients) in &per_example {
                epoch_loss += loss;
                nablas.accumulate(gradients);
            }

            optimizer.step(model.parameters_mut(), &nablas);
        }

        let train_metrics = compute_metrics(model, train, device, batch_size, criterion, rng);
        let valid_metrics = compute_metrics(model, validation, device, batch_size, criterion, rng);

        debug!(
            "Epoch {}/{} | batch loss {:.4} | train loss {:.4} acc {:.2}% | valid loss {:.4} acc {:.2}%",
            epoch + 1,
            config.n_epochs,
            epoch_loss,
            train_metrics.loss,
            train_metrics.accuracy,
            valid_metrics.loss,
            valid_metrics.accuracy
        );

        history.record(train_metrics, valid_metrics);
    }

    history
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        models::{Family, LeNetSharing, ModelFamily},
        network::{CrossEntropyLoss, Mode},
        pairs::{tests::synthetic_digits, PairSet},
    };

    fn small_config(n_epochs: usize, optimizer: OptimizerKind) -> TrainingConfig {
        TrainingConfig {
            batch_size: 10,
            optimizer,
            n_epochs,
            ..TrainingConfig::default()
        }
    }

    fn data(seed: u64) -> (PairSet, PairSet) {
        let mut rng = StdRng::seed_from_u64(seed);
        let digits = synthetic_digits(120, seed);
        let mut train = PairSet::sample(&digits, 50, &mut rng).unwrap();
        let valid = train.split_off(40);
        (train, valid)
    }

    fn aux_config(alpha: f32, beta: f32) -> TrainingConfig {
        TrainingConfig {
            alpha,
            beta,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn aux_model_without_aux_weight_matches_plain_sharing() {
        let (train, _) = data(4);
        let aux = LeNetSharing::new(&mut StdRng::seed_from_u64(9), 0.0, 0.0, true);
        let plain = LeNetSharing::new(&mut StdRng::seed_from_u64(9), 0.0, 0.0, false);
        let config = aux_config(1.0, 0.0);

        for idx in 0..3 {
            let (aux_loss, aux_grads) = example_loss(
                &aux,
                &train,
                idx,
                &CrossEntropyLoss,
                &config,
                0.5,
                &mut StdRng::seed_from_u64(0),
            );
            let (plain_loss, plain_grads) = example_loss(
                &plain,
                &train,
                idx,
                &CrossEntropyLoss,
                &config,
                0.5,
                &mut StdRng::seed_from_u64(0),
            );

            assert_eq!(aux_loss, plain_loss);
            assert_eq!(aux_grads, plain_grads);
        }
    }

    #[test]
    fn aux_loss_combines_main_and_digit_terms() {
        let (train, _) = data(5);
        let model = LeNetSharing::new(&mut StdRng::seed_from_u64(10), 0.0, 0.0, true);
        let (alpha, beta, scale) = (0.3, 0.7, 0.25);
        let idx = 1;

        let forward = model.forward(train.input(idx), &mut StdRng::seed_from_u64(0));
        let [digit_a, digit_b] = forward.aux.clone().unwrap();
        let [class_a, class_b] = train.classes[idx];
        let main = CrossEntropyLoss.loss(&forward.output, train.targets[idx] as usize);
        let aux_a = CrossEntropyLoss.loss(&digit_a, class_a as usize);
        let aux_b = CrossEntropyLoss.loss(&digit_b, class_b as usize);

        let (loss, _) = example_loss(
            &model,
            &train,
            idx,
            &CrossEntropyLoss,
            &aux_config(alpha, beta),
            scale,
            &mut StdRng::seed_from_u64(0),
        );

        assert_relative_eq!(
            loss,
            (alpha * main + beta * (aux_a + aux_b)) * scale,
            epsilon = 1e-5
        );
    }

    #[test]
    fn aux_gradients_scale_with_their_weights() {
        let (train, _) = data(6);
        let model = LeNetSharing::new(&mut StdRng::seed_from_u64(11), 0.0, 0.0, true);
        let grads = |alpha: f32, beta: f32| {
            example_loss(
                &model,
                &train,
                0,
                &CrossEntropyLoss,
                &aux_config(alpha, beta),
                1.0,
                &mut StdRng::seed_from_u64(0),
            )
            .1
        };

        let main_only = grads(1.0, 0.0);
        let aux_only = grads(0.0, 1.0);
        let combined = grads(2.0, 3.0);

        for (i, w) in combined.weights.iter().enumerate() {
            let expected = &main_only.weights[i] * 2.0 + &aux_only.weights[i] * 3.0;
            assert_relative_eq!(*w, expected, epsilon = 1e-4, max_relative = 1e-3);
        }
        for (i, b) in combined.biases.iter().enumerate() {
            let expected = &main_only.biases[i] * 2.0 + &aux_only.biases[i] * 3.0;
            assert_relative_eq!(*b, expected, epsilon = 1e-4, max_relative = 1e-3);
        }
    }

    #[test]
    fn history_has_one_entry_per_epoch() {
        let (train, valid) = data(1);
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Family::SharingAux.build(&[0.1, 0.1], &mut rng);

        let history = train_model(
            model.as_mut(),
            &train,
            &valid,
            Device::Cpu,
            &CrossEntropyLoss,
            &small_config(3, OptimizerKind::Adam),
            1e-3,
            &mut rng,
        );

        assert_eq!(history.epochs(), 3);
        for series in history.series() {
            assert_eq!(series.len(), 3);
        }
        assert_eq!(model.mode(), Mode::Eval);
    }

    #[test]
    fn training_lowers_the_training_loss() {
        let (train, valid) = data(2);
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = Family::Basic.build(&[0.0, 16.0], &mut rng);

        let history = train_model(
            model.as_mut(),
            &train,
            &valid,
            Device::Cpu,
            &CrossEntropyLoss,
            &small_config(8, OptimizerKind::Adam),
            1e-3,
            &mut rng,
        );

        assert!(history.train_loss[7] < history.train_loss[0]);
    }

    #[test]
    fn devices_produce_identical_histories() {
        let (train, valid) = data(3);
        let config = small_config(2, OptimizerKind::Sgd);

        let run = |device| {
            let mut rng = StdRng::seed_from_u64(3);
            let mut model = Family::Sharing.build(&[0.3, 0.3], &mut rng);
            train_model(
                model.as_mut(),
                &train,
                &valid,
                device,
                &CrossEntropyLoss,
                &config,
                1e-2,
                &mut rng,
            )
        };

        let serial = run(Device::Cpu);
        let parallel = run(Device::Parallel);

        assert_eq!(serial.train_accuracy, parallel.train_accuracy);
        assert_eq!(serial.valid_accuracy, parallel.valid_accuracy);
    }
}
