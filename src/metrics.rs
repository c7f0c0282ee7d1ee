use itertools::Itertools;
use nalgebra::DMatrix;
use permutation_iterator::Permutor;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{device::Device, models::PairNet, network::Criterion, pairs::PairSet};

/// Average per-example loss and accuracy percentage over a split.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metrics {
    pub loss: f32,
    pub accuracy: f32,
}

/// Number of columns of `outputs` whose arg-max differs from the target.
pub fn compute_nb_errors(outputs: &DMatrix<f32>, targets: &[u8]) -> usize {
    outputs
        .column_iter()
        .zip(targets)
        .filter(|(output, target)| output.argmax().0 != **target as usize)
        .count()
}

/// Scores `model` on `data` in shuffled mini-batches.
///
/// The model is switched to eval mode and left there.
pub fn compute_metrics(
    model: &mut dyn PairNet,
    data: &PairSet,
    device: Device,
    batch_size: usize,
    criterion: &dyn Criterion,
    rng: &mut StdRng,
) -> Metrics {
    model.eval();

    if data.is_empty() {
        return Metrics {
            loss: 0.0,
            accuracy: 0.0,
        };
    }

    let model: &dyn PairNet = model;
    let mut total_loss = 0.0;
    let mut nb_errors = 0;

    for batch in Permutor::new_with_u64_key(data.len() as u64, rng.gen())
        .chunks(batch_size.max(1))
        .into_iter()
    {
        let indices: Vec<usize> = batch.map(|i| i as usize).collect();

        let scored = device.map(&indices, |&idx| {
            // Eval mode never draws from it.
            let mut rng = StdRng::seed_from_u64(0);
            let output = model.forward(data.input(idx), &mut rng).output;
            let loss = criterion.loss(&output, data.targets[idx] as usize);

            (output, loss)
        });

        let outputs: Vec<_> = scored.iter().map(|(output, _)| output.clone()).collect();
        let targets: Vec<u8> = indices.iter().map(|&idx| data.targets[idx]).collect();

        total_loss += scored.iter().map(|(_, loss)| loss).sum::<f32>();
        nb_errors += compute_nb_errors(&DMatrix::from_columns(&outputs), &targets);
    }

    let total = data.len() as f32;

    Metrics {
        loss: total_loss / total,
        accuracy: 100.0 * (1.0 - nb_errors as f32 / total),
    }
}
