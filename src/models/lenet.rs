use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;

use super::{OutputGrads, PairForward, PairNet, NUM_DIGITS};
use crate::{
    network::{Conv2d, Gradients, Layer, Linear, MaxPool2d, Mode, Sequential},
    pairs::{CHANNEL_LEN, PAIR_SIDE},
};

const COMPARE_HIDDEN: usize = 90;

/// LeNet-style digit classifier applied with shared weights to each image,
/// followed by a small comparison head over the two 10-way outputs.
///
/// With `auxiliary` set, the digit logits are also exposed so the training loop
/// can add per-digit classification losses.
pub struct LeNetSharing {
    branch: Sequential,
    head: Sequential,
    auxiliary: bool,
    mode: Mode,
}

impl LeNetSharing {
    pub fn new(rng: &mut StdRng, drop_prob_branch: f32, drop_prob_comp: f32, auxiliary: bool) -> Self {
        let conv1 = Conv2d::new(rng, 1, 32, 3, (PAIR_SIDE, PAIR_SIDE));
        let (h1, w1) = (conv1.out_height(), conv1.out_width());
        let conv2 = Conv2d::new(rng, 32, 64, 3, (h1 / 2, w1 / 2));
        let (h2, w2) = (conv2.out_height(), conv2.out_width());
        let pool2 = MaxPool2d {
            channels: 64,
            in_height: h2,
            in_width: w2,
        };
        let flat = pool2.output_len();

        let branch = Sequential::new(vec![
            Layer::Conv2d(conv1),
            Layer::Relu,
            Layer::MaxPool2d(MaxPool2d {
                channels: 32,
                in_height: h1,
                in_width: w1,
            }),
            Layer::Conv2d(conv2),
            Layer::Relu,
            Layer::MaxPool2d(pool2),
            Layer::Dropout(drop_prob_branch),
            Layer::Linear(Linear::new(rng, flat, 128)),
            Layer::Relu,
            Layer::Linear(Linear::new(rng, 128, NUM_DIGITS)),
        ]);

        let head = Sequential::new(vec![
            Layer::Dropout(drop_prob_comp),
            Layer::Linear(Linear::new(rng, 2 * NUM_DIGITS, COMPARE_HIDDEN)),
            Layer::Relu,
            Layer::Linear(Linear::new(rng, COMPARE_HIDDEN, 2)),
        ]);

        Self {
            branch,
            head,
            auxiliary,
            mode: Mode::Train,
        }
    }
}

impl PairNet for LeNetSharing {
    fn forward(&self, input: DVector<f32>, rng: &mut StdRng) -> PairForward {
        let first = input.rows(0, CHANNEL_LEN).clone_owned();
        let second = input.rows(CHANNEL_LEN, CHANNEL_LEN).clone_owned();

        let (digit_a, tape_a) = self.branch.forward(first, self.mode, rng);
        let (digit_b, tape_b) = self.branch.forward(second, self.mode, rng);

        let mut joined = DVector::zeros(2 * NUM_DIGITS);
        joined.rows_mut(0, NUM_DIGITS).copy_from(&digit_a);
        joined.rows_mut(NUM_DIGITS, NUM_DIGITS).copy_from(&digit_b);

        let (output, tape_head) = self.head.forward(joined, self.mode, rng);

        PairForward {
            aux: self.auxiliary.then(|| [digit_a, digit_b]),
            output,
            tape: vec![tape_a, tape_b, tape_head],
        }
    }

    fn backward(&self, forward: &PairForward, grads: OutputGrads) -> Gradients {
        let (grad_joined, head_grads) = self.head.backward(&forward.tape[2], grads.output);

        let mut grad_a = grad_joined.rows(0, NUM_DIGITS).clone_owned();
        let mut grad_b = grad_joined.rows(NUM_DIGITS, NUM_DIGITS).clone_owned();

        if let Some([aux_a, aux_b]) = grads.aux {
            grad_a += aux_a;
            grad_b += aux_b;
        }

        let (_, mut branch_grads) = self.branch.backward(&forward.tape[0], grad_a);
        let (_, second) = self.branch.backward(&forward.tape[1], grad_b);
        branch_grads.accumulate(&second);

        branch_grads.extend(head_grads);
        branch_grads
    }

    fn parameters_mut(&mut self) -> Vec<(&mut DMatrix<f32>, &mut DVector<f32>)> {
        self.branch
            .parameters_mut()
            .chain(self.head.parameters_mut())
            .collect()
    }

    fn zero_gradients(&self) -> Gradients {
        let mut gradients = self.branch.zero_gradients();
        gradients.extend(self.head.zero_gradients());
        gradients
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn has_aux(&self) -> bool {
        self.auxiliary
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::{network::{Criterion, CrossEntropyLoss}, pairs::PAIR_LEN};

    #[test]
    fn shared_branch_gradients_match_parameter_layout() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = LeNetSharing::new(&mut rng, 0.0, 0.0, true);
        let input = DVector::from_fn(PAIR_LEN, |_, _| rng.gen::<f32>());

        let forward = model.forward(input, &mut rng);
        let (_, grad) = CrossEntropyLoss.loss_and_grad(&forward.output, 1);
        let aux = forward.aux.clone().map(|[a, b]| {
            [
                CrossEntropyLoss.loss_and_grad(&a, 3).1,
                CrossEntropyLoss.loss_and_grad(&b, 7).1,
            ]
        });

        let gradients = model.backward(&forward, OutputGrads { output: grad, aux });
        let zeros = model.zero_gradients();

        assert_eq!(gradients.len(), zeros.len());
        for ((g, z), (w, _)) in gradients
            .weights
            .iter()
            .zip(&zeros.weights)
            .zip(model.parameters_mut())
        {
            assert_eq!(g.shape(), z.shape());
            assert_eq!(g.shape(), w.shape());
        }
    }

    #[test]
    fn both_digits_share_one_branch() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut model = LeNetSharing::new(&mut rng, 0.5, 0.5, true);
        model.set_mode(Mode::Eval);

        let image: Vec<f32> = (0..CHANNEL_LEN).map(|i| (i % 13) as f32 / 13.0).collect();
        let mut input = DVector::zeros(PAIR_LEN);
        input.rows_mut(0, CHANNEL_LEN).copy_from_slice(&image);
        input.rows_mut(CHANNEL_LEN, CHANNEL_LEN).copy_from_slice(&image);

        let forward = model.forward(input, &mut rng);
        let [a, b] = forward.aux.unwrap();

        assert_eq!(a, b);
    }
}
