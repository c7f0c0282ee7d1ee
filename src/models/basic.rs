use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;

use super::{OutputGrads, PairForward, PairNet};
use crate::{
    network::{Conv2d, Gradients, Layer, Linear, MaxPool2d, Mode, Sequential},
    pairs::PAIR_SIDE,
};

/// Both digits as two input channels of a single CNN.
///
/// conv(2->32) / pool / conv(32->64) / pool / fc(256->nb_hidden) / dropout / fc(nb_hidden->2)
pub struct Net2C {
    net: Sequential,
    mode: Mode,
}

impl Net2C {
    pub fn new(rng: &mut StdRng, nb_hidden: usize, drop_prob: f32) -> Self {
        let conv1 = Conv2d::new(rng, 2, 32, 3, (PAIR_SIDE, PAIR_SIDE));
        let (h1, w1) = (conv1.out_height(), conv1.out_width());
        let conv2 = Conv2d::new(rng, 32, 64, 3, (h1 / 2, w1 / 2));
        let (h2, w2) = (conv2.out_height(), conv2.out_width());
        let pool2 = MaxPool2d {
            channels: 64,
            in_height: h2,
            in_width: w2,
        };
        let flat = pool2.output_len();

        let net = Sequential::new(vec![
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
            Layer::Linear(Linear::new(rng, flat, nb_hidden)),
            Layer::Relu,
            Layer::Dropout(drop_prob),
            Layer::Linear(Linear::new(rng, nb_hidden, 2)),
        ]);

        Self {
            net,
            mode: Mode::Train,
        }
    }
}

impl PairNet for Net2C {
    fn forward(&self, input: DVector<f32>, rng: &mut StdRng) -> PairForward {
        let (output, tape) = self.net.forward(input, self.mode, rng);

        PairForward {
            aux: None,
            output,
            tape: vec![tape],
        }
    }

    fn backward(&self, forward: &PairForward, grads: OutputGrads) -> Gradients {
        self.net.backward(&forward.tape[0], grads.output).1
    }

    fn parameters_mut(&mut self) -> Vec<(&mut DMatrix<f32>, &mut DVector<f32>)> {
        self.net.parameters_mut().collect()
    }

    fn zero_gradients(&self) -> Gradients {
        self.net.zero_gradients()
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}
