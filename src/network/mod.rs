//! A minimal per-example network engine: layers, a sequential container, loss and optimizers.

mod layers;
mod loss;
mod optim;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;

pub use layers::{Cache, Conv2d, Layer, Linear, MaxPool2d, Nabla};
pub use loss::{Criterion, CrossEntropyLoss};
pub use optim::{Adam, Optimizer, OptimizerKind, Sgd};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Parameter gradients, one entry per parametric layer in model order.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    pub weights: Vec<DMatrix<f32>>,
    pub biases: Vec<DVector<f32>>,
}

impl Gradients {
    pub fn empty() -> Self {
        Self {
            weights: Vec::new(),
            biases: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn push(&mut self, (nw, nb): Nabla) {
        self.weights.push(nw);
        self.biases.push(nb);
    }

    /// Appends another section's gradients after this one's.
    pub fn extend(&mut self, other: Self) {
        self.weights.extend(other.weights);
        self.biases.extend(other.biases);
    }

    pub fn accumulate(&mut self, other: &Self) {
        self.weights
            .iter_mut()
            .zip(&other.weights)
            .for_each(|(n, dn)| *n += dn);

        self.biases
            .iter_mut()
            .zip(&other.biases)
            .for_each(|(n, dn)| *n += dn);
    }
}

/// Layers applied in order; the forward pass records a tape for backpropagation.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

pub type Tape = Vec<Cache>;

impl Sequential {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn forward(&self, input: DVector<f32>, mode: Mode, rng: &mut StdRng) -> (DVector<f32>, Tape) {
        let mut tape = Tape::with_capacity(self.layers.len());

        let output = self.layers.iter().fold(input, |activation, layer| {
            let (out, cache) = layer.forward(activation, mode, rng);
            tape.push(cache);
            out
        });

        (output, tape)
    }

    /// Backpropagates `grad` through the recorded `tape`, returning the input gradient.
    pub fn backward(&self, tape: &Tape, grad: DVector<f32>) -> (DVector<f32>, Gradients) {
        let mut nablas = Vec::new();

        let grad_in = self
            .layers
            .iter()
            .zip(tape)
            .rev()
            .fold(grad, |delta, (layer, cache)| {
                let (delta, nabla) = layer.backward(cache, delta);
                nablas.extend(nabla);
                delta
            });

        let mut gradients = Gradients::empty();
        nablas.into_iter().rev().for_each(|n| gradients.push(n));

        (grad_in, gradients)
    }

    pub fn parameters_mut(&mut self) -> impl Iterator<Item = (&mut DMatrix<f32>, &mut DVector<f32>)> {
        self.layers.iter_mut().filter_map(Layer::parameters_mut)
    }

    pub fn zero_gradients(&self) -> Gradients {
        let mut gradients = Gradients::empty();

        for ((rows, cols), bias) in self.layers.iter().filter_map(Layer::parameter_shapes) {
            gradients.push((DMatrix::zeros(rows, cols), DVector::zeros(bias)));
        }

        gradients
    }
}
