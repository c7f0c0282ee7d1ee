//! Network families for the digit-comparison task.

mod basic;
mod lenet;

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;

use crate::{
    error::GridError,
    network::{Gradients, Mode, Tape},
};

pub use basic::Net2C;
pub use lenet::LeNetSharing;

pub use crate::mnist::NUM_DIGITS;

/// Result of a forward pass over one pair.
pub struct PairForward {
    /// Per-digit logits for the first and second image, for auxiliary-loss models.
    pub aux: Option<[DVector<f32>; 2]>,
    /// Two comparison logits.
    pub output: DVector<f32>,
    pub tape: Vec<Tape>,
}

/// Loss gradients w.r.t. each output of a `PairForward`.
pub struct OutputGrads {
    pub output: DVector<f32>,
    pub aux: Option<[DVector<f32>; 2]>,
}

pub trait PairNet: Send + Sync {
    fn forward(&self, input: DVector<f32>, rng: &mut StdRng) -> PairForward;

    fn backward(&self, forward: &PairForward, grads: OutputGrads) -> Gradients;

    /// Parameters in the same order as the gradients returned by `backward`.
    fn parameters_mut(&mut self) -> Vec<(&mut DMatrix<f32>, &mut DVector<f32>)>;

    fn zero_gradients(&self) -> Gradients;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    fn has_aux(&self) -> bool {
        false
    }

    fn train(&mut self) {
        self.set_mode(Mode::Train);
    }

    fn eval(&mut self) {
        self.set_mode(Mode::Eval);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisKind {
    Probability,
    Width,
}

/// A tunable constructor argument of a model family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Axis {
    pub name: &'static str,
    pub kind: AxisKind,
}

impl Axis {
    pub const fn probability(name: &'static str) -> Self {
        Self {
            name,
            kind: AxisKind::Probability,
        }
    }

    pub const fn width(name: &'static str) -> Self {
        Self {
            name,
            kind: AxisKind::Width,
        }
    }

    /// Probabilities must lie in [0, 1); widths must be whole numbers of at least one unit.
    pub fn check(&self, value: f32) -> Result<(), GridError> {
        let valid = match self.kind {
            AxisKind::Probability => (0.0..1.0).contains(&value),
            AxisKind::Width => value >= 1.0 && value.fract() == 0.0 && value.is_finite(),
        };

        if valid {
            Ok(())
        } else {
            Err(GridError::InvalidValue {
                axis: self.name.to_owned(),
                value,
            })
        }
    }

    pub fn format(&self, value: f32) -> String {
        match self.kind {
            AxisKind::Probability => format!("{} : {:.2}", self.name, value),
            AxisKind::Width => format!("{} : {}", self.name, value.round() as usize),
        }
    }
}

/// What the grid search and evaluation drivers need to know about an architecture.
pub trait ModelFamily: Sync {
    fn name(&self) -> &'static str;

    /// Hyperparameter axes, outer to inner, excluding the learning rate.
    fn axes(&self) -> &'static [Axis];

    /// Builds a freshly initialised model; `values` lines up with `axes()`.
    fn build(&self, values: &[f32], rng: &mut StdRng) -> Box<dyn PairNet>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum Family {
    /// Two-channel CNN with a tunable hidden layer
    Basic,
    /// Weight-sharing LeNet over each digit, comparison head on top
    Sharing,
    /// Weight-sharing LeNet trained with auxiliary digit losses
    SharingAux,
}

const BASIC_AXES: [Axis; 2] = [Axis::probability("prob"), Axis::width("nb_hidden")];
const SHARING_AXES: [Axis; 2] = [Axis::probability("prob_ws"), Axis::probability("prob_comp")];
const SHARING_AUX_AXES: [Axis; 2] = [
    Axis::probability("prob_aux"),
    Axis::probability("prob_comp"),
];

impl ModelFamily for Family {
    fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Sharing => "sharing",
            Self::SharingAux => "sharing-aux",
        }
    }

    fn axes(&self) -> &'static [Axis] {
        match self {
            Self::Basic => &BASIC_AXES,
            Self::Sharing => &SHARING_AXES,
            Self::SharingAux => &SHARING_AUX_AXES,
        }
    }

    fn build(&self, values: &[f32], rng: &mut StdRng) -> Box<dyn PairNet> {
        match self {
            Self::Basic => Box::new(Net2C::new(rng, values[1].round() as usize, values[0])),
            Self::Sharing => Box::new(LeNetSharing::new(rng, values[0], values[1], false)),
            Self::SharingAux => Box::new(LeNetSharing::new(rng, values[0], values[1], true)),
        }
    }
}
