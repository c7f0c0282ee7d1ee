use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::Gradients;

pub trait Optimizer {
    /// Applies one update to `params`, which must line up with `gradients`.
    fn step<'a>(
        &mut self,
        params: Vec<(&'a mut DMatrix<f32>, &'a mut DVector<f32>)>,
        gradients: &Gradients,
    );
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    #[default]
    Adam,
}

impl OptimizerKind {
    pub fn build(self, learning_rate: f32, l2_penalty: f32) -> Box<dyn Optimizer> {
        match self {
            Self::Sgd => Box::new(Sgd::new(learning_rate, l2_penalty)),
            Self::Adam => Box::new(Adam::new(learning_rate, l2_penalty)),
        }
    }
}

/// Plain gradient descent; the L2 penalty enters as `l2 * w` added to the gradient.
pub struct Sgd {
    learning_rate: f32,
    l2_penalty: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32, l2_penalty: f32) -> Self {
        Self {
            learning_rate,
            l2_penalty,
        }
    }
}

impl Optimizer for Sgd {
    fn step<'a>(
        &mut self,
        params: Vec<(&'a mut DMatrix<f32>, &'a mut DVector<f32>)>,
        gradients: &Gradients,
    ) {
        let (rate, l2) = (self.learning_rate, self.l2_penalty);

        for ((w, b), (nw, nb)) in params
            .into_iter()
            .zip(gradients.weights.iter().zip(&gradients.biases))
        {
            let dw = nw + &*w * l2;
            let db = nb + &*b * l2;

            *w -= dw * rate;
            *b -= db * rate;
        }
    }
}

/// Adam with bias correction, first-moment and second-moment state per parameter.
pub struct Adam {
    learning_rate: f32,
    l2_penalty: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: Option<Gradients>,
    v: Option<Gradients>,
}

impl Adam {
    pub fn new(learning_rate: f32, l2_penalty: f32) -> Self {
        Self {
            learning_rate,
            l2_penalty,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: None,
            v: None,
        }
    }
}

fn zeros_like(gradients: &Gradients) -> Gradients {
    Gradients {
        weights: gradients
            .weights
            .iter()
            .map(|m| {
                let (r, c) = m.shape();

                DMatrix::zeros(r, c)
            })
            .collect(),
        biases: gradients
            .biases
            .iter()
            .map(|v| DVector::zeros(v.nrows()))
            .collect(),
    }
}

impl Optimizer for Adam {
    fn step<'a>(
        &mut self,
        params: Vec<(&'a mut DMatrix<f32>, &'a mut DVector<f32>)>,
        gradients: &Gradients,
    ) {
        self.t += 1;

        let (b1, b2, eps, l2) = (self.beta1, self.beta2, self.eps, self.l2_penalty);
        let m = self.m.get_or_insert_with(|| zeros_like(gradients));
        let v = self.v.get_or_insert_with(|| zeros_like(gradients));
        let step = self.learning_rate * (1.0 - b2.powi(self.t)).sqrt() / (1.0 - b1.powi(self.t));

        for (i, (w, b)) in params.into_iter().enumerate() {
            let dw = &gradients.weights[i] + &*w * l2;
            let db = &gradients.biases[i] + &*b * l2;

            m.weights[i] = &m.weights[i] * b1 + &dw * (1.0 - b1);
            v.weights[i] = &v.weights[i] * b2 + dw.component_mul(&dw) * (1.0 - b2);
            m.biases[i] = &m.biases[i] * b1 + &db * (1.0 - b1);
            v.biases[i] = &v.biases[i] * b2 + db.component_mul(&db) * (1.0 - b2);

            *w -= m.weights[i].zip_map(&v.weights[i], |m, v| step * m / (v.sqrt() + eps));
            *b -= m.biases[i].zip_map(&v.biases[i], |m, v| step * m / (v.sqrt() + eps));
        }
    }
}
