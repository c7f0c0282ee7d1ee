use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, Rng};

use super::Mode;

/// Uniform init in +-1/sqrt(fan_in), shared by weights and biases.
fn init_uniform(rng: &mut StdRng, rows: usize, cols: usize, fan_in: usize) -> DMatrix<f32> {
    let limit = (1.0 / fan_in as f32).sqrt();

    DMatrix::from_fn(rows, cols, |_, _| rng.gen::<f32>() * 2.0 * limit - limit)
}

/// Valid 2-D convolution with stride 1, computed as a matrix product over im2col patches.
#[derive(Clone, Debug)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub in_height: usize,
    pub in_width: usize,
    /// `out_channels x (in_channels * kernel * kernel)`
    pub weight: DMatrix<f32>,
    pub bias: DVector<f32>,
}

impl Conv2d {
    pub fn new(
        rng: &mut StdRng,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        (in_height, in_width): (usize, usize),
    ) -> Self {
        let fan_in = in_channels * kernel * kernel;
        let weight = init_uniform(rng, out_channels, fan_in, fan_in);
        let bias = init_uniform(rng, out_channels, 1, fan_in).column(0).clone_owned();

        Self {
            in_channels,
            out_channels,
            kernel,
            in_height,
            in_width,
            weight,
            bias,
        }
    }

    pub fn out_height(&self) -> usize {
        self.in_height - self.kernel + 1
    }

    pub fn out_width(&self) -> usize {
        self.in_width - self.kernel + 1
    }

    pub fn output_len(&self) -> usize {
        self.out_channels * self.out_height() * self.out_width()
    }

    fn patch_row(&self, c: usize, ky: usize, kx: usize) -> usize {
        (c * self.kernel + ky) * self.kernel + kx
    }

    fn im2col(&self, input: &DVector<f32>) -> DMatrix<f32> {
        let (oh, ow) = (self.out_height(), self.out_width());
        let plane = self.in_height * self.in_width;
        let mut cols = DMatrix::zeros(self.weight.ncols(), oh * ow);

        for c in 0..self.in_channels {
            for ky in 0..self.kernel {
                for kx in 0..self.kernel {
                    let row = self.patch_row(c, ky, kx);

                    for oy in 0..oh {
                        for ox in 0..ow {
                            cols[(row, oy * ow + ox)] =
                                input[c * plane + (oy + ky) * self.in_width + ox + kx];
                        }
                    }
                }
            }
        }

        cols
    }

    fn col2im(&self, cols: &DMatrix<f32>) -> DVector<f32> {
        let (oh, ow) = (self.out_height(), self.out_width());
        let plane = self.in_height * self.in_width;
        let mut grad = DVector::zeros(self.in_channels * plane);

        for c in 0..self.in_channels {
            for ky in 0..self.kernel {
                for kx in 0..self.kernel {
                    let row = self.patch_row(c, ky, kx);

                    for oy in 0..oh {
                        for ox in 0..ow {
                            grad[c * plane + (oy + ky) * self.in_width + ox + kx] +=
                                cols[(row, oy * ow + ox)];
                        }
                    }
                }
            }
        }

        grad
    }

    fn forward(&self, input: &DVector<f32>) -> (DVector<f32>, DMatrix<f32>) {
        let cols = self.im2col(input);
        let mut out = &self.weight * &cols;

        for (mut row, &b) in out.row_iter_mut().zip(self.bias.iter()) {
            row.add_scalar_mut(b);
        }

        // Channel-major flattening is the row-major order of `out`.
        let flat = DVector::from_column_slice(out.transpose().as_slice());

        (flat, cols)
    }

    fn backward(
        &self,
        cols: &DMatrix<f32>,
        grad: &DVector<f32>,
    ) -> (DVector<f32>, DMatrix<f32>, DVector<f32>) {
        let positions = cols.ncols();
        let grad = DMatrix::from_row_slice(self.out_channels, positions, grad.as_slice());

        let nabla_w = &grad * cols.transpose();
        let nabla_b = grad.column_sum();
        let grad_in = self.col2im(&(self.weight.transpose() * &grad));

        (grad_in, nabla_w, nabla_b)
    }
}

/// Fully connected layer, `weight` is `out x in`.
#[derive(Clone, Debug)]
pub struct Linear {
    pub weight: DMatrix<f32>,
    pub bias: DVector<f32>,
}

impl Linear {
    pub fn new(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Self {
        Self {
            weight: init_uniform(rng, fan_out, fan_in, fan_in),
            bias: init_uniform(rng, fan_out, 1, fan_in).column(0).clone_owned(),
        }
    }
}

/// 2x2 max pooling with stride 2; odd trailing rows/columns are dropped.
#[derive(Clone, Copy, Debug)]
pub struct MaxPool2d {
    pub channels: usize,
    pub in_height: usize,
    pub in_width: usize,
}

impl MaxPool2d {
    pub fn output_len(&self) -> usize {
        self.channels * (self.in_height / 2) * (self.in_width / 2)
    }

    fn forward(&self, input: &DVector<f32>) -> (DVector<f32>, Vec<usize>) {
        let (oh, ow) = (self.in_height / 2, self.in_width / 2);
        let plane = self.in_height * self.in_width;
        let mut out = DVector::zeros(self.output_len());
        let mut argmax = Vec::with_capacity(out.len());

        for c in 0..self.channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = c * plane + 2 * oy * self.in_width + 2 * ox;

                    for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                        let idx = c * plane + (2 * oy + dy) * self.in_width + 2 * ox + dx;
                        if input[idx] > input[best] {
                            best = idx;
                        }
                    }

                    out[(c * oh + oy) * ow + ox] = input[best];
                    argmax.push(best);
                }
            }
        }

        (out, argmax)
    }
}

#[derive(Clone, Debug)]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Linear(Linear),
    Relu,
    /// Drop probability; inverted scaling so eval mode is the identity.
    Dropout(f32),
}

/// What a layer keeps from its forward pass for the backward pass.
#[derive(Clone, Debug)]
pub enum Cache {
    Conv2d(DMatrix<f32>),
    MaxPool2d { argmax: Vec<usize>, input_len: usize },
    Linear(DVector<f32>),
    Relu(DVector<f32>),
    Dropout(Option<DVector<f32>>),
}

/// Parameter gradients of a single parametric layer.
pub type Nabla = (DMatrix<f32>, DVector<f32>);

impl Layer {
    pub fn forward(&self, input: DVector<f32>, mode: Mode, rng: &mut StdRng) -> (DVector<f32>, Cache) {
        match self {
            Self::Conv2d(conv) => {
                let (out, cols) = conv.forward(&input);
                (out, Cache::Conv2d(cols))
            }
            Self::MaxPool2d(pool) => {
                let (out, argmax) = pool.forward(&input);
                let input_len = input.len();
                (out, Cache::MaxPool2d { argmax, input_len })
            }
            Self::Linear(linear) => (&linear.weight * &input + &linear.bias, Cache::Linear(input)),
            Self::Relu => {
                let mask = input.map(|v| if v > 0.0 { 1.0 } else { 0.0 });
                (input.component_mul(&mask), Cache::Relu(mask))
            }
            Self::Dropout(p) => {
                if mode == Mode::Eval || *p <= 0.0 {
                    return (input, Cache::Dropout(None));
                }

                let keep = 1.0 - p;
                let mask = DVector::from_fn(input.len(), |_, _| {
                    if keep > 0.0 && rng.gen::<f32>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });

                (input.component_mul(&mask), Cache::Dropout(Some(mask)))
            }
        }
    }

    /// Returns the gradient w.r.t. the layer input and, for parametric layers, the parameter gradients.
    pub fn backward(&self, cache: &Cache, grad: DVector<f32>) -> (DVector<f32>, Option<Nabla>) {
        match (self, cache) {
            (Self::Conv2d(conv), Cache::Conv2d(cols)) => {
                let (grad_in, nw, nb) = conv.backward(cols, &grad);
                (grad_in, Some((nw, nb)))
            }
            (Self::MaxPool2d(_), Cache::MaxPool2d { argmax, input_len }) => {
                let mut grad_in = DVector::zeros(*input_len);
                for (&src, g) in argmax.iter().zip(grad.iter()) {
                    grad_in[src] += g;
                }
                (grad_in, None)
            }
            (Self::Linear(linear), Cache::Linear(input)) => {
                let nw = &grad * input.transpose();
                let grad_in = linear.weight.transpose() * &grad;
                (grad_in, Some((nw, grad)))
            }
            (Self::Relu, Cache::Relu(mask)) => (grad.component_mul(mask), None),
            (Self::Dropout(_), Cache::Dropout(mask)) => match mask {
                Some(mask) => (grad.component_mul(mask), None),
                None => (grad, None),
            },
            _ => unreachable!("cache does not belong to this layer"),
        }
    }

    pub fn parameters_mut(&mut self) -> Option<(&mut DMatrix<f32>, &mut DVector<f32>)> {
        match self {
            Self::Conv2d(conv) => Some((&mut conv.weight, &mut conv.bias)),
            Self::Linear(linear) => Some((&mut linear.weight, &mut linear.bias)),
            _ => None,
        }
    }

    pub fn parameter_shapes(&self) -> Option<((usize, usize), usize)> {
        match self {
            Self::Conv2d(conv) => Some((conv.weight.shape(), conv.bias.len())),
            Self::Linear(linear) => Some((linear.weight.shape(), linear.bias.len())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    use super::*;

    fn loss_of(layer: &Layer, input: &DVector<f32>, probe: &DVector<f32>) -> f32 {
        let mut rng = StdRng::seed_from_u64(0);
        let (out, _) = layer.forward(input.clone(), Mode::Eval, &mut rng);
        out.dot(probe)
    }

    /// Compares analytic gradients of `sum(probe * layer(input))` against central differences.
    fn check_gradients(mut layer: Layer, input_len: usize) {
        let mut rng = StdRng::seed_from_u64(9);
        let input = DVector::from_fn(input_len, |_, _| rng.gen::<f32>() - 0.5);
        let (out, cache) = layer.forward(input.clone(), Mode::Eval, &mut rng);
        let probe = DVector::from_fn(out.len(), |_, _| rng.gen::<f32>() - 0.5);

        let (grad_in, nabla) = layer.backward(&cache, probe.clone());
        let eps = 1e-2;

        for i in (0..input_len).step_by(7) {
            let mut plus = input.clone();
            let mut minus = input.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (loss_of(&layer, &plus, &probe) - loss_of(&layer, &minus, &probe)) / (2.0 * eps);
            assert_abs_diff_eq!(grad_in[i], numeric, epsilon = 1e-2);
        }

        let (nw, nb) = nabla.unwrap();
        for i in (0..nw.len()).step_by(5) {
            let original = layer.parameters_mut().unwrap().0[i];
            layer.parameters_mut().unwrap().0[i] = original + eps;
            let up = loss_of(&layer, &input, &probe);
            layer.parameters_mut().unwrap().0[i] = original - eps;
            let down = loss_of(&layer, &input, &probe);
            layer.parameters_mut().unwrap().0[i] = original;

            assert_abs_diff_eq!(nw[i], (up - down) / (2.0 * eps), epsilon = 1e-2);
        }

        for i in 0..nb.len() {
            let original = layer.parameters_mut().unwrap().1[i];
            layer.parameters_mut().unwrap().1[i] = original + eps;
            let up = loss_of(&layer, &input, &probe);
            layer.parameters_mut().unwrap().1[i] = original - eps;
            let down = loss_of(&layer, &input, &probe);
            layer.parameters_mut().unwrap().1[i] = original;

            assert_abs_diff_eq!(nb[i], (up - down) / (2.0 * eps), epsilon = 1e-2);
        }
    }

    #[test]
    fn linear_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(1);
        check_gradients(Layer::Linear(Linear::new(&mut rng, 12, 5)), 12);
    }

    #[test]
    fn conv_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(2);
        let conv = Conv2d::new(&mut rng, 2, 3, 3, (6, 5));
        check_gradients(Layer::Conv2d(conv), 2 * 6 * 5);
    }

    #[test]
    fn conv_output_shape_and_bias() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut conv = Conv2d::new(&mut rng, 1, 4, 3, (14, 14));
        conv.weight.fill(0.0);
        conv.bias = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);

        let (out, _) = conv.forward(&DVector::zeros(196));

        assert_eq!(out.len(), conv.output_len());
        assert_eq!(out.len(), 4 * 12 * 12);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[144], 2.0);
        assert_eq!(out[3 * 144 + 143], 4.0);
    }

    #[test]
    fn max_pool_routes_gradient_to_the_maximum() {
        let pool = Layer::MaxPool2d(MaxPool2d {
            channels: 1,
            in_height: 2,
            in_width: 2,
        });
        let mut rng = StdRng::seed_from_u64(0);
        let (out, cache) = pool.forward(
            DVector::from_vec(vec![0.1, 0.7, 0.3, 0.2]),
            Mode::Train,
            &mut rng,
        );

        assert_eq!(out.as_slice(), &[0.7]);

        let (grad, nabla) = pool.backward(&cache, DVector::from_vec(vec![2.0]));
        assert_eq!(grad.as_slice(), &[0.0, 2.0, 0.0, 0.0]);
        assert!(nabla.is_none());
    }

    #[test]
    fn dropout_is_identity_in_eval_and_scales_in_train() {
        let layer = Layer::Dropout(0.5);
        let mut rng = StdRng::seed_from_u64(4);
        let input = DVector::from_element(1000, 1.0);

        let (eval, _) = layer.forward(input.clone(), Mode::Eval, &mut rng);
        assert_eq!(eval, input);

        let (train, _) = layer.forward(input, Mode::Train, &mut rng);
        assert!(train.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let kept = train.iter().filter(|&&v| v > 0.0).count();
        assert!((400..600).contains(&kept));
    }

    #[test]
    fn full_dropout_zeroes_everything() {
        let layer = Layer::Dropout(1.0);
        let mut rng = StdRng::seed_from_u64(4);

        let (out, _) = layer.forward(DVector::from_element(10, 3.0), Mode::Train, &mut rng);

        assert!(out.iter().all(|&v| v == 0.0));
    }
}
