use nalgebra::DVector;

/// A per-example loss with its gradient w.r.t. the logits.
pub trait Criterion: Sync {
    fn loss_and_grad(&self, logits: &DVector<f32>, target: usize) -> (f32, DVector<f32>);

    fn loss(&self, logits: &DVector<f32>, target: usize) -> f32 {
        self.loss_and_grad(logits, target).0
    }
}

/// Softmax followed by negative log-likelihood.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossEntropyLoss;

impl Criterion for CrossEntropyLoss {
    fn loss_and_grad(&self, logits: &DVector<f32>, target: usize) -> (f32, DVector<f32>) {
        let max = logits.max();
        let exp = logits.map(|v| (v - max).exp());
        let sum = exp.sum();
        let log_sum = sum.ln() + max;

        let mut grad = exp / sum;
        grad[target] -= 1.0;

        (log_sum - logits[target], grad)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn uniform_logits_give_log_classes() {
        let (loss, grad) = CrossEntropyLoss.loss_and_grad(&DVector::from_element(2, 3.0), 0);

        assert_abs_diff_eq!(loss, 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(grad[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn large_logits_stay_finite() {
        let logits = DVector::from_vec(vec![1000.0, -1000.0, 0.0]);

        let (loss, grad) = CrossEntropyLoss.loss_and_grad(&logits, 0);
        assert!(loss.is_finite() && loss >= 0.0);
        assert!(grad.iter().all(|v| v.is_finite()));

        let wrong = CrossEntropyLoss.loss(&logits, 1);
        assert_abs_diff_eq!(wrong, 2000.0, epsilon = 1e-2);
    }
}
