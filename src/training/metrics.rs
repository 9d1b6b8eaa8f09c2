//! Loss and evaluation metrics

use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use serde::{Deserialize, Serialize};

/// Categorical cross-entropy between logits and one-hot targets, averaged over the batch
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (targets * log_probs).sum_dim(1).mean().neg()
}

/// Whether the true class is among the `k` highest scores of a row
pub fn in_top_k(scores: &[f32], label: usize, k: usize) -> bool {
    let Some(&target) = scores.get(label) else {
        return false;
    };
    let higher = scores.iter().filter(|&&s| s > target).count();
    higher < k
}

/// Final evaluation metrics, written as `metrics.json`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub top_3_accuracy: f64,
}

/// Running totals over the batches of one pass
#[derive(Debug, Clone)]
pub struct MetricAccumulator {
    top_k: usize,
    loss_sum: f64,
    samples: usize,
    correct: usize,
    top_k_correct: usize,
}

impl MetricAccumulator {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            loss_sum: 0.0,
            samples: 0,
            correct: 0,
            top_k_correct: 0,
        }
    }

    /// Add one batch given its mean loss, flattened `[n, num_classes]` scores and labels
    pub fn update(&mut self, batch_loss: f64, scores: &[f32], num_classes: usize, labels: &[usize]) {
        let n = labels.len();
        self.loss_sum += batch_loss * n as f64;
        self.samples += n;

        for (row, &label) in scores.chunks(num_classes).zip(labels.iter()) {
            if in_top_k(row, label, 1) {
                self.correct += 1;
            }
            if in_top_k(row, label, self.top_k) {
                self.top_k_correct += 1;
            }
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Sample-weighted mean loss
    pub fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.samples)
    }

    pub fn top_k_accuracy(&self) -> f64 {
        ratio(self.top_k_correct, self.samples)
    }

    pub fn finish(&self) -> EvalMetrics {
        EvalMetrics {
            loss: self.loss(),
            accuracy: self.accuracy(),
            top_3_accuracy: self.top_k_accuracy(),
        }
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<DefaultBackend, 2>::zeros([2, 4], &device);
        let targets = Tensor::<DefaultBackend, 2>::from_floats(
            [[1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
            &device,
        );

        let loss: f32 = categorical_cross_entropy(logits, targets).into_scalar();
        assert!((loss - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_confident_prediction() {
        let device = Default::default();
        let logits = Tensor::<DefaultBackend, 2>::from_floats([[10.0, 0.0, 0.0]], &device);
        let targets = Tensor::<DefaultBackend, 2>::from_floats([[1.0, 0.0, 0.0]], &device);

        let loss: f32 = categorical_cross_entropy(logits, targets).into_scalar();
        assert!(loss < 1e-3);
    }

    #[test]
    fn test_in_top_k() {
        let scores = [0.1, 0.5, 0.3, 0.05, 0.05];
        assert!(in_top_k(&scores, 1, 1));
        assert!(!in_top_k(&scores, 2, 1));
        assert!(in_top_k(&scores, 2, 2));
        assert!(in_top_k(&scores, 0, 3));
        assert!(!in_top_k(&scores, 3, 3));
        assert!(!in_top_k(&scores, 9, 3));
    }

    #[test]
    fn test_accumulator() {
        let mut acc = MetricAccumulator::new(3);
        // Two samples, 4 classes: first correct, second only in top-3
        let scores = [0.7, 0.1, 0.1, 0.1, 0.4, 0.3, 0.2, 0.1];
        acc.update(0.5, &scores, 4, &[0, 2]);
        acc.update(1.0, &[0.1, 0.2, 0.3, 0.4], 4, &[0]);

        assert_eq!(acc.samples(), 3);
        assert!((acc.loss() - (0.5 * 2.0 + 1.0) / 3.0).abs() < 1e-12);
        assert!((acc.accuracy() - 1.0 / 3.0).abs() < 1e-12);
        assert!((acc.top_k_accuracy() - 2.0 / 3.0).abs() < 1e-12);

        let metrics = acc.finish();
        assert_eq!(metrics.accuracy, acc.accuracy());
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = MetricAccumulator::new(3);
        assert_eq!(acc.finish(), EvalMetrics { loss: 0.0, accuracy: 0.0, top_3_accuracy: 0.0 });
    }
}
