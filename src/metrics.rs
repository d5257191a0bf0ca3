// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Detached monitoring quantities: binary accuracy, reconstruction MSE and a
//! running mean for epoch summaries.

use crate::error::{MelGenError, Result};
use crate::tensor::{no_grad, DType, Tensor};

/// Fraction of predictions that match a binary target.
#[derive(Debug, Clone, Copy)]
pub struct BinaryAccuracy {
    /// Probabilities at or above this count as positive (default: 0.5)
    pub threshold: f64,
}

impl Default for BinaryAccuracy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl BinaryAccuracy {
    /// Accuracy of `preds` against `target`, in `[0, 1]`.
    ///
    /// Predictions outside `[0, 1]` are treated as logits and passed through a
    /// sigmoid first.
    pub fn compute(&self, preds: &Tensor, target: &Tensor) -> Result<f64> {
        if preds.size() != target.size() {
            return Err(MelGenError::ShapeMismatch(format!(
                "predictions {:?} vs target {:?}",
                preds.size(),
                target.size()
            )));
        }
        if preds.numel() == 0 {
            return Err(MelGenError::ShapeMismatch(
                "accuracy over an empty batch".to_string(),
            ));
        }

        Ok(no_grad(|| {
            let preds = preds.detach();
            let probs = if preds.min_all().item() < 0.0 || preds.max_all().item() > 1.0 {
                preds.sigmoid()
            } else {
                preds
            };
            let hits = probs
                .ge_scalar(self.threshold)
                .to_dtype(DType::Int64)
                .eq_tensor(&target.to_dtype(DType::Int64));
            hits.to_dtype(DType::Float32).mean_all().item()
        }))
    }
}

/// Mean squared error between two batches, flattened per item, without
/// gradient tracking.
pub fn reconstruction_mse(generated: &Tensor, original: &Tensor) -> Result<f64> {
    if generated.size() != original.size() {
        return Err(MelGenError::ShapeMismatch(format!(
            "generated {:?} vs original {:?}",
            generated.size(),
            original.size()
        )));
    }
    let batch = generated.size().first().copied().unwrap_or(1);
    Ok(no_grad(|| {
        let generated = generated.detach().reshape(&[batch, -1]);
        let original = original.detach().reshape(&[batch, -1]);
        generated.mse_loss(&original).item()
    }))
}

/// Arithmetic mean over a stream of values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    /// Add one observation.
    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Observations so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean so far, `None` before the first observation.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Device;

    #[test]
    fn test_accuracy_on_probabilities() {
        let acc = BinaryAccuracy::default();
        let preds = Tensor::from_slice_f32(&[0.9, 0.2, 0.6, 0.4]);
        let target = Tensor::from_slice_f32(&[1.0, 0.0, 0.0, 0.0]);
        assert!((acc.compute(&preds, &target).unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_on_logits() {
        let acc = BinaryAccuracy::default();
        // sigmoid(3) > 0.5, sigmoid(-2) < 0.5
        let preds = Tensor::from_slice_f32(&[3.0, -2.0]);
        let ones = Tensor::ones(&[2], DType::Float32, Device::Cpu);
        let zeros = Tensor::zeros(&[2], DType::Float32, Device::Cpu);
        assert!((acc.compute(&preds, &ones).unwrap() - 0.5).abs() < 1e-9);

        let averaged =
            (acc.compute(&preds, &zeros).unwrap() + acc.compute(&preds, &ones).unwrap()) / 2.0;
        assert!((0.0..=1.0).contains(&averaged));
    }

    #[test]
    fn test_accuracy_shape_errors() {
        let acc = BinaryAccuracy::default();
        let preds = Tensor::from_slice_f32(&[0.1, 0.2]);
        let target = Tensor::from_slice_f32(&[1.0]);
        assert!(acc.compute(&preds, &target).is_err());
    }

    #[test]
    fn test_reconstruction_mse() {
        let x = Tensor::randn(&[2, 80, 5], Device::Cpu);
        assert!(reconstruction_mse(&x, &x).unwrap().abs() < 1e-12);

        let y = &x + 1.0;
        assert!((reconstruction_mse(&y, &x).unwrap() - 1.0).abs() < 1e-5);
        assert!(reconstruction_mse(&x, &Tensor::randn(&[2, 80, 6], Device::Cpu)).is_err());
    }

    #[test]
    fn test_running_mean() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.mean(), None);
        mean.update(1.0);
        mean.update(2.0);
        assert_eq!(mean.count(), 2);
        assert!((mean.mean().unwrap() - 1.5).abs() < 1e-12);
    }
}
