// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Common types returned by the training steps.
//!
//! Loss terms are plain `f64` scalars; model outputs are detached tensors so
//! holding on to a step result never keeps the autograd graph alive.

use crate::tensor::Tensor;

/// One training batch as consumed by the epoch driver.
#[derive(Debug, Clone)]
pub struct MelBatch {
    /// Mel-spectrograms, shape `(batch, channels, time)`.
    pub mels: Tensor,

    /// ASR decoder input tokens.
    pub tokens: Tensor,

    /// ASR target labels.
    pub labels: Tensor,

    /// Speaker identity labels.
    pub speaker_labels: Tensor,
}

impl MelBatch {
    /// Bundle the four tensors of one batch.
    pub fn new(mels: Tensor, tokens: Tensor, labels: Tensor, speaker_labels: Tensor) -> Self {
        Self {
            mels,
            tokens,
            labels,
            speaker_labels,
        }
    }

    /// Items in the batch.
    pub fn batch_size(&self) -> i64 {
        self.mels.size().first().copied().unwrap_or(0)
    }
}

/// Result of the discriminator's own optimizer cycle.
#[derive(Debug, Clone, Copy)]
pub struct DiscriminatorStepOutput {
    /// Real loss plus fake loss.
    pub loss: f64,

    /// Mean of the real and fake binary accuracies.
    pub accuracy: f64,
}

/// Result of one generator update.
#[derive(Debug, Clone)]
pub struct GeneratorStepOutput {
    /// `asr_loss / speaker_loss + adversarial_loss`.
    pub total_loss: f64,

    /// Speaker-recognizer output on the generated batch.
    pub speaker_output: Tensor,

    /// ASR output on the generated batch.
    pub asr_output: Tensor,

    /// Reconstruction MSE between generated and input mels.
    pub mse: f64,

    /// Speaker-recognition loss.
    pub speaker_loss: f64,

    /// ASR loss.
    pub asr_loss: f64,

    /// Discriminator loss on fakes labelled as real.
    pub adversarial_loss: f64,

    /// Discriminator accuracy from the sub-step.
    pub discriminator_accuracy: f64,

    /// Discriminator loss from the sub-step.
    pub discriminator_loss: f64,
}

impl GeneratorStepOutput {
    /// Whether every loss term is finite.
    pub fn is_finite(&self) -> bool {
        [
            self.total_loss,
            self.speaker_loss,
            self.asr_loss,
            self.adversarial_loss,
            self.discriminator_loss,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Result of one speaker-recognizer update.
#[derive(Debug, Clone)]
pub struct SpeakerStepOutput {
    /// Speaker-recognition loss.
    pub loss: f64,

    /// Speaker-recognizer output.
    pub output: Tensor,
}

/// Result of a gradient-free generator evaluation.
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    /// `asr_loss + speaker_loss`.
    pub loss: f64,

    /// Speaker-recognizer output on the generated batch.
    pub speaker_output: Tensor,

    /// ASR output on the generated batch.
    pub asr_output: Tensor,

    /// Reconstruction MSE between generated and input mels.
    pub mse: f64,

    /// Speaker-recognition loss.
    pub speaker_loss: f64,

    /// ASR loss.
    pub asr_loss: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Device};

    #[test]
    fn test_batch_size() {
        let batch = MelBatch::new(
            Tensor::zeros(&[3, 80, 10], DType::Float32, Device::Cpu),
            Tensor::zeros(&[3, 5], DType::Int64, Device::Cpu),
            Tensor::zeros(&[3, 5], DType::Int64, Device::Cpu),
            Tensor::zeros(&[3], DType::Int64, Device::Cpu),
        );
        assert_eq!(batch.batch_size(), 3);
    }

    #[test]
    fn test_generator_output_finiteness() {
        let empty = Tensor::zeros(&[1], DType::Float32, Device::Cpu);
        let mut output = GeneratorStepOutput {
            total_loss: 1.0,
            speaker_output: empty.clone(),
            asr_output: empty,
            mse: 0.0,
            speaker_loss: 1.0,
            asr_loss: 1.0,
            adversarial_loss: 0.0,
            discriminator_accuracy: 0.5,
            discriminator_loss: 1.4,
        };
        assert!(output.is_finite());
        output.total_loss = f64::INFINITY;
        assert!(!output.is_finite());
    }
}
