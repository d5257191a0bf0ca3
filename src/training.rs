// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Epoch driver over externally supplied batches.
//!
//! Batches come from the caller (dataset loading and collation live outside
//! this crate). A step error aborts the epoch; non-finite losses are logged
//! and counted, leaving skip/abort policy to the caller.

use serde::{Deserialize, Serialize};

use crate::discriminator::Discriminator;
use crate::error::{MelGenError, Result};
use crate::metrics::RunningMean;
use crate::trainer::MelGenerator;
use crate::types::MelBatch;

/// Epoch loop settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochOptions {
    /// Run a speaker-recognizer step before every n-th generator step;
    /// 0 disables speaker updates (default: 1)
    #[serde(default = "default_speaker_every")]
    pub speaker_every: usize,

    /// Log progress every n steps (default: 10)
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

fn default_speaker_every() -> usize {
    1
}
fn default_log_every() -> usize {
    10
}

impl Default for EpochOptions {
    fn default() -> Self {
        Self {
            speaker_every: default_speaker_every(),
            log_every: default_log_every(),
        }
    }
}

/// Mean losses over one pass through the batches.
#[derive(Debug, Clone, Default)]
pub struct EpochSummary {
    /// Generator total loss (validation: `asr + speaker`)
    pub total_loss: RunningMean,
    /// Speaker loss seen by the generator
    pub speaker_loss: RunningMean,
    /// Speaker loss from the recognizer's own updates
    pub speaker_train_loss: RunningMean,
    /// ASR loss
    pub asr_loss: RunningMean,
    /// Reconstruction MSE
    pub mse: RunningMean,
    /// Discriminator accuracy
    pub discriminator_accuracy: RunningMean,
    /// Steps with at least one non-finite loss
    pub non_finite_steps: usize,
    /// Batches processed
    pub steps: usize,
}

impl EpochSummary {
    fn log(&self, phase: &str) {
        tracing::info!(
            "{} step {}: total={:.4}, spk={:.4}, asr={:.4}, mse={:.4}, d_acc={:.3}",
            phase,
            self.steps,
            self.total_loss.mean().unwrap_or(f64::NAN),
            self.speaker_loss.mean().unwrap_or(f64::NAN),
            self.asr_loss.mean().unwrap_or(f64::NAN),
            self.mse.mean().unwrap_or(f64::NAN),
            self.discriminator_accuracy.mean().unwrap_or(f64::NAN),
        );
    }
}

/// Train over `batches`: an optional speaker-recognizer step followed by a
/// generator step for each batch.
pub fn run_epoch<D, I>(
    trainer: &mut MelGenerator<D>,
    batches: I,
    options: &EpochOptions,
) -> Result<EpochSummary>
where
    D: Discriminator,
    I: IntoIterator<Item = MelBatch>,
{
    if options.log_every == 0 {
        return Err(MelGenError::Config("log_every must be positive".into()));
    }

    let mut summary = EpochSummary::default();
    for (index, batch) in batches.into_iter().enumerate() {
        if options.speaker_every > 0 && index % options.speaker_every == 0 {
            let spk = trainer.train_speaker_recognizer(&batch.mels, &batch.speaker_labels)?;
            if !spk.loss.is_finite() {
                tracing::warn!("step {}: speaker recognizer loss is {}", index, spk.loss);
            }
            summary.speaker_train_loss.update(spk.loss);
        }

        let out = trainer.train_generator(
            &batch.mels,
            &batch.tokens,
            &batch.labels,
            &batch.speaker_labels,
        )?;
        if !out.is_finite() {
            tracing::warn!(
                "step {}: non-finite generator loss (total={}, asr={}, spk={}, adv={})",
                index,
                out.total_loss,
                out.asr_loss,
                out.speaker_loss,
                out.adversarial_loss
            );
            summary.non_finite_steps += 1;
        }

        summary.total_loss.update(out.total_loss);
        summary.speaker_loss.update(out.speaker_loss);
        summary.asr_loss.update(out.asr_loss);
        summary.mse.update(out.mse);
        summary.discriminator_accuracy.update(out.discriminator_accuracy);
        summary.steps += 1;

        if summary.steps % options.log_every == 0 {
            summary.log("train");
        }
    }

    tracing::info!("epoch finished after {} steps", summary.steps);
    Ok(summary)
}

/// Evaluate the generator on `batches` without updating any weights.
pub fn validate_epoch<D, I>(trainer: &mut MelGenerator<D>, batches: I) -> Result<EpochSummary>
where
    D: Discriminator,
    I: IntoIterator<Item = MelBatch>,
{
    let mut summary = EpochSummary::default();
    for batch in batches {
        let out = trainer.validate_generator(
            &batch.mels,
            &batch.tokens,
            &batch.labels,
            &batch.speaker_labels,
        )?;
        if !out.loss.is_finite() {
            tracing::warn!("validation step {}: loss is {}", summary.steps, out.loss);
            summary.non_finite_steps += 1;
        }
        summary.total_loss.update(out.loss);
        summary.speaker_loss.update(out.speaker_loss);
        summary.asr_loss.update(out.asr_loss);
        summary.mse.update(out.mse);
        summary.steps += 1;
    }
    summary.log("validation");
    Ok(summary)
}
