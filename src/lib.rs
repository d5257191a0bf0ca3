// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! # mel_adversary
//!
//! Adversarial training of a mel-spectrogram transformation network.
//!
//! A transformer encoder-decoder [`Generator`] rewrites mel-spectrograms so
//! that a speaker-identity classifier fails while an ASR model still
//! recognises the content. The [`MelGenerator`] orchestrator coordinates:
//!
//! - **Generator**: `(batch, 80, time) -> (batch, 80, time)`, updated through
//!   `asr_loss / speaker_loss + adversarial_loss`
//! - **Discriminator**: real/fake critic with its own Adam optimizer
//! - **Speaker recognizer**: trained separately on generated mels
//! - **ASR model**: frozen content-preservation signal
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::{cell::RefCell, rc::Rc};
//! use mel_adversary::{MelGenerator, TrainingConfig, OneCycleLr};
//! use tch::nn::{self, OptimizerConfig};
//!
//! let config = TrainingConfig::from_file("train.json".as_ref())?;
//! let asr = Rc::new(RefCell::new(my_asr_model));
//! let speaker = Rc::new(RefCell::new(my_speaker_model));
//!
//! let mut trainer = MelGenerator::new(asr, speaker.clone(), &config)?;
//! let opt = nn::adam(0.9, 0.98, 0.0).build(trainer.generator_var_store(), 1e-4)?;
//! trainer.set_gen_optimizer(opt, Box::new(OneCycleLr::new(1e-4, 10_000, 0.3)?));
//! let opt = nn::adam(0.9, 0.98, 0.0).build(speaker.borrow().var_store(), 1e-4)?;
//! trainer.set_spk_optimizer(opt, Box::new(OneCycleLr::new(1e-4, 10_000, 0.3)?));
//!
//! let summary = mel_adversary::training::run_epoch(&mut trainer, batches, &Default::default())?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod discriminator;
pub mod error;
pub mod generator;
pub mod layers;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod tensor;
pub mod trainer;
pub mod training;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::{
    DiscriminatorConfig, GeneratorConfig, PostProcessConfig, SchedulerFloorConfig, TrainingConfig,
};
pub use discriminator::{ConvDiscriminator, Discriminator};
pub use error::{MelGenError, Result};
pub use generator::Generator;
pub use metrics::{reconstruction_mse, BinaryAccuracy, RunningMean};
pub use models::{
    Identity, LogCompression, MelPostProcessor, Mode, SpeakerRecognizer, SpeechRecognizer,
    TrainableModule,
};
pub use scheduler::{
    ExponentialLr, LrScheduler, OneCycleLr, ScheduledOptimizer, SchedulerState, StepLr,
};
pub use tensor::{DType, Device, Tensor};
pub use trainer::{MelGenerator, SharedSpeakerRecognizer, SharedSpeechRecognizer};
pub use training::{run_epoch, validate_epoch, EpochOptions, EpochSummary};
pub use types::{
    DiscriminatorStepOutput, GeneratorStepOutput, MelBatch, SpeakerStepOutput, ValidationOutput,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of mel channels.
pub const DEFAULT_MEL_CHANNELS: i64 = 80;
