// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Contracts for the sub-models the orchestrator trains against.
//!
//! The generator, discriminator, speaker recognizer and ASR model are
//! composed rather than inherited: each exposes its parameters through a tch
//! `VarStore`, an explicit [`Mode`] flag, and a model-specific loss. The
//! speaker and ASR architectures live outside this crate; only their
//! contracts are defined here.

use tch::nn;

use crate::config::PostProcessConfig;
use crate::error::Result;
use crate::tensor::Tensor;

/// Train/eval flag. Only stochastic layers (dropout) read it; gradient flow
/// is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Stochastic layers active.
    #[default]
    Training,
    /// Stochastic layers disabled.
    Evaluation,
}

impl Mode {
    /// Whether stochastic layers should be active.
    pub fn is_training(self) -> bool {
        self == Mode::Training
    }
}

/// A component with trainable parameters and a train/eval flag.
pub trait TrainableModule {
    /// Variable store holding every parameter of the module.
    fn var_store(&self) -> &nn::VarStore;

    /// Current mode.
    fn mode(&self) -> Mode;

    /// Switch mode.
    fn set_mode(&mut self, mode: Mode);

    /// Trainable parameters (shallow handles sharing storage and gradients).
    fn parameters(&self) -> Vec<Tensor> {
        self.var_store()
            .trainable_variables()
            .into_iter()
            .map(Tensor::from_tch)
            .collect()
    }

    /// Reset every accumulated parameter gradient.
    fn zero_grad(&self) {
        for param in self.parameters() {
            param.zero_grad();
        }
    }

    /// Shorthand for `set_mode(Mode::Training)`.
    fn train(&mut self) {
        self.set_mode(Mode::Training);
    }

    /// Shorthand for `set_mode(Mode::Evaluation)`.
    fn eval(&mut self) {
        self.set_mode(Mode::Evaluation);
    }
}

/// Speaker-identity classifier.
pub trait SpeakerRecognizer: TrainableModule {
    /// Returns `(scalar_loss, output)` for a processed mel batch and its
    /// speaker labels.
    fn loss(&self, melspec: &Tensor, speaker_labels: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// Speech recognizer used as a content-preservation signal.
pub trait SpeechRecognizer: TrainableModule {
    /// Returns `(scalar_loss, output)`.
    ///
    /// With `encoder_no_grad == false` gradients flow through the ASR encoder
    /// back into whatever produced `melspec`.
    fn loss(
        &self,
        melspec: &Tensor,
        tokens: &Tensor,
        labels: &Tensor,
        encoder_no_grad: bool,
    ) -> Result<(Tensor, Tensor)>;
}

/// Transformation applied to generated mels before the speaker and ASR models.
pub trait MelPostProcessor {
    /// Process a `(batch, channels, time)` mel batch. Must stay differentiable.
    fn process(&self, melspec: &Tensor) -> Tensor;
}

/// Pass-through post-processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl MelPostProcessor for Identity {
    fn process(&self, melspec: &Tensor) -> Tensor {
        melspec.shallow_clone()
    }
}

/// `ln(max(x, floor))` dynamic range compression.
#[derive(Debug, Clone, Copy)]
pub struct LogCompression {
    /// Lower clamp applied before the log
    pub floor: f64,
}

impl MelPostProcessor for LogCompression {
    fn process(&self, melspec: &Tensor) -> Tensor {
        melspec.clamp_min(self.floor).log()
    }
}

/// Build the post-processor named by the configuration.
pub fn post_processor_from_config(config: PostProcessConfig) -> Box<dyn MelPostProcessor> {
    match config {
        PostProcessConfig::Identity => Box::new(Identity),
        PostProcessConfig::LogCompression { floor } => Box::new(LogCompression { floor }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Device};

    struct Probe {
        vs: nn::VarStore,
        mode: Mode,
    }

    impl TrainableModule for Probe {
        fn var_store(&self) -> &nn::VarStore {
            &self.vs
        }
        fn mode(&self) -> Mode {
            self.mode
        }
        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
        }
    }

    #[test]
    fn test_mode_switching() {
        let mut probe = Probe {
            vs: nn::VarStore::new(tch::Device::Cpu),
            mode: Mode::default(),
        };
        assert!(probe.mode().is_training());
        probe.eval();
        assert_eq!(probe.mode(), Mode::Evaluation);
        probe.train();
        assert_eq!(probe.mode(), Mode::Training);
    }

    #[test]
    fn test_zero_grad_clears_parameters() {
        let probe = Probe {
            vs: nn::VarStore::new(tch::Device::Cpu),
            mode: Mode::Training,
        };
        let w = Tensor::from_tch(probe.vs.root().var("w", &[3], nn::Init::Const(2.0)));
        w.pow_scalar(2.0).mean_all().backward().unwrap();
        assert!(w.grad().unwrap().to_vec_f32().iter().all(|g| *g != 0.0));

        probe.zero_grad();
        let params = probe.parameters();
        assert_eq!(params.len(), 1);
        assert!(params[0].grad().unwrap().to_vec_f32().iter().all(|g| *g == 0.0));
    }

    #[test]
    fn test_post_processors() {
        let mel = Tensor::from_slice_f32(&[0.0, 1.0, std::f32::consts::E]).view(&[1, 1, 3]);

        let identity = post_processor_from_config(PostProcessConfig::Identity);
        assert_eq!(identity.process(&mel).to_vec_f32(), mel.to_vec_f32());

        let log = post_processor_from_config(PostProcessConfig::LogCompression { floor: 1e-5 });
        let out = log.process(&mel).to_vec_f32();
        assert!((out[0] as f64 - 1e-5f64.ln()).abs() < 1e-4);
        assert!(out[1].abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);

        let ones = Tensor::ones(&[2, 80, 4], DType::Float32, Device::Cpu);
        assert_eq!(log.process(&ones).size(), vec![2, 80, 4]);
    }
}
