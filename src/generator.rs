// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Transformer encoder-decoder that rewrites a mel-spectrogram in place.
//!
//! Mel channels act as the model dimension and time steps as the sequence.
//! The encoder builds a contextual memory; the decoder reconstructs from the
//! untouched input (full target, no causal mask) while cross-attending to
//! that memory; a per-frame linear layer projects back to mel channels.

use tch::nn;

use crate::config::GeneratorConfig;
use crate::error::{MelGenError, Result};
use crate::layers::{
    LayerDims, Linear, RotaryEmbedding, TransformerDecoderLayer, TransformerEncoderLayer,
};
use crate::models::{Mode, TrainableModule};
use crate::tensor::{Device, Tensor};

/// Mel-spectrogram generator: `(batch, channels, time) -> (batch, channels, time)`.
pub struct Generator {
    vs: nn::VarStore,
    encoder: Vec<TransformerEncoderLayer>,
    decoder: Vec<TransformerDecoderLayer>,
    linear: Linear,
    rotary_emb: RotaryEmbedding,
    config: GeneratorConfig,
    mode: Mode,
}

impl Generator {
    /// Build a freshly initialised generator on `device`.
    pub fn new(config: &GeneratorConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let vs = nn::VarStore::new(device.into());
        let root = vs.root();
        let dims = LayerDims {
            hidden_size: config.in_channels,
            num_heads: config.num_heads,
            feedforward_dim: config.feedforward_dim,
            dropout: config.dropout,
            layer_norm_eps: config.layer_norm_eps,
        };

        let encoder = (0..config.num_encoder_layers)
            .map(|i| TransformerEncoderLayer::new(&(&root / "encoder" / i), dims))
            .collect();
        let decoder = (0..config.num_decoder_layers)
            .map(|i| TransformerDecoderLayer::new(&(&root / "decoder" / i), dims))
            .collect();
        let linear = Linear::new(&(&root / "linear"), config.in_channels, config.out_channels);
        let rotary_emb = RotaryEmbedding::new(
            config.head_dim(),
            config.max_length,
            config.rope_theta,
            device,
        );

        tracing::info!(
            "Generator: {} encoder / {} decoder layers, d_model={}, heads={}, max_length={}",
            config.num_encoder_layers,
            config.num_decoder_layers,
            config.in_channels,
            config.num_heads,
            config.max_length
        );

        Ok(Self {
            vs,
            encoder,
            decoder,
            linear,
            rotary_emb,
            config: config.clone(),
            mode: Mode::Training,
        })
    }

    /// Architecture this generator was built with.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Check a mel batch against the shape contract.
    pub fn check_input(&self, x: &Tensor) -> Result<()> {
        let size = x.size();
        if size.len() != 3 {
            return Err(MelGenError::ShapeMismatch(format!(
                "expected (batch, channels, time), got {:?}",
                size
            )));
        }
        if size[0] == 0 || size[2] == 0 {
            return Err(MelGenError::ShapeMismatch(format!(
                "empty batch or time axis: {:?}",
                size
            )));
        }
        if size[1] != self.config.in_channels {
            return Err(MelGenError::ShapeMismatch(format!(
                "expected {} mel channels, got {}",
                self.config.in_channels, size[1]
            )));
        }
        if size[2] > self.rotary_emb.capacity() {
            return Err(MelGenError::SequenceTooLong {
                length: size[2],
                max_length: self.rotary_emb.capacity(),
            });
        }
        Ok(())
    }

    /// Generate a transformed mel batch of the same shape as `x`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.check_input(x)?;
        let train = self.mode.is_training();

        // b c t -> b t c
        let tgt = x.transpose(1, 2);

        let mut memory = tgt.shallow_clone();
        for layer in &self.encoder {
            memory = layer.forward_t(&memory, &self.rotary_emb, train)?;
        }

        let mut decoded = tgt.shallow_clone();
        for layer in &self.decoder {
            decoded = layer.forward_t(&decoded, &memory, &self.rotary_emb, train)?;
        }

        // b t c -> b c t
        let output = self.linear.forward(&decoded).transpose(1, 2);

        if output.size() != x.size() {
            return Err(MelGenError::ShapeMismatch(format!(
                "generator produced {:?} for input {:?}",
                output.size(),
                x.size()
            )));
        }
        Ok(output)
    }
}

impl TrainableModule for Generator {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig {
            feedforward_dim: 64,
            max_length: 128,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_shape_invariance() {
        let generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        for &(batch, time) in &[(1, 1), (2, 17), (4, 100), (3, 128)] {
            let x = Tensor::randn(&[batch, 80, time], Device::Cpu);
            let y = generator.forward(&x).unwrap();
            assert_eq!(y.size(), vec![batch, 80, time]);
        }
    }

    #[test]
    fn test_default_architecture_shape() {
        let generator = Generator::new(&GeneratorConfig::default(), Device::Cpu).unwrap();
        let x = Tensor::randn(&[4, 80, 100], Device::Cpu);
        assert_eq!(generator.forward(&x).unwrap().size(), vec![4, 80, 100]);
    }

    #[test]
    fn test_sequence_too_long() {
        let generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        let x = Tensor::randn(&[1, 80, 129], Device::Cpu);
        match generator.forward(&x) {
            Err(MelGenError::SequenceTooLong { length, max_length }) => {
                assert_eq!(length, 129);
                assert_eq!(max_length, 128);
            }
            other => panic!("expected SequenceTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_channels_and_rank() {
        let generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        let x = Tensor::randn(&[2, 64, 10], Device::Cpu);
        assert!(matches!(
            generator.forward(&x),
            Err(MelGenError::ShapeMismatch(_))
        ));
        let x = Tensor::randn(&[80, 10], Device::Cpu);
        assert!(matches!(
            generator.forward(&x),
            Err(MelGenError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_encoder_and_decoder_weights_are_separate() {
        let generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        let vars = generator.var_store().variables();
        assert!(vars.keys().any(|k| k.starts_with("encoder.0.self_attn")));
        assert!(vars.keys().any(|k| k.starts_with("decoder.0.cross_attn")));
        assert!(vars.contains_key("linear.weight"));
        assert!(!generator.parameters().is_empty());
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let mut generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        generator.eval();
        let x = Tensor::randn(&[2, 80, 12], Device::Cpu);
        let a = generator.forward(&x).unwrap();
        let b = generator.forward(&x).unwrap();
        assert!((&a - &b).pow_scalar(2.0).mean_all().item() < 1e-12);
    }

    #[test]
    fn test_gradients_reach_generator() {
        let generator = Generator::new(&small_config(), Device::Cpu).unwrap();
        let x = Tensor::randn(&[2, 80, 8], Device::Cpu);
        generator.forward(&x).unwrap().mean_all().backward().unwrap();
        assert!(generator.parameters().iter().any(|p| p.grad().is_some()));
    }
}
