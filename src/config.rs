// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Configuration structs for the adversarial mel generator.
//!
//! All settings are plain data passed explicitly into each component at
//! construction time. Every field carries a serde default so a partial JSON
//! file only needs to name what it overrides.

use serde::{Deserialize, Serialize};

use crate::error::{MelGenError, Result};
use crate::tensor::Device;

/// Configuration for the transformer encoder-decoder generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Mel channels of the input, also the transformer model dimension (default: 80)
    #[serde(default = "default_mel_channels")]
    pub in_channels: i64,

    /// Mel channels produced by the output projection (default: 80)
    #[serde(default = "default_mel_channels")]
    pub out_channels: i64,

    /// Positional capacity in time steps (default: 3000)
    #[serde(default = "default_max_length")]
    pub max_length: i64,

    /// Attention heads per layer (default: 2)
    #[serde(default = "default_num_heads")]
    pub num_heads: i64,

    /// Encoder layers (default: 2)
    #[serde(default = "default_num_layers")]
    pub num_encoder_layers: usize,

    /// Decoder layers (default: 2)
    #[serde(default = "default_num_layers")]
    pub num_decoder_layers: usize,

    /// Hidden size of the position-wise feed-forward block (default: 2048)
    #[serde(default = "default_feedforward_dim")]
    pub feedforward_dim: i64,

    /// Dropout probability used in training mode (default: 0.1)
    #[serde(default = "default_dropout")]
    pub dropout: f64,

    /// LayerNorm epsilon (default: 1e-5)
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Base of the rotary position table (default: 10000)
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
}

fn default_mel_channels() -> i64 {
    80
}
fn default_max_length() -> i64 {
    3000
}
fn default_num_heads() -> i64 {
    2
}
fn default_num_layers() -> usize {
    2
}
fn default_feedforward_dim() -> i64 {
    2048
}
fn default_dropout() -> f64 {
    0.1
}
fn default_layer_norm_eps() -> f64 {
    1e-5
}
fn default_rope_theta() -> f64 {
    10000.0
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            in_channels: default_mel_channels(),
            out_channels: default_mel_channels(),
            max_length: default_max_length(),
            num_heads: default_num_heads(),
            num_encoder_layers: default_num_layers(),
            num_decoder_layers: default_num_layers(),
            feedforward_dim: default_feedforward_dim(),
            dropout: default_dropout(),
            layer_norm_eps: default_layer_norm_eps(),
            rope_theta: default_rope_theta(),
        }
    }
}

impl GeneratorConfig {
    /// Attention head dimension.
    pub fn head_dim(&self) -> i64 {
        self.in_channels / self.num_heads
    }

    /// Check the shape contract before any weights are allocated.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels <= 0 || self.max_length <= 0 || self.num_heads <= 0 {
            return Err(MelGenError::Config(format!(
                "in_channels ({}), max_length ({}) and num_heads ({}) must be positive",
                self.in_channels, self.max_length, self.num_heads
            )));
        }
        // Output must have the input's shape
        if self.out_channels != self.in_channels {
            return Err(MelGenError::Config(format!(
                "out_channels ({}) must equal in_channels ({})",
                self.out_channels, self.in_channels
            )));
        }
        if self.in_channels % self.num_heads != 0 {
            return Err(MelGenError::Config(format!(
                "in_channels ({}) is not divisible by num_heads ({})",
                self.in_channels, self.num_heads
            )));
        }
        // Rotary embedding rotates pairs of features
        if self.head_dim() % 2 != 0 {
            return Err(MelGenError::Config(format!(
                "head dimension {} must be even",
                self.head_dim()
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(MelGenError::Config(format!(
                "dropout {} must lie in [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Configuration for the convolutional discriminator and its optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Adam learning rate (default: 2e-4)
    #[serde(default = "default_disc_lr")]
    pub learning_rate: f64,

    /// Adam beta1 (default: 0.5)
    #[serde(default = "default_disc_beta1")]
    pub beta1: f64,

    /// Adam beta2 (default: 0.999)
    #[serde(default = "default_disc_beta2")]
    pub beta2: f64,

    /// Output channels of each convolution (default: [128, 256, 256])
    #[serde(default = "default_disc_hidden_channels")]
    pub hidden_channels: Vec<i64>,

    /// Convolution kernel size (default: 5)
    #[serde(default = "default_disc_kernel_size")]
    pub kernel_size: i64,

    /// LeakyReLU negative slope (default: 0.2)
    #[serde(default = "default_disc_leaky_slope")]
    pub leaky_slope: f64,
}

fn default_disc_lr() -> f64 {
    2e-4
}
fn default_disc_beta1() -> f64 {
    0.5
}
fn default_disc_beta2() -> f64 {
    0.999
}
fn default_disc_hidden_channels() -> Vec<i64> {
    vec![128, 256, 256]
}
fn default_disc_kernel_size() -> i64 {
    5
}
fn default_disc_leaky_slope() -> f64 {
    0.2
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_disc_lr(),
            beta1: default_disc_beta1(),
            beta2: default_disc_beta2(),
            hidden_channels: default_disc_hidden_channels(),
            kernel_size: default_disc_kernel_size(),
            leaky_slope: default_disc_leaky_slope(),
        }
    }
}

/// Learning-rate floor applied to one externally bound scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerFloorConfig {
    /// Rate at or below which the scheduler stops stepping (default: 1e-6)
    #[serde(default = "default_min_lr")]
    pub min_lr: f64,
}

fn default_min_lr() -> f64 {
    1e-6
}

impl Default for SchedulerFloorConfig {
    fn default() -> Self {
        Self {
            min_lr: default_min_lr(),
        }
    }
}

/// Post-processing applied to generated mels before the speaker and ASR models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostProcessConfig {
    /// Pass the generated mel through unchanged.
    #[default]
    Identity,
    /// Natural log with a lower clamp.
    LogCompression {
        /// Values below this are clamped before the log (default: 1e-5)
        #[serde(default = "default_log_floor")]
        floor: f64,
    },
}

fn default_log_floor() -> f64 {
    1e-5
}

/// Top-level training configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainingConfig {
    /// Device every owned component is placed on (default: cpu)
    #[serde(default)]
    pub device: Device,

    /// Generator architecture
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Discriminator architecture and optimizer
    #[serde(default)]
    pub discriminator: DiscriminatorConfig,

    /// Floor for the generator scheduler
    #[serde(default)]
    pub mel_generator: SchedulerFloorConfig,

    /// Floor for the speaker-recognizer scheduler
    #[serde(default)]
    pub speaker_recognition: SchedulerFloorConfig,

    /// Post-processing hook
    #[serde(default)]
    pub post_process: PostProcessConfig,
}

impl TrainingConfig {
    /// Load a training config from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.generator.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configs() {
        let config = TrainingConfig::default();
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.generator.in_channels, 80);
        assert_eq!(config.generator.max_length, 3000);
        assert_eq!(config.generator.head_dim(), 40);
        assert!((config.discriminator.learning_rate - 2e-4).abs() < 1e-12);
        assert!((config.discriminator.beta1 - 0.5).abs() < 1e-12);
        assert_eq!(config.post_process, PostProcessConfig::Identity);
        assert!(config.generator.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "device": {"gpu": 1},
            "generator": {"max_length": 512},
            "mel_generator": {"min_lr": 0.0001},
            "post_process": {"type": "log_compression"}
        }"#;
        let config: TrainingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device, Device::Gpu(1));
        assert_eq!(config.generator.max_length, 512);
        assert_eq!(config.generator.num_heads, 2);
        assert!((config.mel_generator.min_lr - 1e-4).abs() < 1e-12);
        assert!((config.speaker_recognition.min_lr - 1e-6).abs() < 1e-12);
        assert_eq!(
            config.post_process,
            PostProcessConfig::LogCompression { floor: 1e-5 }
        );
    }

    #[test]
    fn test_generator_validation() {
        let mut config = GeneratorConfig::default();
        config.out_channels = 64;
        assert!(matches!(config.validate(), Err(MelGenError::Config(_))));

        let mut config = GeneratorConfig::default();
        config.num_heads = 3;
        assert!(matches!(config.validate(), Err(MelGenError::Config(_))));

        // 80 / 16 = 5, odd head dimension
        let mut config = GeneratorConfig::default();
        config.num_heads = 16;
        assert!(matches!(config.validate(), Err(MelGenError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"speaker_recognition": {{"min_lr": 0.00002}}}}"#).unwrap();
        let config = TrainingConfig::from_file(file.path()).unwrap();
        assert!((config.speaker_recognition.min_lr - 2e-5).abs() < 1e-12);
        assert_eq!(config.generator.feedforward_dim, 2048);
    }

    #[test]
    fn test_from_file_rejects_bad_generator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"generator": {{"out_channels": 40}}}}"#).unwrap();
        assert!(TrainingConfig::from_file(file.path()).is_err());
    }
}
