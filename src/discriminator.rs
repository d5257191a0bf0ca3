// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Real/fake critic over mel-spectrograms.

use tch::nn;

use crate::config::DiscriminatorConfig;
use crate::error::{MelGenError, Result};
use crate::layers::Linear;
use crate::models::{Mode, TrainableModule};
use crate::tensor::{Device, Tensor};

/// A binary critic producing one raw logit per batch element.
pub trait Discriminator: TrainableModule {
    /// Returns `(scalar_loss, logits)` for a mel batch and a target of the
    /// same length as the batch (1 for real, 0 for generated).
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// One 1-D convolution with bias.
struct Conv1d {
    weight: Tensor,
    bias: Tensor,
    stride: i64,
    padding: i64,
}

impl Conv1d {
    fn new(vs: &nn::Path, in_channels: i64, out_channels: i64, kernel_size: i64, stride: i64) -> Self {
        let bound = 1.0 / ((in_channels * kernel_size) as f64).sqrt();
        let init = nn::Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let weight = vs.var("weight", &[out_channels, in_channels, kernel_size], init);
        let bias = vs.var("bias", &[out_channels], init);
        Self {
            weight: Tensor::from_tch(weight),
            bias: Tensor::from_tch(bias),
            stride,
            padding: kernel_size / 2,
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        x.conv1d(
            &self.weight,
            Some(&self.bias),
            &[self.stride],
            &[self.padding],
            &[1],
            1,
        )
    }
}

/// Strided convolution stack with LeakyReLU, global mean over time and a
/// linear head.
pub struct ConvDiscriminator {
    vs: nn::VarStore,
    convs: Vec<Conv1d>,
    head: Linear,
    in_channels: i64,
    leaky_slope: f64,
    mode: Mode,
}

impl ConvDiscriminator {
    /// Build a discriminator for `in_channels`-channel mels.
    pub fn new(config: &DiscriminatorConfig, in_channels: i64, device: Device) -> Result<Self> {
        if config.hidden_channels.is_empty() || config.kernel_size <= 0 || in_channels <= 0 {
            return Err(MelGenError::Config(format!(
                "discriminator needs at least one conv layer and a positive kernel, got {:?} / {}",
                config.hidden_channels, config.kernel_size
            )));
        }

        let vs = nn::VarStore::new(device.into());
        let root = vs.root();
        let mut convs = Vec::with_capacity(config.hidden_channels.len());
        let mut channels = in_channels;
        for (i, &out) in config.hidden_channels.iter().enumerate() {
            // Downsample time in the first two layers
            let stride = if i < 2 { 2 } else { 1 };
            convs.push(Conv1d::new(
                &(&root / "convs" / i),
                channels,
                out,
                config.kernel_size,
                stride,
            ));
            channels = out;
        }
        let head = Linear::new(&(&root / "head"), channels, 1);

        Ok(Self {
            vs,
            convs,
            head,
            in_channels,
            leaky_slope: config.leaky_slope,
            mode: Mode::Training,
        })
    }

    /// Raw logits of shape `[batch]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let size = x.size();
        if size.len() != 3 || size[1] != self.in_channels || size[2] == 0 {
            return Err(MelGenError::ShapeMismatch(format!(
                "discriminator expects (batch, {}, time), got {:?}",
                self.in_channels, size
            )));
        }

        let mut hidden = x.shallow_clone();
        for conv in &self.convs {
            hidden = conv.forward(&hidden).leaky_relu(self.leaky_slope);
        }
        let pooled = hidden.mean_dim(&[2], false);
        let logits = self.head.forward(&pooled);
        Ok(logits.view(&[size[0]]))
    }
}

impl TrainableModule for ConvDiscriminator {
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

impl Discriminator for ConvDiscriminator {
    fn loss(&self, input: &Tensor, target: &Tensor) -> Result<(Tensor, Tensor)> {
        let logits = self.forward(input)?;
        if target.size() != logits.size() {
            return Err(MelGenError::ShapeMismatch(format!(
                "target {:?} does not match logits {:?}",
                target.size(),
                logits.size()
            )));
        }
        let loss = logits.binary_cross_entropy_with_logits(target);
        Ok((loss, logits))
    }
}
