// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Neural network layer implementations for the mel generator.
//!
//! This module implements the building blocks of the transformer
//! encoder-decoder: linear projections, layer normalization, a bounded
//! rotary position table, multi-head attention, the position-wise
//! feed-forward block and the post-norm encoder/decoder layers.
//!
//! Layers that contain dropout expose `forward_t(.., train)`, following the
//! tch `ModuleT` convention; dropout is the identity unless `train` is set.

use tch::nn;

use crate::error::{MelGenError, Result};
use crate::tensor::{Device, Tensor};

/// Linear layer with optional bias.
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization and a zero bias.
    pub fn new(vs: &nn::Path, in_features: i64, out_features: i64) -> Self {
        let mut layer = Self::new_no_bias(vs, in_features, out_features);
        let bias = vs.var("bias", &[out_features], nn::Init::Const(0.0));
        layer.bias = Some(Tensor::from_tch(bias));
        layer
    }

    /// Create a new Linear layer without bias.
    pub fn new_no_bias(vs: &nn::Path, in_features: i64, out_features: i64) -> Self {
        // Xavier/Glorot uniform bound
        let bound = (6.0 / (in_features + out_features) as f64).sqrt();
        let weight = vs.var(
            "weight",
            &[out_features, in_features],
            nn::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        Self {
            weight: Tensor::from_tch(weight),
            bias: None,
        }
    }

    /// Apply linear transformation: x @ W^T + bias.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let out = x.matmul(&self.weight.tr());
        if let Some(ref bias) = self.bias {
            &out + bias
        } else {
            out
        }
    }
}

/// Layer normalization over the last dimension with learned affine parameters.
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    size: i64,
    eps: f64,
}

impl LayerNorm {
    /// Create a new LayerNorm initialised to the identity transform.
    pub fn new(vs: &nn::Path, size: i64, eps: f64) -> Self {
        let weight = vs.var("weight", &[size], nn::Init::Const(1.0));
        let bias = vs.var("bias", &[size], nn::Init::Const(0.0));
        Self {
            weight: Tensor::from_tch(weight),
            bias: Tensor::from_tch(bias),
            size,
            eps,
        }
    }

    /// Normalize the last dimension.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        x.layer_norm(&[self.size], Some(&self.weight), Some(&self.bias), self.eps)
    }
}

/// Rotary Position Embedding (RoPE) with a fixed positional capacity.
///
/// The cos/sin tables are computed once for `max_seq_len` positions; asking
/// for more positions is an error rather than a silent truncation.
pub struct RotaryEmbedding {
    cos_cache: Tensor,
    sin_cache: Tensor,
    dim: i64,
    max_seq_len: i64,
}

impl RotaryEmbedding {
    /// Create new rotary embeddings with the given dimension and max sequence length.
    pub fn new(dim: i64, max_seq_len: i64, theta: f64, device: Device) -> Self {
        let half_dim = dim / 2;

        // Create inverse frequencies
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| 1.0 / (theta as f32).powf((2 * i) as f32 / dim as f32))
            .collect();
        let inv_freq = Tensor::from_slice_f32(&inv_freq).to_device(device);

        // Create position indices
        let positions: Vec<f32> = (0..max_seq_len).map(|i| i as f32).collect();
        let positions = Tensor::from_slice_f32(&positions)
            .view(&[max_seq_len, 1])
            .to_device(device);

        // Outer product: [max_seq_len, half_dim]
        let freqs = positions.matmul(&inv_freq.view(&[1, half_dim]));

        Self {
            cos_cache: freqs.cos(),
            sin_cache: freqs.sin(),
            dim,
            max_seq_len,
        }
    }

    /// Number of positions the tables cover.
    pub fn capacity(&self) -> i64 {
        self.max_seq_len
    }

    /// Apply rotary embedding to query and key tensors of shape
    /// `[batch, heads, seq, head_dim]`.
    pub fn forward(&self, q: &Tensor, k: &Tensor, seq_len: i64) -> Result<(Tensor, Tensor)> {
        if seq_len > self.max_seq_len {
            return Err(MelGenError::SequenceTooLong {
                length: seq_len,
                max_length: self.max_seq_len,
            });
        }
        let cos = self.cos_cache.narrow(0, 0, seq_len);
        let sin = self.sin_cache.narrow(0, 0, seq_len);

        Ok((self.apply_rope(q, &cos, &sin), self.apply_rope(k, &cos, &sin)))
    }

    fn apply_rope(&self, x: &Tensor, cos: &Tensor, sin: &Tensor) -> Tensor {
        let half_dim = self.dim / 2;

        let x1 = x.narrow(-1, 0, half_dim);
        let x2 = x.narrow(-1, half_dim, half_dim);

        // [seq, half_dim] -> [1, 1, seq, half_dim]
        let cos = cos.view(&[1, 1, -1, half_dim]);
        let sin = sin.view(&[1, 1, -1, half_dim]);

        let out1 = &x1 * &cos - &x2 * &sin;
        let out2 = &x1 * &sin + &x2 * &cos;

        Tensor::cat(&[out1, out2], -1)
    }
}

/// Multi-head scaled dot-product attention, usable for self- and cross-attention.
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: i64,
    head_dim: i64,
    dropout: f64,
}

impl MultiHeadAttention {
    /// Create a new attention module over `hidden_size` features.
    pub fn new(vs: &nn::Path, hidden_size: i64, num_heads: i64, dropout: f64) -> Self {
        Self {
            q_proj: Linear::new(&vs.sub("q_proj"), hidden_size, hidden_size),
            k_proj: Linear::new(&vs.sub("k_proj"), hidden_size, hidden_size),
            v_proj: Linear::new(&vs.sub("v_proj"), hidden_size, hidden_size),
            o_proj: Linear::new(&vs.sub("o_proj"), hidden_size, hidden_size),
            num_heads,
            head_dim: hidden_size / num_heads,
            dropout,
        }
    }

    /// Attend from `query_states` `[batch, tgt, hidden]` over
    /// `key_value_states` `[batch, src, hidden]`.
    ///
    /// No mask is applied: every position sees the whole sequence. Rotary
    /// positions are applied to queries and keys when `rotary_emb` is given,
    /// which requires `tgt == src`.
    pub fn forward_t(
        &self,
        query_states: &Tensor,
        key_value_states: &Tensor,
        rotary_emb: Option<&RotaryEmbedding>,
        train: bool,
    ) -> Result<Tensor> {
        let q_size = query_states.size();
        let (batch_size, tgt_len) = (q_size[0], q_size[1]);
        let src_len = key_value_states.size()[1];

        // (batch, seq, hidden) -> (batch, heads, seq, head_dim)
        let query = self
            .q_proj
            .forward(query_states)
            .view(&[batch_size, tgt_len, self.num_heads, self.head_dim])
            .transpose(1, 2);
        let key = self
            .k_proj
            .forward(key_value_states)
            .view(&[batch_size, src_len, self.num_heads, self.head_dim])
            .transpose(1, 2);
        let value = self
            .v_proj
            .forward(key_value_states)
            .view(&[batch_size, src_len, self.num_heads, self.head_dim])
            .transpose(1, 2);

        let (query, key) = match rotary_emb {
            Some(rope) => {
                if tgt_len != src_len {
                    return Err(MelGenError::ShapeMismatch(format!(
                        "rotary attention needs equal query/key lengths, got {} and {}",
                        tgt_len, src_len
                    )));
                }
                rope.forward(&query, &key, tgt_len)?
            }
            None => (query, key),
        };

        let scale = (self.head_dim as f64).sqrt();
        let attn_weights = (query.matmul(&key.transpose(-2, -1)) / scale)
            .softmax(-1)
            .dropout(self.dropout, train);
        let attn_output = attn_weights.matmul(&value);

        // (batch, heads, tgt, head_dim) -> (batch, tgt, hidden)
        let attn_output = attn_output.transpose(1, 2).contiguous().view(&[
            batch_size,
            tgt_len,
            self.num_heads * self.head_dim,
        ]);

        Ok(self.o_proj.forward(&attn_output))
    }
}

/// Position-wise feed-forward block: linear -> ReLU -> dropout -> linear.
pub struct FeedForward {
    linear1: Linear,
    linear2: Linear,
    dropout: f64,
}

impl FeedForward {
    /// Create a new feed-forward block.
    pub fn new(vs: &nn::Path, hidden_size: i64, feedforward_dim: i64, dropout: f64) -> Self {
        Self {
            linear1: Linear::new(&vs.sub("linear1"), hidden_size, feedforward_dim),
            linear2: Linear::new(&vs.sub("linear2"), feedforward_dim, hidden_size),
            dropout,
        }
    }

    /// Apply the block.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let hidden = self.linear1.forward(x).relu().dropout(self.dropout, train);
        self.linear2.forward(&hidden)
    }
}

/// Shared hyper-parameters of one transformer layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerDims {
    /// Model dimension
    pub hidden_size: i64,
    /// Attention heads
    pub num_heads: i64,
    /// Feed-forward hidden size
    pub feedforward_dim: i64,
    /// Dropout probability
    pub dropout: f64,
    /// LayerNorm epsilon
    pub layer_norm_eps: f64,
}

/// Post-norm transformer encoder layer (self-attention + feed-forward).
pub struct TransformerEncoderLayer {
    self_attn: MultiHeadAttention,
    feed_forward: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: f64,
}

impl TransformerEncoderLayer {
    /// Create a new encoder layer.
    pub fn new(vs: &nn::Path, dims: LayerDims) -> Self {
        Self {
            self_attn: MultiHeadAttention::new(
                &vs.sub("self_attn"),
                dims.hidden_size,
                dims.num_heads,
                dims.dropout,
            ),
            feed_forward: FeedForward::new(
                &vs.sub("feed_forward"),
                dims.hidden_size,
                dims.feedforward_dim,
                dims.dropout,
            ),
            norm1: LayerNorm::new(&vs.sub("norm1"), dims.hidden_size, dims.layer_norm_eps),
            norm2: LayerNorm::new(&vs.sub("norm2"), dims.hidden_size, dims.layer_norm_eps),
            dropout: dims.dropout,
        }
    }

    /// Apply the layer to `[batch, seq, hidden]`.
    pub fn forward_t(
        &self,
        x: &Tensor,
        rotary_emb: &RotaryEmbedding,
        train: bool,
    ) -> Result<Tensor> {
        let attn = self.self_attn.forward_t(x, x, Some(rotary_emb), train)?;
        let x = self.norm1.forward(&(x + attn.dropout(self.dropout, train)));

        let ff = self.feed_forward.forward_t(&x, train);
        Ok(self.norm2.forward(&(&x + ff.dropout(self.dropout, train))))
    }
}

/// Post-norm transformer decoder layer (self-attention, cross-attention, feed-forward).
pub struct TransformerDecoderLayer {
    self_attn: MultiHeadAttention,
    cross_attn: MultiHeadAttention,
    feed_forward: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    dropout: f64,
}

impl TransformerDecoderLayer {
    /// Create a new decoder layer.
    pub fn new(vs: &nn::Path, dims: LayerDims) -> Self {
        Self {
            self_attn: MultiHeadAttention::new(
                &vs.sub("self_attn"),
                dims.hidden_size,
                dims.num_heads,
                dims.dropout,
            ),
            cross_attn: MultiHeadAttention::new(
                &vs.sub("cross_attn"),
                dims.hidden_size,
                dims.num_heads,
                dims.dropout,
            ),
            feed_forward: FeedForward::new(
                &vs.sub("feed_forward"),
                dims.hidden_size,
                dims.feedforward_dim,
                dims.dropout,
            ),
            norm1: LayerNorm::new(&vs.sub("norm1"), dims.hidden_size, dims.layer_norm_eps),
            norm2: LayerNorm::new(&vs.sub("norm2"), dims.hidden_size, dims.layer_norm_eps),
            norm3: LayerNorm::new(&vs.sub("norm3"), dims.hidden_size, dims.layer_norm_eps),
            dropout: dims.dropout,
        }
    }

    /// Apply the layer to target `[batch, tgt, hidden]` with encoder
    /// `memory` `[batch, src, hidden]`. The target is seen in full (no causal mask).
    pub fn forward_t(
        &self,
        tgt: &Tensor,
        memory: &Tensor,
        rotary_emb: &RotaryEmbedding,
        train: bool,
    ) -> Result<Tensor> {
        let attn = self.self_attn.forward_t(tgt, tgt, Some(rotary_emb), train)?;
        let x = self.norm1.forward(&(tgt + attn.dropout(self.dropout, train)));

        let cross = self.cross_attn.forward_t(&x, memory, None, train)?;
        let x = self.norm2.forward(&(&x + cross.dropout(self.dropout, train)));

        let ff = self.feed_forward.forward_t(&x, train);
        Ok(self.norm3.forward(&(&x + ff.dropout(self.dropout, train))))
    }
}
