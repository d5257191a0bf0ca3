// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the mel_adversary library.

use thiserror::Error;

/// Main error type for the mel_adversary library.
#[derive(Error, Debug)]
pub enum MelGenError {
    /// A training step was invoked before its optimizer/scheduler pair was bound
    #[error("No optimizer bound for {0}; call the matching setter before training")]
    MissingOptimizer(&'static str),

    /// Tensor shape does not match the configured contract
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Sequence is longer than the positional capacity of the generator
    #[error("Sequence length {length} exceeds positional capacity {max_length}")]
    SequenceTooLong {
        /// Time steps in the offending batch
        length: i64,
        /// Configured positional capacity
        max_length: i64,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared sub-model is already borrowed elsewhere
    #[error("Model '{0}' is already borrowed")]
    ModelBusy(&'static str),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Torch tensor error
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
}

/// Result type alias for mel_adversary operations.
pub type Result<T> = std::result::Result<T, MelGenError>;
