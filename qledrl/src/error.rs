// src/error.rs
//
// Error taxonomy for the design environment.
//
// Only caller misuse is surfaced as an error: a physical design that does not
// name every declared dimension, an invalid space / config, and calling
// `step` outside an active episode. Numeric trouble inside the evaluator or
// the reward shaper is recovered locally, and constraint violations are data.

use thiserror::Error;

/// Errors returned by the parameter space and the episode controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    /// A declared dimension is absent from a physical parameter mapping.
    #[error("missing dimension '{name}' in physical parameters")]
    MissingDimension { name: String },

    /// The parameter space definition is inconsistent.
    #[error("invalid parameter space: {0}")]
    InvalidSpace(String),

    /// The environment configuration is out of range.
    #[error("invalid environment config: {0}")]
    InvalidConfig(String),

    /// `step` was called before the first `reset`.
    #[error("step called before reset")]
    NotReset,

    /// `step` was called after termination or truncation without a reset.
    #[error("episode already ended at step {step}; call reset before stepping again")]
    EpisodeEnded { step: u32 },

    /// A batched call received the wrong number of per-environment inputs.
    #[error("expected {expected} inputs for the batch, got {got}")]
    BatchSize { expected: usize, got: usize },
}

impl EnvError {
    pub fn missing_dimension(name: impl Into<String>) -> Self {
        EnvError::MissingDimension { name: name.into() }
    }

    /// True for the invalid-call-sequence class (`NotReset` / `EpisodeEnded`).
    pub fn is_call_sequence(&self) -> bool {
        matches!(self, EnvError::NotReset | EnvError::EpisodeEnded { .. })
    }
}

pub type EnvResult<T> = Result<T, EnvError>;
