//! Error types for briny_grad.
//!
//! Every fallible operation reports its failure synchronously at the call
//! that broke the precondition. Nothing is retried internally; a training
//! loop is expected to stop on the first error.

use thiserror::Error;

/// Errors raised by graph construction, backward traversal and training.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Two operands (or an operand and a layer) disagree on their dimensions.
    #[error("shape mismatch in {op}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// `step()` reached a parameter whose gradient was never populated.
    #[error("parameter {index} has no gradient; run backward before stepping")]
    MissingGradient { index: usize },

    /// A class label outside the range the loss was given.
    #[error("label {label} is outside the class range 0..{classes}")]
    InvalidLabel { label: usize, classes: usize },

    /// `backward()` was invoked on a non-scalar without a seed gradient.
    #[error("backward on a non-scalar output of shape {shape:?} needs an explicit seed")]
    NonScalarOutput { shape: Vec<usize> },

    /// A gradient was requested through a tensor the graph does not track.
    #[error("tensor is not tracked by the graph and cannot receive a gradient")]
    NotTracked,

    /// A variable produced by a cleared (or different) tape.
    #[error("tensor was produced by a cleared or foreign tape")]
    StaleGraph,

    /// A dimension argument outside the tensor's rank.
    #[error("dimension {dim} is out of range for a rank-{rank} tensor")]
    InvalidDim { dim: usize, rank: usize },

    /// A training configuration that failed validation.
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),

    /// A batch source that yielded nothing for an epoch.
    #[error("batch source produced no batches for epoch {epoch}")]
    EmptyEpoch { epoch: usize },
}

pub type Result<T> = core::result::Result<T, Error>;
