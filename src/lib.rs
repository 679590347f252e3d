//! briny_grad: a small, explicit autodiff engine for training digit classifiers.
//!
//! Built for reading as much as for running: every forward call records
//! exactly one node and hands its id back, the backward pass is a single
//! reverse walk over that record, and the optimizer is plain SGD.
//!
//! # Features
//!
//! - Row-major tensors with gradient-tracked [`variable::Variable`] handles.
//! - An explicit operation tape with reverse-mode backpropagation.
//! - Linear, ReLU, log-softmax and NLL loss with hand-written gradient rules.
//! - SGD with an explicit gradient accumulation contract.
//! - A training session that owns model, optimizer and loss.
//!
//! # Goals
//!
//! - Make "what got recorded" visible and testable.
//! - Prioritize correctness and explicitness over speed or generality.
//! - Keep numerics CPU-only, parallelised inside each kernel with rayon.
//!
//! # Modules
//!
//! - [`tensors`]: core tensor storage and the `tensor!` macro.
//! - [`variable`]: shared tensor handles with gradient buffers.
//! - [`graph`]: the tape, its nodes and the backward traversal.
//! - [`backprop`]: differentiable operations that record onto a tape.
//! - [`ops`]: raw CPU kernels.
//! - [`nn`]: layers, losses and the SGD optimizer.
//! - [`session`]: the training loop.
//! - [`config`]: training hyperparameters.
//! - [`gradcheck`]: finite-difference gradient checks.
//!
//! # Example
//!
//! ```rust
//! use briny_grad::config::TrainConfig;
//! use briny_grad::session::{Batch, TrainingSession};
//! use briny_grad::tensors::Tensor;
//!
//! let config = TrainConfig::default().with_learning_rate(0.1).with_epochs(2);
//! let mut session = TrainingSession::mlp(&[4, 8, 2], config).unwrap();
//!
//! let inputs = Tensor::new(vec![2, 4], vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
//! let batches = vec![Batch::new(inputs, vec![0, 1]).unwrap()];
//!
//! let reports = session.fit(&batches).unwrap();
//! assert_eq!(reports.len(), 2);
//! ```

pub mod backprop;
pub mod config;
pub mod error;
pub mod gradcheck;
pub mod graph;
pub mod nn;
pub mod ops;
pub mod session;
pub mod tensors;
pub mod variable;

pub use error::{Error, Result};
