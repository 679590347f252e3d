//! Neural-network building blocks on top of the tape.
//!
//! - [`layers`]: `Linear`, activations and the `Sequential` container
//! - [`loss`]: negative log-likelihood and cross-entropy criteria
//! - [`optim`]: stochastic gradient descent

pub mod layers;
pub mod loss;
pub mod optim;

pub use layers::{Layer, Linear, Sequential};
pub use loss::{CrossEntropyLoss, NllLoss};
pub use optim::Sgd;
