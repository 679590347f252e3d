//! # Numeric Kernels
//!
//! This module holds the raw numerics behind every differentiable
//! operation, separated from graph bookkeeping.
//!
//! ## Submodules
//!
//! - [`cpu`]: multi-threaded CPU kernels (forward and backward rules)
//!
//! ## Extending
//!
//! To add a new operation:
//!
//! 1. Implement its forward and backward kernels in [`cpu`]
//! 2. Add an [`crate::graph::Op`] variant carrying whatever the backward rule needs
//! 3. Add a recording function with shape checks to [`crate::backprop`]

pub mod cpu;
