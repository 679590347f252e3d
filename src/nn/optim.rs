//! Stochastic gradient descent.
//!
//! # Accumulation contract
//!
//! Backward passes *add* into parameter gradients. [`Sgd::step`] consumes
//! whatever has accumulated, and nothing resets it except
//! [`Sgd::zero_grad`]. The expected cycle per iteration is
//!
//! ```text
//! zero_grad → forward → loss → backward → step
//! ```
//!
//! Skipping `zero_grad` is not detected: the next step silently uses the
//! sum of every backward pass since the last reset.

use crate::error::{Error, Result};
use crate::ops::cpu;
use crate::tensors::{Ten64, Tensor};
use crate::variable::Variable;

/// Plain SGD with an optional momentum term.
///
/// # Example
/// ```rust
/// use briny_grad::{backprop, graph::Tape, nn::Sgd, tensor, variable::Variable};
///
/// let w = Variable::parameter(tensor!([1.0, 2.0]));
/// let mut opt = Sgd::new(vec![w.clone()], 0.5);
///
/// let mut tape = Tape::new();
/// let (loss, _) = backprop::sum(&mut tape, &w).unwrap();
/// tape.backward(&loss).unwrap();
/// opt.step().unwrap();
///
/// assert_eq!(w.to_tensor().data, vec![0.5, 1.5]);
/// ```
#[derive(Debug)]
pub struct Sgd {
    params: Vec<Variable>,
    lr: f64,
    momentum: f64,
    velocity: Vec<Option<Ten64>>,
}

impl Sgd {
    /// Creates a plain SGD optimizer over `params`.
    pub fn new(params: Vec<Variable>, lr: f64) -> Self {
        Self::with_momentum(params, lr, 0.0)
    }

    /// Creates SGD with momentum: `v = μ·v + g`, `w -= lr·v`.
    pub fn with_momentum(params: Vec<Variable>, lr: f64, momentum: f64) -> Self {
        let velocity = vec![None; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    pub fn params(&self) -> &[Variable] {
        &self.params
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Applies `param -= lr * grad` to every parameter, in place.
    ///
    /// # Errors
    /// [`Error::MissingGradient`] if any parameter has never received a
    /// gradient. The check runs before any update, so a failed step leaves
    /// every parameter untouched.
    pub fn step(&mut self) -> Result<()> {
        if let Some(index) = self.params.iter().position(|p| !p.has_grad()) {
            return Err(Error::MissingGradient { index });
        }

        let (lr, momentum) = (self.lr, self.momentum);
        for (index, (param, velocity)) in self.params.iter().zip(&mut self.velocity).enumerate() {
            param
                .update_with_grad(|value, grad| {
                    if momentum == 0.0 {
                        cpu::sgd(value, grad, lr);
                        return;
                    }
                    let v = velocity.get_or_insert_with(|| Tensor::zeros(grad.shape.clone()));
                    for (vi, gi) in v.data.iter_mut().zip(&grad.data) {
                        *vi = momentum * *vi + gi;
                    }
                    cpu::sgd(value, v, lr);
                })
                .ok_or(Error::MissingGradient { index })?;
        }
        Ok(())
    }

    /// Resets every allocated gradient buffer to zero.
    pub fn zero_grad(&self) {
        for param in &self.params {
            param.zero_grad();
        }
    }
}
