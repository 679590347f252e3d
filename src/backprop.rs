//! Differentiable operations.
//!
//! # Recording Forward Calls
//!
//! Each function here checks its operands, evaluates the forward result
//! with the [`crate::ops::cpu`] kernels and records one node on the given
//! [`Tape`]. It returns the output variable **and** the [`NodeId`] it
//! recorded, so callers (and tests) can see exactly what the graph holds.
//!
//! **Key Operations:**
//! - **Linear:** `y = x Wᵀ + b`
//! - **ReLU:** zero out negatives; the positive mask is cached
//! - **Log-softmax:** stable log-probabilities along a chosen axis
//! - **NLL loss:** mean negative log-probability of the true class
//! - **Element-wise:** `add`, `mul`, `scale`, plus the `sum` and `mean` reductions
//!
//! ## Usage Guidelines
//!
//! - Shape problems are returned as [`Error::ShapeMismatch`], never panics.
//! - No broadcasting: element-wise operands must have identical shapes.
//! - Inputs may be shared between calls; gradients from every consumer add up.

use crate::error::{Error, Result};
use crate::graph::{NodeId, Op, Tape};
use crate::ops::cpu;
use crate::tensors::Tensor;
use crate::variable::Variable;

fn expect_rank(op: &'static str, var: &Variable, rank: usize) -> Result<Vec<usize>> {
    let shape = var.shape();
    if shape.len() != rank {
        return Err(Error::ShapeMismatch {
            op,
            expected: vec![0; rank],
            got: shape,
        });
    }
    Ok(shape)
}

fn expect_same_shape(op: &'static str, a: &Variable, b: &Variable) -> Result<()> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa != sb {
        return Err(Error::ShapeMismatch {
            op,
            expected: sa,
            got: sb,
        });
    }
    Ok(())
}

/// Applies an affine map `y = x Wᵀ + b`.
///
/// - `x`: `[batch, in]`
/// - `weight`: `[out, in]`
/// - `bias`: `[out]`
///
/// # Errors
/// [`Error::ShapeMismatch`] if any operand has the wrong rank, if the batch
/// feature width disagrees with the weight's input width, or if the bias
/// length differs from the weight's output width.
///
/// # Example
/// ```rust
/// use briny_grad::{backprop, graph::Tape, tensor, variable::Variable};
///
/// let mut tape = Tape::new();
/// let x = Variable::input(tensor!([[1.0, 2.0]]));
/// let w = Variable::parameter(tensor!([[3.0, 4.0], [5.0, 6.0], [7.0, 8.0]]));
/// let b = Variable::parameter(tensor!([0.5, 0.5, 0.5]));
/// let (y, node) = backprop::linear(&mut tape, &x, &w, &b).unwrap();
/// assert_eq!(y.to_tensor().data, vec![11.5, 17.5, 23.5]);
/// assert_eq!(tape.node(node).unwrap().op().name(), "linear");
/// ```
pub fn linear(
    tape: &mut Tape,
    x: &Variable,
    weight: &Variable,
    bias: &Variable,
) -> Result<(Variable, NodeId)> {
    let xs = expect_rank("linear", x, 2)?;
    let ws = expect_rank("linear", weight, 2)?;
    let bs = expect_rank("linear", bias, 1)?;
    if xs[1] != ws[1] {
        return Err(Error::ShapeMismatch {
            op: "linear",
            expected: vec![xs[0], ws[1]],
            got: xs,
        });
    }
    if bs[0] != ws[0] {
        return Err(Error::ShapeMismatch {
            op: "linear",
            expected: vec![ws[0]],
            got: bs,
        });
    }

    let value = cpu::linear(&x.value(), &weight.value(), Some(&*bias.value()));
    tape.record(
        Op::Linear {
            x: x.to_tensor(),
            weight: weight.to_tensor(),
        },
        vec![x.clone(), weight.clone(), bias.clone()],
        value,
    )
}

/// Applies `max(0, x)` element-wise.
pub fn relu(tape: &mut Tape, x: &Variable) -> Result<(Variable, NodeId)> {
    let (value, mask) = cpu::relu(&x.value());
    tape.record(Op::Relu { mask }, vec![x.clone()], value)
}

/// Log-softmax of a rank-2 tensor; `dim` selects the axis that sums to one
/// in probability space (`1` normalizes rows, `0` columns).
///
/// # Errors
/// - [`Error::ShapeMismatch`] if `x` is not rank 2
/// - [`Error::InvalidDim`] if `dim > 1`
pub fn log_softmax(tape: &mut Tape, x: &Variable, dim: usize) -> Result<(Variable, NodeId)> {
    let shape = expect_rank("log_softmax", x, 2)?;
    if dim >= shape.len() {
        return Err(Error::InvalidDim {
            dim,
            rank: shape.len(),
        });
    }

    let value = cpu::log_softmax(&x.value(), dim);
    let probs = value.map(|v| v.exp());
    tape.record(Op::LogSoftmax { dim, probs }, vec![x.clone()], value)
}

/// Mean negative log-likelihood: `-(1/n) Σ log_probs[i, targets[i]]`.
///
/// `log_probs` is `[n, classes]`, `targets` holds one class index per row.
///
/// # Errors
/// - [`Error::ShapeMismatch`] if `log_probs` is not rank 2, is empty, or the
///   number of targets differs from the number of rows
/// - [`Error::InvalidLabel`] if a target is not below `classes`
pub fn nll_loss(
    tape: &mut Tape,
    log_probs: &Variable,
    targets: &[usize],
) -> Result<(Variable, NodeId)> {
    let shape = expect_rank("nll_loss", log_probs, 2)?;
    let (rows, classes) = (shape[0], shape[1]);
    if rows == 0 || targets.len() != rows {
        return Err(Error::ShapeMismatch {
            op: "nll_loss",
            expected: vec![targets.len().max(1), classes],
            got: shape,
        });
    }
    if let Some(&label) = targets.iter().find(|&&t| t >= classes) {
        return Err(Error::InvalidLabel { label, classes });
    }

    let loss = cpu::nll_loss(&log_probs.value(), targets);
    tape.record(
        Op::NllLoss {
            targets: targets.to_vec(),
        },
        vec![log_probs.clone()],
        Tensor::scalar(loss),
    )
}

/// Element-wise `a + b`.
pub fn add(tape: &mut Tape, a: &Variable, b: &Variable) -> Result<(Variable, NodeId)> {
    expect_same_shape("add", a, b)?;
    let value = cpu::add(&a.value(), &b.value());
    tape.record(Op::Add, vec![a.clone(), b.clone()], value)
}

/// Element-wise `a * b`.
pub fn mul(tape: &mut Tape, a: &Variable, b: &Variable) -> Result<(Variable, NodeId)> {
    expect_same_shape("mul", a, b)?;
    let value = cpu::mul(&a.value(), &b.value());
    tape.record(
        Op::Mul {
            a: a.to_tensor(),
            b: b.to_tensor(),
        },
        vec![a.clone(), b.clone()],
        value,
    )
}

/// Multiplies every element by a constant.
pub fn scale(tape: &mut Tape, x: &Variable, factor: f64) -> Result<(Variable, NodeId)> {
    let value = x.value().scale(factor);
    tape.record(Op::Scale { factor }, vec![x.clone()], value)
}

/// Sums every element into a scalar.
pub fn sum(tape: &mut Tape, x: &Variable) -> Result<(Variable, NodeId)> {
    let total = x.value().data.iter().sum();
    tape.record(Op::Sum, vec![x.clone()], Tensor::scalar(total))
}

/// Averages every element into a scalar.
///
/// # Errors
/// [`Error::ShapeMismatch`] on an empty tensor.
pub fn mean(tape: &mut Tape, x: &Variable) -> Result<(Variable, NodeId)> {
    let value = x.value();
    if value.numel() == 0 {
        return Err(Error::ShapeMismatch {
            op: "mean",
            expected: vec![1],
            got: value.shape.clone(),
        });
    }
    let avg = value.data.iter().sum::<f64>() / value.numel() as f64;
    drop(value);
    tape.record(Op::Mean, vec![x.clone()], Tensor::scalar(avg))
}
