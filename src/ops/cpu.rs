//! Parallel CPU kernels
//!
//! # CPU Kernels
//!
//! Forward and backward numerics for every differentiable operation. The
//! functions here are pure: they take tensors, return tensors, and never
//! touch the graph. Shape validation happens one level up in
//! [`crate::backprop`]; the kernels assume consistent operands and panic on
//! out-of-bounds access otherwise.
//!
//! ## Features
//!
//! - Row-level parallelism using [`rayon`](https://docs.rs/rayon)
//! - Numerically stable log-softmax (lane max subtracted before `exp`)
//!
//! ## Implemented Kernels
//!
//! - `linear` / `linear_backward`: `y = x Wᵀ + b`
//! - `matmul`, `matmul_tn`: plain and left-transposed products
//! - `relu` / `relu_backward`
//! - `log_softmax` / `log_softmax_backward` over rank-2 tensors
//! - `nll_loss` / `nll_loss_backward`
//! - `add`, `mul`: element-wise
//! - `sgd`: in-place parameter update

use rayon::prelude::*;

use crate::tensors::{Ten64, Tensor};

/// Computes `x Wᵀ + b` for `x: [m, k]`, `w: [n, k]` and an optional `b: [n]`.
///
/// Each output row is computed on its own rayon task.
pub fn linear(x: &Ten64, w: &Ten64, b: Option<&Ten64>) -> Ten64 {
    let (m, k) = (x.shape[0], x.shape[1]);
    let n = w.shape[0];
    let mut out = vec![0.0f64; m * n];

    out.par_chunks_mut(n.max(1))
        .enumerate()
        .for_each(|(i, row)| {
            let xi = &x.data[i * k..(i + 1) * k];
            for (j, y) in row.iter_mut().enumerate() {
                let wj = &w.data[j * k..(j + 1) * k];
                let dot: f64 = xi.iter().zip(wj).map(|(a, b)| a * b).sum();
                *y = dot + b.map_or(0.0, |b| b.data[j]);
            }
        });

    Tensor::new(vec![m, n], out)
}

/// Gradients of `y = x Wᵀ + b` given `dL/dy: [m, n]`.
///
/// Returns `(dL/dx, dL/dW, dL/db)` with the shapes of `x`, `w` and `[n]`.
pub fn linear_backward(x: &Ten64, w: &Ten64, grad: &Ten64) -> (Ten64, Ten64, Ten64) {
    let n = w.shape[0];
    let dx = matmul(grad, w);
    let dw = matmul_tn(grad, x);

    let mut db = vec![0.0f64; n];
    for row in grad.data.chunks(n.max(1)) {
        for (acc, g) in db.iter_mut().zip(row) {
            *acc += g;
        }
    }

    (dx, dw, Tensor::new(vec![n], db))
}

/// Matrix product `a · b` for `a: [m, k]`, `b: [k, n]`.
pub fn matmul(a: &Ten64, b: &Ten64) -> Ten64 {
    let (m, k) = (a.shape[0], a.shape[1]);
    let n = b.shape[1];
    let mut out = vec![0.0f64; m * n];

    out.par_chunks_mut(n.max(1))
        .enumerate()
        .for_each(|(i, row)| {
            for l in 0..k {
                let a_il = a.data[i * k + l];
                let b_row = &b.data[l * n..(l + 1) * n];
                for (y, b_lj) in row.iter_mut().zip(b_row) {
                    *y += a_il * b_lj;
                }
            }
        });

    Tensor::new(vec![m, n], out)
}

/// Left-transposed product `aᵀ · b` for `a: [k, m]`, `b: [k, n]`.
pub fn matmul_tn(a: &Ten64, b: &Ten64) -> Ten64 {
    let (k, m) = (a.shape[0], a.shape[1]);
    let n = b.shape[1];
    let mut out = vec![0.0f64; m * n];

    out.par_chunks_mut(n.max(1))
        .enumerate()
        .for_each(|(i, row)| {
            for l in 0..k {
                let a_li = a.data[l * m + i];
                let b_row = &b.data[l * n..(l + 1) * n];
                for (y, b_lj) in row.iter_mut().zip(b_row) {
                    *y += a_li * b_lj;
                }
            }
        });

    Tensor::new(vec![m, n], out)
}

/// Applies `max(0, x)` element-wise and returns the mask of positive inputs.
pub fn relu(input: &Ten64) -> (Ten64, Vec<bool>) {
    let mask: Vec<bool> = input.data.par_iter().map(|&x| x > 0.0).collect();
    let data = input
        .data
        .par_iter()
        .zip(mask.par_iter())
        .map(|(&x, &keep)| if keep { x } else { 0.0 })
        .collect();

    (Tensor::new(input.shape.clone(), data), mask)
}

/// Passes upstream gradients only where the forward input was positive.
pub fn relu_backward(mask: &[bool], grad: &Ten64) -> Ten64 {
    let data = grad
        .data
        .par_iter()
        .zip(mask.par_iter())
        .map(|(&g, &keep)| if keep { g } else { 0.0 })
        .collect();

    Tensor::new(grad.shape.clone(), data)
}

fn log_softmax_rows(input: &Ten64) -> Ten64 {
    let cols = input.shape[1];
    let mut out = input.data.clone();

    out.par_chunks_mut(cols.max(1)).for_each(|row| {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
        for v in row.iter_mut() {
            *v = *v - max - log_sum;
        }
    });

    Tensor::new(input.shape.clone(), out)
}

fn log_softmax_backward_rows(probs: &Ten64, grad: &Ten64) -> Ten64 {
    let cols = grad.shape[1];
    let mut out = grad.data.clone();

    out.par_chunks_mut(cols.max(1))
        .zip(probs.data.par_chunks(cols.max(1)))
        .for_each(|(row, p)| {
            let total: f64 = row.iter().sum();
            for (g, p) in row.iter_mut().zip(p) {
                *g -= p * total;
            }
        });

    Tensor::new(grad.shape.clone(), out)
}

/// Log-softmax of a rank-2 tensor; `dim` is the axis normalized to sum to one.
///
/// `dim == 1` normalizes each row, `dim == 0` each column.
pub fn log_softmax(input: &Ten64, dim: usize) -> Ten64 {
    if dim == 1 {
        log_softmax_rows(input)
    } else {
        log_softmax_rows(&input.transpose()).transpose()
    }
}

/// Gradient of log-softmax: `g - softmax · Σ g` along `dim`.
pub fn log_softmax_backward(probs: &Ten64, grad: &Ten64, dim: usize) -> Ten64 {
    if dim == 1 {
        log_softmax_backward_rows(probs, grad)
    } else {
        log_softmax_backward_rows(&probs.transpose(), &grad.transpose()).transpose()
    }
}

/// Mean negative log-likelihood of the target class in each row.
pub fn nll_loss(log_probs: &Ten64, targets: &[usize]) -> f64 {
    let classes = log_probs.shape[1];
    let total: f64 = targets
        .iter()
        .enumerate()
        .map(|(i, &t)| log_probs.data[i * classes + t])
        .sum();

    -total / targets.len() as f64
}

/// Gradient of [`nll_loss`] scaled by the upstream scalar gradient.
pub fn nll_loss_backward(shape: &[usize], targets: &[usize], upstream: f64) -> Ten64 {
    let classes = shape[1];
    let mut grad = Tensor::zeros(shape.to_vec());
    let scale = -upstream / targets.len() as f64;
    for (i, &t) in targets.iter().enumerate() {
        grad.data[i * classes + t] = scale;
    }
    grad
}

/// Element-wise sum of equally shaped tensors.
pub fn add(a: &Ten64, b: &Ten64) -> Ten64 {
    let data = a.data.par_iter().zip(&b.data).map(|(x, y)| x + y).collect();
    Tensor::new(a.shape.clone(), data)
}

/// Element-wise product of equally shaped tensors.
pub fn mul(a: &Ten64, b: &Ten64) -> Ten64 {
    let data = a.data.par_iter().zip(&b.data).map(|(x, y)| x * y).collect();
    Tensor::new(a.shape.clone(), data)
}

/// Performs one in-place step of stochastic gradient descent.
///
/// # Formula
/// $$ w := w - \\text{lr} \\cdot \\frac{\\partial L}{\\partial w} $$
///
/// Unlike a fused update-and-reset, the gradient is left untouched; clearing
/// it is the optimizer's `zero_grad`.
pub fn sgd(value: &mut Ten64, grad: &Ten64, lr: f64) {
    value
        .data
        .par_iter_mut()
        .zip(grad.data.par_iter())
        .for_each(|(w, g)| *w -= lr * g);
}
