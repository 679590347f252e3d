//! Finite-difference utilities for checking analytic gradients.

use crate::error::Result;
use crate::variable::Variable;

/// Gradients of `f` at `point` by central differences.
///
/// # Example
/// ```
/// use briny_grad::gradcheck::finite_diff_grad;
///
/// // f(x, y) = x^2 + y^2
/// let f = |v: &[f64]| v[0] * v[0] + v[1] * v[1];
/// let grads = finite_diff_grad(f, &[3.0, 4.0], 1e-6);
///
/// assert!((grads[0] - 6.0).abs() < 1e-5);
/// assert!((grads[1] - 8.0).abs() < 1e-5);
/// ```
pub fn finite_diff_grad<F>(f: F, point: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut perturbed = point.to_vec();
    let mut grads = Vec::with_capacity(point.len());

    for i in 0..point.len() {
        perturbed[i] = point[i] + eps;
        let f_plus = f(&perturbed);
        perturbed[i] = point[i] - eps;
        let f_minus = f(&perturbed);
        perturbed[i] = point[i];

        grads.push((f_plus - f_minus) / (2.0 * eps));
    }

    grads
}

/// Numeric gradient of `loss` with respect to every element of `param`.
///
/// Each element of the parameter is nudged in place by `±eps`, `loss` is
/// re-evaluated, and the original value is restored before returning.
/// `loss` should rebuild whatever it needs from the parameter's current
/// value (typically a fresh forward pass on a scratch tape).
pub fn numeric_parameter_grad<F>(param: &Variable, eps: f64, mut loss: F) -> Result<Vec<f64>>
where
    F: FnMut() -> Result<f64>,
{
    let original = param.to_tensor();
    let mut grads = Vec::with_capacity(original.numel());

    for i in 0..original.numel() {
        let mut nudged = original.clone();

        nudged.data[i] = original.data[i] + eps;
        param.set_value(nudged.clone())?;
        let plus = loss();

        nudged.data[i] = original.data[i] - eps;
        param.set_value(nudged)?;
        let minus = loss();

        param.set_value(original.clone())?;
        grads.push((plus? - minus?) / (2.0 * eps));
    }

    Ok(grads)
}

/// Largest absolute element-wise difference between two gradient vectors.
///
/// # Panics
/// Panics if the lengths differ.
pub fn max_grad_error(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "gradient length mismatch");
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
