//! Derivative drivers for functions written once over [`Scalar`].
//!
//! Every reverse-mode driver works inside a nesting frame of the caller's
//! tape: the tape is left exactly as it was found, including when the driver
//! returns an error or `f` panics.
//!
//! | driver | mode | cost |
//! |---|---|---|
//! | [`derivative`] | forward | one pass |
//! | [`partial_derivative`] | forward | one pass |
//! | [`gradient_dot_vector`] | forward | one pass |
//! | [`gradient`] | reverse | one pass + one sweep |
//! | [`jacobian`] | reverse | one pass + one sweep per output |
//! | [`hessian`] | forward over reverse | one pass + one sweep per input |
//! | [`hessian_times_vector`] | forward over reverse | one pass + one sweep |
//! | [`grad_tr_mat_times_hessian`] | forward over forward over reverse | one pass per input + one sweep |
//! | [`finite_diff_gradient`] | central differences | two passes per input |

use crate::dual::Dual;
use crate::error::{Error, Result};
use crate::scalar::Scalar;
use crate::tape::Tape;
use crate::var::Var;
use nalgebra::DMatrix;

/// A scalar-valued function `f: R^n -> R`, generic over the evaluation type.
pub trait ScalarFn {
    /// Evaluate at `x`.
    fn eval<S: Scalar>(&self, x: &[S]) -> S;
}

/// A vector-valued function `f: R^n -> R^m`, generic over the evaluation type.
pub trait VectorFn {
    /// Evaluate at `x`.
    fn eval<S: Scalar>(&self, x: &[S]) -> Vec<S>;
}

fn check_inputs(what: &str, x: &[f64]) -> Result<()> {
    if x.is_empty() {
        return Err(Error::Validation(format!("{what}: at least one input is required")));
    }
    Ok(())
}

fn check_direction<T>(what: &str, x: &[T], v: &[T]) -> Result<()> {
    if x.len() != v.len() {
        return Err(Error::Validation(format!(
            "{what}: direction has length {}, expected {}",
            v.len(),
            x.len()
        )));
    }
    Ok(())
}

/// `(f(x), f'(x))` for a univariate function, by forward mode.
pub fn derivative(f: impl Fn(Dual<f64>) -> Dual<f64>, x: f64) -> (f64, f64) {
    let y = f(Dual::var(x));
    (y.val, y.dot)
}

/// `(f(x), ∂f/∂x_n)` by one forward pass seeded on input `n`.
///
/// # Errors
///
/// [`Error::Validation`] if `n` is not an index into `x`.
pub fn partial_derivative<F: ScalarFn>(f: &F, x: &[f64], n: usize) -> Result<(f64, f64)> {
    if n >= x.len() {
        return Err(Error::Validation(format!(
            "partial_derivative: index {n} out of range for {} inputs",
            x.len()
        )));
    }
    let xs: Vec<Dual<f64>> = x
        .iter()
        .enumerate()
        .map(|(k, &xk)| if k == n { Dual::var(xk) } else { Dual::constant(xk) })
        .collect();
    let y = f.eval(&xs);
    Ok((y.val, y.dot))
}

/// `(f(x), ∇f(x)·v)`: the directional derivative, by one forward pass.
///
/// Generic over the scalar, so it composes: over `f64` it is plain forward
/// mode, over `Dual<Var>` the result is itself differentiable to third order.
///
/// # Errors
///
/// [`Error::Validation`] if `v` and `x` differ in length.
pub fn gradient_dot_vector<T: Scalar, F: ScalarFn>(f: &F, x: &[T], v: &[T]) -> Result<(T, T)> {
    check_direction("gradient_dot_vector", x, v)?;
    let xs: Vec<Dual<T>> = x.iter().zip(v).map(|(&xi, &vi)| Dual::new(xi, vi)).collect();
    let y = f.eval(&xs);
    Ok((y.val, y.dot))
}

/// `(f(x), ∇f(x))` by one reverse sweep.
///
/// # Errors
///
/// [`Error::Validation`] if `x` is empty.
pub fn gradient<F: ScalarFn>(tape: &Tape, f: &F, x: &[f64]) -> Result<(f64, Vec<f64>)> {
    check_inputs("gradient", x)?;
    let _frame = tape.nested();
    let xs = tape.vars(x);
    let fx = f.eval(&xs);
    let grad = tape.grad(fx, &xs)?;
    Ok((fx.val(), grad))
}

/// `(f(x), J)` with `J[(i, k)] = ∂f_i/∂x_k`.
///
/// # Errors
///
/// [`Error::Validation`] if `x` is empty.
pub fn jacobian<F: VectorFn>(tape: &Tape, f: &F, x: &[f64]) -> Result<(Vec<f64>, DMatrix<f64>)> {
    check_inputs("jacobian", x)?;
    let _frame = tape.nested();
    let xs = tape.vars(x);
    let fx = f.eval(&xs);

    let mut jac = DMatrix::zeros(fx.len(), x.len());
    for (i, &fi) in fx.iter().enumerate() {
        tape.backward(fi)?;
        for (k, xk) in xs.iter().enumerate() {
            jac[(i, k)] = xk.adjoint();
        }
    }
    Ok((fx.iter().map(|v| v.val()).collect(), jac))
}

/// `(f(x), ∇f(x), H)` where `H[(i, k)] = ∂²f/∂x_i∂x_k`.
///
/// Column `i` comes from one `Dual<Var>` pass with tangent `e_i` and one
/// reverse sweep from the tangent output, each in its own nesting frame.
///
/// # Errors
///
/// [`Error::Validation`] if `x` is empty.
pub fn hessian<F: ScalarFn>(
    tape: &Tape,
    f: &F,
    x: &[f64],
) -> Result<(f64, Vec<f64>, DMatrix<f64>)> {
    check_inputs("hessian", x)?;
    let n = x.len();
    let mut fx = 0.0;
    let mut grad = vec![0.0; n];
    let mut hess = DMatrix::zeros(n, n);

    for i in 0..n {
        let _frame = tape.nested();
        let xs: Vec<Dual<_>> = x
            .iter()
            .enumerate()
            .map(|(k, &xk)| Dual::new(tape.var(xk), tape.var(if k == i { 1.0 } else { 0.0 })))
            .collect();
        let y = f.eval(&xs);
        if i == 0 {
            fx = y.val.val();
        }
        grad[i] = y.dot.val();

        tape.backward(y.dot)?;
        for (k, xk) in xs.iter().enumerate() {
            hess[(i, k)] = xk.val.adjoint();
        }
    }
    Ok((fx, grad, hess))
}

/// `(f(x), H·v)` from a single forward-over-reverse pass.
///
/// # Errors
///
/// [`Error::Validation`] if `x` is empty or `v` differs from it in length.
pub fn hessian_times_vector<F: ScalarFn>(
    tape: &Tape,
    f: &F,
    x: &[f64],
    v: &[f64],
) -> Result<(f64, Vec<f64>)> {
    check_inputs("hessian_times_vector", x)?;
    check_direction("hessian_times_vector", x, v)?;
    let _frame = tape.nested();
    let xs: Vec<Dual<_>> =
        x.iter().zip(v).map(|(&xi, &vi)| Dual::new(tape.var(xi), tape.var(vi))).collect();
    let y = f.eval(&xs);
    tape.backward(y.dot)?;
    Ok((y.val.val(), xs.iter().map(|xk| xk.val.adjoint()).collect()))
}

/// `∇ tr(M·H(x))`, the gradient of the trace of `M` times the Hessian of `f`.
///
/// Term `n` of the trace is `d/dε [∇f(x + ε e_n) · M_n]` with `M_n` the
/// `n`-th row of `M`, evaluated over `Dual<Dual<Var>>`; the terms are summed
/// on the tape and differentiated in one reverse sweep.
///
/// # Errors
///
/// [`Error::Validation`] if `x` is empty or `M` is not `n × n`.
pub fn grad_tr_mat_times_hessian<F: ScalarFn>(
    tape: &Tape,
    f: &F,
    x: &[f64],
    m: &DMatrix<f64>,
) -> Result<Vec<f64>> {
    check_inputs("grad_tr_mat_times_hessian", x)?;
    let n = x.len();
    if m.shape() != (n, n) {
        return Err(Error::Validation(format!(
            "grad_tr_mat_times_hessian: matrix is {}x{}, expected {n}x{n}",
            m.nrows(),
            m.ncols()
        )));
    }

    let _frame = tape.nested();
    let xs = tape.vars(x);
    let mut terms: Vec<Var<'_>> = Vec::with_capacity(n);
    for i in 0..n {
        let seeded: Vec<Dual<Var<'_>>> = xs
            .iter()
            .enumerate()
            .map(|(k, &xk)| Dual::new(xk, tape.var(if k == i { 1.0 } else { 0.0 })))
            .collect();
        let row: Vec<Dual<Var<'_>>> =
            (0..n).map(|k| Dual::new(tape.var(m[(i, k)]), tape.var(0.0))).collect();
        let (_, directional) = gradient_dot_vector(f, &seeded, &row)?;
        terms.push(directional.dot);
    }
    let trace = tape.sum(&terms);
    tape.grad(trace, &xs)
}

/// `(f(x), ∇f(x))` by central differences with step `eps` (scaled by
/// `max(|x_i|, 1)`). Used to cross-check the AD drivers.
pub fn finite_diff_gradient<F: ScalarFn>(f: &F, x: &[f64], eps: f64) -> (f64, Vec<f64>) {
    let fx = f.eval(x);
    let mut xh = x.to_vec();
    let grad = (0..x.len())
        .map(|i| {
            let h = eps * x[i].abs().max(1.0);
            xh[i] = x[i] + h;
            let up = f.eval(&xh);
            xh[i] = x[i] - h;
            let down = f.eval(&xh);
            xh[i] = x[i];
            (up - down) / (2.0 * h)
        })
        .collect();
    (fx, grad)
}
