//! [`Scalar`] trait: abstraction over `f64`, [`Var`] and [`Dual`] that
//! enables writing an objective once, then reusing it for plain evaluation,
//! reverse-mode gradients and forward-over-reverse Hessians.
//!
//! Constants enter through the `f64` operator impls (`x * 2.0`, `x + 1.0`)
//! rather than a conversion, so on a tape a constant never becomes a leaf.

use crate::dual::Dual;
use crate::math;
use crate::var::Var;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A scalar type suitable for writing differentiable objectives.
///
/// Implemented for `f64` (plain evaluation), [`Var`] (reverse mode) and
/// [`Dual<T>`] over any scalar (forward mode, nestable over `Var`).
pub trait Scalar:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + Neg<Output = Self>
    + PartialOrd
{
    /// Extract the primal (function) value.
    fn value(&self) -> f64;

    /// Natural logarithm.
    fn ln(self) -> Self;

    /// Exponential.
    fn exp(self) -> Self;

    /// Square root.
    fn sqrt(self) -> Self;

    /// Power with f64 exponent.
    fn powf(self, n: f64) -> Self;

    /// Integer power.
    fn powi(self, n: i32) -> Self;

    /// Power with an exponent of the same type.
    fn pow(self, e: Self) -> Self;

    /// Absolute value.
    fn abs(self) -> Self;

    /// Sine.
    fn sin(self) -> Self;

    /// Cosine.
    fn cos(self) -> Self;

    /// Hyperbolic tangent.
    fn tanh(self) -> Self;

    /// `ln(1 + x)`.
    fn ln_1p(self) -> Self;

    /// `e^x - 1`.
    fn exp_m1(self) -> Self;

    /// `x * x`.
    fn square(self) -> Self;

    /// `1 / x`.
    fn recip(self) -> Self;

    /// Logistic sigmoid.
    fn inv_logit(self) -> Self;

    /// `ln(1 + e^x)`.
    fn log1p_exp(self) -> Self;

    /// Maximum of two values (non-smooth; passes derivative of the winner).
    fn max_s(self, other: Self) -> Self;
}

// --- f64 implementation ---

impl Scalar for f64 {
    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn pow(self, e: Self) -> Self {
        f64::powf(self, e)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    #[inline]
    fn ln_1p(self) -> Self {
        f64::ln_1p(self)
    }

    #[inline]
    fn exp_m1(self) -> Self {
        f64::exp_m1(self)
    }

    #[inline]
    fn square(self) -> Self {
        self * self
    }

    #[inline]
    fn recip(self) -> Self {
        f64::recip(self)
    }

    #[inline]
    fn inv_logit(self) -> Self {
        math::inv_logit(self)
    }

    #[inline]
    fn log1p_exp(self) -> Self {
        math::log1pexp(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        f64::max(self, other)
    }
}

// --- Var implementation ---

impl<'t> Scalar for Var<'t> {
    #[inline]
    fn value(&self) -> f64 {
        self.val()
    }

    #[inline]
    fn ln(self) -> Self {
        Var::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Var::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Var::sqrt(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        Var::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Var::powi(self, n)
    }

    #[inline]
    fn pow(self, e: Self) -> Self {
        Var::pow(self, e)
    }

    #[inline]
    fn abs(self) -> Self {
        Var::abs(self)
    }

    #[inline]
    fn sin(self) -> Self {
        Var::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        Var::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        Var::tanh(self)
    }

    #[inline]
    fn ln_1p(self) -> Self {
        Var::ln_1p(self)
    }

    #[inline]
    fn exp_m1(self) -> Self {
        Var::exp_m1(self)
    }

    #[inline]
    fn square(self) -> Self {
        Var::square(self)
    }

    #[inline]
    fn recip(self) -> Self {
        Var::recip(self)
    }

    #[inline]
    fn inv_logit(self) -> Self {
        Var::inv_logit(self)
    }

    #[inline]
    fn log1p_exp(self) -> Self {
        Var::log1p_exp(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        Var::fmax(self, other)
    }
}

// --- Dual implementation ---

impl<T: Scalar> Scalar for Dual<T> {
    #[inline]
    fn value(&self) -> f64 {
        self.val.value()
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn pow(self, e: Self) -> Self {
        Dual::pow(self, e)
    }

    #[inline]
    fn abs(self) -> Self {
        Dual::abs(self)
    }

    #[inline]
    fn sin(self) -> Self {
        Dual::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        Dual::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        Dual::tanh(self)
    }

    #[inline]
    fn ln_1p(self) -> Self {
        Dual::ln_1p(self)
    }

    #[inline]
    fn exp_m1(self) -> Self {
        Dual::exp_m1(self)
    }

    #[inline]
    fn square(self) -> Self {
        Dual::square(self)
    }

    #[inline]
    fn recip(self) -> Self {
        Dual::recip(self)
    }

    #[inline]
    fn inv_logit(self) -> Self {
        Dual::inv_logit(self)
    }

    #[inline]
    fn log1p_exp(self) -> Self {
        Dual::log1p_exp(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        Dual::max(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;
    use approx::assert_relative_eq;

    /// Generic Poisson NLL for a single bin.
    fn poisson_nll_bin<S: Scalar>(obs: f64, expected: S) -> S {
        let expected = expected.max_s(expected * 0.0 + 1e-10);
        if obs > 0.0 { expected - expected.ln() * obs } else { expected }
    }

    #[test]
    fn test_scalar_f64_poisson() {
        let nll = poisson_nll_bin::<f64>(10.0, 12.0);
        let expected = 12.0 - 10.0 * 12.0_f64.ln();
        assert_relative_eq!(nll, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_dual_poisson_gradient() {
        // d/dlam [lam - n*ln(lam)] = 1 - n/lam
        let lam = Dual::var(12.0);
        let nll = poisson_nll_bin(10.0, lam);
        assert_relative_eq!(nll.dot, 1.0 - 10.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_var_poisson_gradient() {
        let t = Tape::new();
        let lam = t.var(12.0);
        let nll = poisson_nll_bin(10.0, lam);
        t.backward(nll).unwrap();
        assert_relative_eq!(lam.adjoint(), 1.0 - 10.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_generic_code_works_for_all() {
        fn quadratic<S: Scalar>(x: S) -> S {
            x * x + x * 3.0 + 2.0
        }

        // f64: just value
        let val: f64 = quadratic(3.0);
        assert_relative_eq!(val, 20.0, epsilon = 1e-12);

        // Dual: value + derivative (d/dx [x^2 + 3x + 2] = 2x + 3)
        let dual_result = quadratic(Dual::var(3.0));
        assert_relative_eq!(dual_result.val, 20.0, epsilon = 1e-12);
        assert_relative_eq!(dual_result.dot, 9.0, epsilon = 1e-12);

        // Var: same derivative from the reverse sweep
        let t = Tape::new();
        let x = t.var(3.0);
        let y = quadratic(x);
        t.backward(y).unwrap();
        assert_relative_eq!(y.value(), 20.0, epsilon = 1e-12);
        assert_relative_eq!(x.adjoint(), 9.0, epsilon = 1e-12);
    }
}
