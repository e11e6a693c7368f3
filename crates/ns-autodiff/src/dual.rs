//! Forward-mode automatic differentiation via dual numbers.
//!
//! `Dual<T>` carries a primal value and one tangent, both of the same
//! [`Scalar`] type. With `T = f64` it is plain forward mode. With
//! `T = Var<'t>` both components are recorded on a tape, so a reverse sweep
//! from the tangent differentiates a directional derivative: this is the
//! forward-over-reverse composition the Hessian drivers in
//! [`functional`](crate::functional) use.

use crate::scalar::Scalar;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A dual number `val + dot·ε` with `ε² = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual<T> {
    /// Primal (function) value.
    pub val: T,
    /// Tangent (derivative) value.
    pub dot: T,
}

impl<T> Dual<T> {
    /// Create a dual with explicit tangent.
    #[inline]
    pub fn new(val: T, dot: T) -> Self {
        Self { val, dot }
    }
}

impl Dual<f64> {
    /// Create a constant (derivative = 0).
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// Create an independent variable (derivative = 1).
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }
}

impl<T: Scalar> Dual<T> {
    /// Natural logarithm: d/dx ln(x) = 1/x.
    #[inline]
    pub fn ln(self) -> Self {
        Self { val: self.val.ln(), dot: self.dot / self.val }
    }

    /// Exponential: d/dx exp(x) = exp(x).
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        Self { val: e, dot: self.dot * e }
    }

    /// Square root: d/dx sqrt(x) = 1/(2*sqrt(x)).
    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self { val: s, dot: self.dot / (s * 2.0) }
    }

    /// Power with f64 exponent: d/dx x^n = n * x^(n-1).
    #[inline]
    pub fn powf(self, n: f64) -> Self {
        if n == 0.0 {
            return Self { val: self.val.powf(0.0), dot: self.dot * 0.0 };
        }
        Self { val: self.val.powf(n), dot: self.dot * self.val.powf(n - 1.0) * n }
    }

    /// Integer power: d/dx x^n = n * x^(n-1).
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self { val: self.val.powi(0), dot: self.dot * 0.0 };
        }
        Self { val: self.val.powi(n), dot: self.dot * self.val.powi(n - 1) * f64::from(n) }
    }

    /// General power `x^y` with a dual exponent.
    ///
    /// Uses `ln(x)` for the exponent tangent, so a negative base gives a NaN
    /// tangent even when `y` is an integer; use [`powi`](Self::powi) there.
    #[inline]
    pub fn pow(self, e: Self) -> Self {
        let v = self.val.pow(e.val);
        let dot = v * (e.dot * self.val.ln() + e.val * self.dot / self.val);
        Self { val: v, dot }
    }

    /// Absolute value: d/dx |x| = sign(x), 0 at the kink.
    #[inline]
    pub fn abs(self) -> Self {
        let x = self.val.value();
        let sign = if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        };
        Self { val: self.val.abs(), dot: self.dot * sign }
    }

    /// Sine.
    #[inline]
    pub fn sin(self) -> Self {
        Self { val: self.val.sin(), dot: self.dot * self.val.cos() }
    }

    /// Cosine.
    #[inline]
    pub fn cos(self) -> Self {
        Self { val: self.val.cos(), dot: -(self.dot * self.val.sin()) }
    }

    /// Hyperbolic tangent: d/dx tanh(x) = 1 - tanh(x)^2.
    #[inline]
    pub fn tanh(self) -> Self {
        let t = self.val.tanh();
        Self { val: t, dot: self.dot * (-t.square() + 1.0) }
    }

    /// `ln(1 + x)`.
    #[inline]
    pub fn ln_1p(self) -> Self {
        Self { val: self.val.ln_1p(), dot: self.dot / (self.val + 1.0) }
    }

    /// `e^x - 1`.
    #[inline]
    pub fn exp_m1(self) -> Self {
        Self { val: self.val.exp_m1(), dot: self.dot * self.val.exp() }
    }

    /// `x * x`.
    #[inline]
    pub fn square(self) -> Self {
        Self { val: self.val.square(), dot: self.dot * self.val * 2.0 }
    }

    /// `1 / x`.
    #[inline]
    pub fn recip(self) -> Self {
        let r = self.val.recip();
        Self { val: r, dot: -(self.dot * r.square()) }
    }

    /// Logistic sigmoid.
    #[inline]
    pub fn inv_logit(self) -> Self {
        let s = self.val.inv_logit();
        Self { val: s, dot: self.dot * s * (-s + 1.0) }
    }

    /// `ln(1 + e^x)`.
    #[inline]
    pub fn log1p_exp(self) -> Self {
        Self { val: self.val.log1p_exp(), dot: self.dot * self.val.inv_logit() }
    }

    /// Maximum of two duals. Derivative follows the larger operand.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self.val.value() >= other.val.value() { self } else { other }
    }
}

// --- Arithmetic: Dual op Dual ---

impl<T: Scalar> Add for Dual<T> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self { val: self.val + rhs.val, dot: self.dot + rhs.dot }
    }
}

impl<T: Scalar> Sub for Dual<T> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self { val: self.val - rhs.val, dot: self.dot - rhs.dot }
    }
}

impl<T: Scalar> Mul for Dual<T> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self { val: self.val * rhs.val, dot: self.dot * rhs.val + self.val * rhs.dot }
    }
}

impl<T: Scalar> Div for Dual<T> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self {
            val: self.val / rhs.val,
            dot: (self.dot * rhs.val - self.val * rhs.dot) / rhs.val.square(),
        }
    }
}

impl<T: Scalar> Neg for Dual<T> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self { val: -self.val, dot: -self.dot }
    }
}

// --- Arithmetic: Dual op f64, f64 op Dual ---

impl<T: Scalar> Add<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: f64) -> Self {
        Self { val: self.val + rhs, dot: self.dot }
    }
}

impl<T: Scalar> Sub<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: f64) -> Self {
        Self { val: self.val - rhs, dot: self.dot }
    }
}

impl<T: Scalar> Mul<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self { val: self.val * rhs, dot: self.dot * rhs }
    }
}

impl<T: Scalar> Div<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: f64) -> Self {
        Self { val: self.val / rhs, dot: self.dot / rhs }
    }
}

impl<T: Scalar> Add<Dual<T>> for f64 {
    type Output = Dual<T>;
    #[inline]
    fn add(self, rhs: Dual<T>) -> Dual<T> {
        rhs + self
    }
}

impl<T: Scalar> Sub<Dual<T>> for f64 {
    type Output = Dual<T>;
    #[inline]
    fn sub(self, rhs: Dual<T>) -> Dual<T> {
        -rhs + self
    }
}

impl<T: Scalar> Mul<Dual<T>> for f64 {
    type Output = Dual<T>;
    #[inline]
    fn mul(self, rhs: Dual<T>) -> Dual<T> {
        rhs * self
    }
}

impl<T: Scalar> Div<Dual<T>> for f64 {
    type Output = Dual<T>;
    #[inline]
    fn div(self, rhs: Dual<T>) -> Dual<T> {
        rhs.recip() * self
    }
}

// --- Sum ---

impl Sum for Dual<f64> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), |acc, x| acc + x)
    }
}

// --- From ---

impl From<f64> for Dual<f64> {
    fn from(val: f64) -> Self {
        Self::constant(val)
    }
}

// --- PartialOrd ---

impl<T: Scalar> PartialOrd for Dual<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.val.value().partial_cmp(&other.val.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_has_zero_derivative() {
        let c = Dual::constant(5.0);
        assert_eq!(c.val, 5.0);
        assert_eq!(c.dot, 0.0);
    }

    #[test]
    fn test_var_has_unit_derivative() {
        let x = Dual::var(3.0);
        assert_eq!(x.val, 3.0);
        assert_eq!(x.dot, 1.0);
    }

    #[test]
    fn test_ln_derivative() {
        // d/dx ln(x) = 1/x
        let y = Dual::var(2.0).ln();
        assert_relative_eq!(y.val, 2.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(y.dot, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_quotient_rule_with_constants() {
        // f = 3 / x - 1, f' = -3 / x^2
        let x = Dual::var(2.0);
        let y = 3.0 / x - 1.0;
        assert_relative_eq!(y.val, 0.5, epsilon = 1e-12);
        assert_relative_eq!(y.dot, -0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_pow_with_dual_exponent() {
        // d/dx x^x = x^x (ln x + 1)
        let x = Dual::var(1.7);
        let y = x.pow(x);
        let v = 1.7f64.powf(1.7);
        assert_relative_eq!(y.val, v, epsilon = 1e-12);
        assert_relative_eq!(y.dot, v * (1.7f64.ln() + 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_powi_zero_at_origin_is_finite() {
        let y = Dual::var(0.0).powi(0);
        assert_eq!(y.val, 1.0);
        assert_eq!(y.dot, 0.0);
    }

    #[test]
    fn test_sum_of_duals() {
        let total: Dual<f64> = [Dual::var(1.0), Dual::constant(2.0), Dual::var(3.0)].into_iter().sum();
        assert_eq!(total.val, 6.0);
        assert_eq!(total.dot, 2.0);
    }

    #[test]
    fn test_dual_over_var_second_derivative() {
        // f = x^3: tangent is f' = 3x^2; reverse over the tangent gives f'' = 6x.
        let t = Tape::new();
        let x = Dual::new(t.var(2.0), t.var(1.0));
        let f = x * x * x;
        assert_relative_eq!(f.val.val(), 8.0, epsilon = 1e-12);
        assert_relative_eq!(f.dot.val(), 12.0, epsilon = 1e-12);

        t.backward(f.dot).unwrap();
        assert_relative_eq!(x.val.adjoint(), 12.0, epsilon = 1e-12);
    }
}
