//! Value and local-partial formulas for the elementary primitives.
//!
//! Every primitive is described once here, independent of which of its
//! operands are differentiable. The node layer evaluates [`UnaryOp::eval`] /
//! [`BinaryOp::eval`] at construction and calls the partial functions during
//! `propagate`, and only for the operands that are handles.

use crate::math::{self, SQRT_PI};
use statrs::function::{erf, gamma};
use std::f64::consts::{LN_2, LN_10};

/// One-operand primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Exp2,
    ExpM1,
    Ln,
    Log2,
    Log10,
    Ln1p,
    Sqrt,
    Cbrt,
    Square,
    Recip,
    Powi(i32),
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Abs,
    Floor,
    Ceil,
    Round,
    Trunc,
    Erf,
    Erfc,
    LnGamma,
    InvLogit,
    Logit,
    Log1pExp,
    LogInvLogit,
}

impl UnaryOp {
    /// Forward value.
    pub(crate) fn eval(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Exp2 => x.exp2(),
            UnaryOp::ExpM1 => x.exp_m1(),
            UnaryOp::Ln => x.ln(),
            UnaryOp::Log2 => x.log2(),
            UnaryOp::Log10 => x.log10(),
            UnaryOp::Ln1p => x.ln_1p(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Cbrt => x.cbrt(),
            UnaryOp::Square => x * x,
            UnaryOp::Recip => 1.0 / x,
            UnaryOp::Powi(n) => x.powi(n),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Asin => x.asin(),
            UnaryOp::Acos => x.acos(),
            UnaryOp::Atan => x.atan(),
            UnaryOp::Sinh => x.sinh(),
            UnaryOp::Cosh => x.cosh(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Asinh => x.asinh(),
            UnaryOp::Acosh => x.acosh(),
            UnaryOp::Atanh => x.atanh(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Round => x.round(),
            UnaryOp::Trunc => x.trunc(),
            UnaryOp::Erf => erf::erf(x),
            UnaryOp::Erfc => erf::erfc(x),
            UnaryOp::LnGamma => gamma::ln_gamma(x),
            UnaryOp::InvLogit => math::inv_logit(x),
            UnaryOp::Logit => math::logit(x),
            UnaryOp::Log1pExp => math::log1pexp(x),
            UnaryOp::LogInvLogit => math::log_inv_logit(x),
        }
    }

    /// `d value / d x`, given the operand `x` and the stored result `value`.
    pub(crate) fn partial(self, x: f64, value: f64) -> f64 {
        match self {
            UnaryOp::Neg => -1.0,
            UnaryOp::Exp => value,
            UnaryOp::Exp2 => value * LN_2,
            UnaryOp::ExpM1 => value + 1.0,
            UnaryOp::Ln => 1.0 / x,
            UnaryOp::Log2 => 1.0 / (x * LN_2),
            UnaryOp::Log10 => 1.0 / (x * LN_10),
            UnaryOp::Ln1p => 1.0 / (1.0 + x),
            UnaryOp::Sqrt => 0.5 / value,
            UnaryOp::Cbrt => 1.0 / (3.0 * value * value),
            UnaryOp::Square => 2.0 * x,
            UnaryOp::Recip => -value * value,
            UnaryOp::Powi(0) => 0.0,
            UnaryOp::Powi(n) => n as f64 * x.powi(n - 1),
            UnaryOp::Sin => x.cos(),
            UnaryOp::Cos => -x.sin(),
            UnaryOp::Tan => 1.0 + value * value,
            UnaryOp::Asin => 1.0 / (1.0 - x * x).sqrt(),
            UnaryOp::Acos => -1.0 / (1.0 - x * x).sqrt(),
            UnaryOp::Atan => 1.0 / (1.0 + x * x),
            UnaryOp::Sinh => x.cosh(),
            UnaryOp::Cosh => x.sinh(),
            UnaryOp::Tanh => 1.0 - value * value,
            UnaryOp::Asinh => 1.0 / (x * x + 1.0).sqrt(),
            UnaryOp::Acosh => 1.0 / (x * x - 1.0).sqrt(),
            UnaryOp::Atanh => 1.0 / (1.0 - x * x),
            // Zero at the kink.
            UnaryOp::Abs => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Round | UnaryOp::Trunc => 0.0,
            UnaryOp::Erf => 2.0 / SQRT_PI * (-x * x).exp(),
            UnaryOp::Erfc => -2.0 / SQRT_PI * (-x * x).exp(),
            UnaryOp::LnGamma => gamma::digamma(x),
            UnaryOp::InvLogit => value * (1.0 - value),
            UnaryOp::Logit => 1.0 / (x * (1.0 - x)),
            UnaryOp::Log1pExp => math::inv_logit(x),
            UnaryOp::LogInvLogit => math::inv_logit(-x),
        }
    }
}

/// Two-operand primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Atan2,
    Hypot,
    Fmax,
    Fmin,
    Fdim,
    Fmod,
    LogSumExp,
}

impl BinaryOp {
    /// Forward value.
    pub(crate) fn eval(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Atan2 => a.atan2(b),
            BinaryOp::Hypot => a.hypot(b),
            BinaryOp::Fmax => {
                if a >= b {
                    a
                } else {
                    b
                }
            }
            BinaryOp::Fmin => {
                if a <= b {
                    a
                } else {
                    b
                }
            }
            BinaryOp::Fdim => {
                if a > b {
                    a - b
                } else {
                    0.0
                }
            }
            BinaryOp::Fmod => a % b,
            BinaryOp::LogSumExp => math::log_sum_exp2(a, b),
        }
    }

    /// `d value / d a`.
    pub(crate) fn partial_lhs(self, a: f64, b: f64, value: f64) -> f64 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1.0,
            BinaryOp::Mul => b,
            BinaryOp::Div => 1.0 / b,
            BinaryOp::Pow => {
                if b == 0.0 {
                    0.0
                } else {
                    b * a.powf(b - 1.0)
                }
            }
            BinaryOp::Atan2 => b / (a * a + b * b),
            BinaryOp::Hypot => a / value,
            BinaryOp::Fmax => f64::from(a >= b),
            BinaryOp::Fmin => f64::from(a <= b),
            BinaryOp::Fdim => f64::from(a > b),
            BinaryOp::Fmod => 1.0,
            BinaryOp::LogSumExp => (a - value).exp(),
        }
    }

    /// `d value / d b`.
    pub(crate) fn partial_rhs(self, a: f64, b: f64, value: f64) -> f64 {
        match self {
            BinaryOp::Add => 1.0,
            BinaryOp::Sub => -1.0,
            BinaryOp::Mul => a,
            BinaryOp::Div => -value / b,
            // `0^b` is flat in `b` wherever it is defined; avoids `0 * ln(0)`.
            BinaryOp::Pow => {
                if a == 0.0 {
                    0.0
                } else {
                    a.ln() * value
                }
            }
            BinaryOp::Atan2 => -a / (a * a + b * b),
            BinaryOp::Hypot => b / value,
            BinaryOp::Fmax => f64::from(a < b),
            BinaryOp::Fmin => f64::from(a > b),
            BinaryOp::Fdim => -f64::from(a > b),
            BinaryOp::Fmod => -(a / b).trunc(),
            BinaryOp::LogSumExp => (b - value).exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn central_diff(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6 * x.abs().max(1.0);
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn test_unary_partials_match_central_differences() {
        let cases: &[(UnaryOp, f64)] = &[
            (UnaryOp::Exp, 0.7),
            (UnaryOp::Exp2, 0.7),
            (UnaryOp::ExpM1, -0.3),
            (UnaryOp::Ln, 2.5),
            (UnaryOp::Log2, 2.5),
            (UnaryOp::Log10, 2.5),
            (UnaryOp::Ln1p, 0.4),
            (UnaryOp::Sqrt, 3.0),
            (UnaryOp::Cbrt, 3.0),
            (UnaryOp::Square, -1.5),
            (UnaryOp::Recip, 1.7),
            (UnaryOp::Powi(3), 1.3),
            (UnaryOp::Powi(-2), 1.3),
            (UnaryOp::Sin, 0.9),
            (UnaryOp::Cos, 0.9),
            (UnaryOp::Tan, 0.4),
            (UnaryOp::Asin, 0.3),
            (UnaryOp::Acos, 0.3),
            (UnaryOp::Atan, 1.2),
            (UnaryOp::Sinh, 0.8),
            (UnaryOp::Cosh, 0.8),
            (UnaryOp::Tanh, 0.8),
            (UnaryOp::Asinh, 0.8),
            (UnaryOp::Acosh, 1.8),
            (UnaryOp::Atanh, 0.5),
            (UnaryOp::Abs, -2.0),
            (UnaryOp::Erf, 0.6),
            (UnaryOp::Erfc, 0.6),
            (UnaryOp::LnGamma, 3.7),
            (UnaryOp::InvLogit, 0.3),
            (UnaryOp::Logit, 0.3),
            (UnaryOp::Log1pExp, -1.1),
            (UnaryOp::LogInvLogit, -1.1),
        ];
        for &(op, x) in cases {
            let value = op.eval(x);
            let analytic = op.partial(x, value);
            let numeric = central_diff(|t| op.eval(t), x);
            assert_relative_eq!(analytic, numeric, epsilon = 1e-6, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_binary_partials_match_central_differences() {
        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Pow,
            BinaryOp::Atan2,
            BinaryOp::Hypot,
            BinaryOp::Fmax,
            BinaryOp::Fmin,
            BinaryOp::Fdim,
            BinaryOp::Fmod,
            BinaryOp::LogSumExp,
        ];
        let (a, b) = (2.3, 1.4);
        for op in ops {
            let value = op.eval(a, b);
            let da = central_diff(|t| op.eval(t, b), a);
            let db = central_diff(|t| op.eval(a, t), b);
            assert_relative_eq!(op.partial_lhs(a, b, value), da, epsilon = 1e-6);
            assert_relative_eq!(op.partial_rhs(a, b, value), db, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pow_partials_at_zero_base() {
        let value = BinaryOp::Pow.eval(0.0, 2.0);
        assert_eq!(BinaryOp::Pow.partial_lhs(0.0, 2.0, value), 0.0);
        assert_eq!(BinaryOp::Pow.partial_rhs(0.0, 2.0, value), 0.0);
    }

    #[test]
    fn test_abs_partial_is_zero_at_kink() {
        assert_eq!(UnaryOp::Abs.partial(0.0, 0.0), 0.0);
    }
}
