//! Differentiable primitives beyond the arithmetic operators.
//!
//! - Unary functions are inherent methods on [`Var`], named like their `f64`
//!   counterparts (`x.exp()`, `x.ln_1p()`, `x.powi(3)`).
//! - Binary functions exist both as methods (`x.atan2(y)`, `x.pow(2.5)`) and
//!   as free functions that also accept a constant on the left
//!   (`pow(2.0, x)`).
//! - N-ary reductions live on [`Tape`] and store their operand arrays in the
//!   tape's arena.

use crate::error::{Error, Result};
use crate::node::Op;
use crate::op::{BinaryOp, UnaryOp};
use crate::tape::Tape;
use crate::var::{BinaryOperands, Operand, TernaryOperands, Var, binary, ternary_fma};

impl<'t> Var<'t> {
    #[inline]
    fn unary(self, op: UnaryOp) -> Var<'t> {
        let tape = self.tape();
        tape.assert_live(self);
        Var::from_parts(tape, tape.record_unary(op, self.id()))
    }
}

macro_rules! unary_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr;)*) => {
        impl<'t> Var<'t> {
            $(
                $(#[$doc])*
                #[inline]
                pub fn $name(self) -> Var<'t> {
                    self.unary($op)
                }
            )*
        }
    };
}

unary_methods! {
    /// `e^x`.
    exp => UnaryOp::Exp;
    /// `2^x`.
    exp2 => UnaryOp::Exp2;
    /// `e^x - 1`, accurate near zero.
    exp_m1 => UnaryOp::ExpM1;
    /// Natural logarithm.
    ln => UnaryOp::Ln;
    /// Base-2 logarithm.
    log2 => UnaryOp::Log2;
    /// Base-10 logarithm.
    log10 => UnaryOp::Log10;
    /// `ln(1 + x)`, accurate near zero.
    ln_1p => UnaryOp::Ln1p;
    /// Square root.
    sqrt => UnaryOp::Sqrt;
    /// Cube root.
    cbrt => UnaryOp::Cbrt;
    /// `x * x` as a single node.
    square => UnaryOp::Square;
    /// `1 / x`.
    recip => UnaryOp::Recip;
    /// Sine.
    sin => UnaryOp::Sin;
    /// Cosine.
    cos => UnaryOp::Cos;
    /// Tangent.
    tan => UnaryOp::Tan;
    /// Arcsine.
    asin => UnaryOp::Asin;
    /// Arccosine.
    acos => UnaryOp::Acos;
    /// Arctangent.
    atan => UnaryOp::Atan;
    /// Hyperbolic sine.
    sinh => UnaryOp::Sinh;
    /// Hyperbolic cosine.
    cosh => UnaryOp::Cosh;
    /// Hyperbolic tangent.
    tanh => UnaryOp::Tanh;
    /// Inverse hyperbolic sine.
    asinh => UnaryOp::Asinh;
    /// Inverse hyperbolic cosine.
    acosh => UnaryOp::Acosh;
    /// Inverse hyperbolic tangent.
    atanh => UnaryOp::Atanh;
    /// Absolute value. The derivative at 0 is taken as 0.
    abs => UnaryOp::Abs;
    /// Floor. Piecewise constant: zero derivative.
    floor => UnaryOp::Floor;
    /// Ceiling. Piecewise constant: zero derivative.
    ceil => UnaryOp::Ceil;
    /// Round half away from zero. Piecewise constant: zero derivative.
    round => UnaryOp::Round;
    /// Integer part. Piecewise constant: zero derivative.
    trunc => UnaryOp::Trunc;
    /// Error function.
    erf => UnaryOp::Erf;
    /// Complementary error function.
    erfc => UnaryOp::Erfc;
    /// `ln Γ(x)`; the derivative is the digamma function.
    ln_gamma => UnaryOp::LnGamma;
    /// Logistic sigmoid `1 / (1 + e^-x)`.
    inv_logit => UnaryOp::InvLogit;
    /// `ln(x / (1 - x))`.
    logit => UnaryOp::Logit;
    /// `ln(1 + e^x)` without overflow.
    log1p_exp => UnaryOp::Log1pExp;
    /// `ln(inv_logit(x))` without underflow.
    log_inv_logit => UnaryOp::LogInvLogit;
}

impl<'t> Var<'t> {
    /// Integer power.
    #[inline]
    pub fn powi(self, n: i32) -> Var<'t> {
        self.unary(UnaryOp::Powi(n))
    }

    /// `self^e` for a handle or constant exponent.
    #[inline]
    pub fn pow(self, e: impl Operand<'t>) -> Var<'t> {
        binary((self, e), BinaryOp::Pow)
    }

    /// `self^e` for a constant exponent.
    #[inline]
    pub fn powf(self, e: f64) -> Var<'t> {
        binary((self, e), BinaryOp::Pow)
    }

    /// Four-quadrant arctangent of `self / x`.
    #[inline]
    pub fn atan2(self, x: impl Operand<'t>) -> Var<'t> {
        binary((self, x), BinaryOp::Atan2)
    }

    /// `sqrt(self^2 + other^2)`.
    #[inline]
    pub fn hypot(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::Hypot)
    }

    /// Larger operand; ties pass the derivative to `self`.
    #[inline]
    pub fn fmax(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::Fmax)
    }

    /// Smaller operand; ties pass the derivative to `self`.
    #[inline]
    pub fn fmin(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::Fmin)
    }

    /// Positive difference `max(self - other, 0)`.
    #[inline]
    pub fn fdim(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::Fdim)
    }

    /// Floating-point remainder with the sign of `self`.
    #[inline]
    pub fn fmod(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::Fmod)
    }

    /// `ln(e^self + e^other)` without overflow.
    #[inline]
    pub fn log_sum_exp(self, other: impl Operand<'t>) -> Var<'t> {
        binary((self, other), BinaryOp::LogSumExp)
    }

    /// `self * b + c` as a single node.
    #[inline]
    pub fn mul_add(self, b: impl Operand<'t>, c: impl Operand<'t>) -> Var<'t> {
        ternary_fma((self, b, c))
    }
}

macro_rules! binary_functions {
    ($($(#[$doc:meta])* $name:ident => $op:expr;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name<'t, A, B>(a: A, b: B) -> Var<'t>
            where
                (A, B): BinaryOperands<'t>,
            {
                binary((a, b), $op)
            }
        )*
    };
}

binary_functions! {
    /// `a^b`.
    pow => BinaryOp::Pow;
    /// Four-quadrant arctangent of `a / b`.
    atan2 => BinaryOp::Atan2;
    /// `sqrt(a^2 + b^2)`.
    hypot => BinaryOp::Hypot;
    /// Larger of `a` and `b`.
    fmax => BinaryOp::Fmax;
    /// Smaller of `a` and `b`.
    fmin => BinaryOp::Fmin;
    /// `max(a - b, 0)`.
    fdim => BinaryOp::Fdim;
    /// Remainder of `a / b` with the sign of `a`.
    fmod => BinaryOp::Fmod;
    /// `ln(e^a + e^b)`.
    log_sum_exp => BinaryOp::LogSumExp;
}

/// Fused `a * b + c` over any mix of handles and constants with at least one
/// handle.
#[inline]
pub fn fma<'t, A, B, C>(a: A, b: B, c: C) -> Var<'t>
where
    (A, B, C): TernaryOperands<'t>,
{
    ternary_fma((a, b, c))
}

// --- N-ary reductions ---

fn check_operands(tape: &Tape, xs: &[Var<'_>]) {
    for x in xs {
        assert!(std::ptr::eq(tape, x.tape()), "operands belong to different tapes");
    }
}

fn check_len(what: &str, lhs: usize, rhs: usize) -> Result<()> {
    if lhs != rhs {
        return Err(Error::Validation(format!("{what}: length mismatch ({lhs} vs {rhs})")));
    }
    Ok(())
}

impl Tape {
    /// `Σ xs[i]` as one node. The empty sum is 0.
    pub fn sum<'t>(&'t self, xs: &[Var<'t>]) -> Var<'t> {
        check_operands(self, xs);
        let value: f64 = xs.iter().map(|x| x.val()).sum();
        let slot = self.record_nary(|operands, _| {
            (value, Op::Sum(operands.alloc_iter(xs.iter().map(|x| x.id()))))
        });
        Var::from_parts(self, slot)
    }

    /// `Σ xs[i] * ys[i]` over two handle arrays.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the lengths differ.
    pub fn dot<'t>(&'t self, xs: &[Var<'t>], ys: &[Var<'t>]) -> Result<Var<'t>> {
        check_len("dot", xs.len(), ys.len())?;
        check_operands(self, xs);
        check_operands(self, ys);
        let value: f64 = xs.iter().zip(ys).map(|(x, y)| x.val() * y.val()).sum();
        let slot = self.record_nary(|operands, _| {
            let lhs = operands.alloc_iter(xs.iter().map(|x| x.id()));
            let rhs = operands.alloc_iter(ys.iter().map(|y| y.id()));
            (value, Op::DotVv(lhs, rhs))
        });
        Ok(Var::from_parts(self, slot))
    }

    /// `Σ xs[i] * cs[i]` with constant weights.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the lengths differ.
    pub fn dot_const<'t>(&'t self, xs: &[Var<'t>], cs: &[f64]) -> Result<Var<'t>> {
        check_len("dot_const", xs.len(), cs.len())?;
        check_operands(self, xs);
        let value: f64 = xs.iter().zip(cs).map(|(x, c)| x.val() * c).sum();
        let slot = self.record_nary(|operands, reals| {
            let lhs = operands.alloc_iter(xs.iter().map(|x| x.id()));
            (value, Op::DotVd(lhs, reals.alloc_slice(cs)))
        });
        Ok(Var::from_parts(self, slot))
    }

    /// `ln Σ e^xs[i]`, stable for large arguments. The empty case is `-inf`.
    pub fn log_sum_exp_slice<'t>(&'t self, xs: &[Var<'t>]) -> Var<'t> {
        check_operands(self, xs);
        let values: Vec<f64> = xs.iter().map(|x| x.val()).collect();
        let value = crate::math::log_sum_exp(&values);
        let slot = self.record_nary(|operands, _| {
            (value, Op::LogSumExp(operands.alloc_iter(xs.iter().map(|x| x.id()))))
        });
        Var::from_parts(self, slot)
    }

    /// Record a node whose value and partials were computed by the caller.
    ///
    /// `partials[i]` is `∂value/∂operands[i]`. This is the entry point for
    /// densities and special functions that evaluate their own derivative
    /// formulas. If any operand is NaN the stored value is NaN.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the lengths differ.
    pub fn precomputed<'t>(
        &'t self,
        value: f64,
        operands: &[Var<'t>],
        partials: &[f64],
    ) -> Result<Var<'t>> {
        check_len("precomputed", operands.len(), partials.len())?;
        check_operands(self, operands);
        let value = if operands.iter().any(|x| x.val().is_nan()) { f64::NAN } else { value };
        let slot = self.record_nary(|ids, reals| {
            let xs = ids.alloc_iter(operands.iter().map(|x| x.id()));
            (value, Op::Precomputed(xs, reals.alloc_slice(partials)))
        });
        Ok(Var::from_parts(self, slot))
    }
}
