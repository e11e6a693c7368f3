//! Numerically stable `f64` kernels shared by node values and local partials.
//!
//! These are the plain-number halves of the logistic-family primitives: the
//! node layer evaluates them once at construction and reuses the stored result
//! in `propagate`.

/// `sqrt(π)`, used by the error-function partials.
pub(crate) const SQRT_PI: f64 = 1.772_453_850_905_516;

/// Stable `log(1 + exp(x))`.
///
/// Branchless: `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp(); // always in (0, 1], no overflow
    x.max(0.0) + e.ln_1p()
}

/// Stable logistic sigmoid `1 / (1 + exp(-x))`.
#[inline]
pub fn inv_logit(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    // x <  0: exp(x)/(1+exp(x)) = e/(1+e)
    if x >= 0.0 { recip } else { e * recip }
}

/// Stable `log(inv_logit(x)) = -log1pexp(-x)`.
#[inline]
pub fn log_inv_logit(x: f64) -> f64 {
    if x >= 0.0 { -(-x).exp().ln_1p() } else { x - x.exp().ln_1p() }
}

/// `log(u / (1 - u))`.
#[inline]
pub fn logit(u: f64) -> f64 {
    (u / (1.0 - u)).ln()
}

/// Stable `log(exp(a) + exp(b))`.
///
/// Infinite arguments of the same sign are handled without producing
/// `inf - inf`.
#[inline]
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    let hi = if a >= b { a } else { b };
    if hi == f64::NEG_INFINITY || hi == f64::INFINITY {
        return hi + if a.is_nan() || b.is_nan() { f64::NAN } else { 0.0 };
    }
    hi + ((a - hi).exp() + (b - hi).exp()).ln()
}

/// Stable `log(sum_i exp(x_i))`; `-inf` for an empty slice.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if xs.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    if hi.is_infinite() {
        return hi;
    }
    hi + xs.iter().map(|&x| (x - hi).exp()).sum::<f64>().ln()
}
