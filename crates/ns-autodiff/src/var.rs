//! [`Var`]: the user-facing handle to a tape node.
//!
//! Arithmetic on handles records new nodes on the handle's tape. Every binary
//! primitive accepts three operand-kind combinations, `(Var, Var)`,
//! `(Var, f64)` and `(f64, Var)`, through the [`BinaryOperands`] pairing; a
//! constant operand is stored inline in the node and never becomes a leaf.

use crate::node::{Arg, NodeId, Slot};
use crate::op::{BinaryOp, UnaryOp};
use crate::tape::Tape;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use sealed::Operand as _;

/// Handle to a node on a [`Tape`].
///
/// `Copy`: many handles may alias one node. A handle is only meaningful on the
/// tape it came from, and only until the frame that created it is popped.
/// Reading a handle after that panics; gradient calls reject it with an error.
#[derive(Clone, Copy)]
pub struct Var<'t> {
    tape: &'t Tape,
    id: NodeId,
    generation: u32,
}

impl<'t> Var<'t> {
    #[inline]
    pub(crate) fn from_parts(tape: &'t Tape, slot: Slot) -> Self {
        Self { tape, id: slot.id, generation: slot.generation }
    }

    #[inline]
    pub(crate) fn id(self) -> NodeId {
        self.id
    }

    #[inline]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }

    /// The tape this handle records on.
    #[inline]
    pub fn tape(self) -> &'t Tape {
        self.tape
    }

    /// Primal value. O(1), read-only.
    #[inline]
    pub fn val(self) -> f64 {
        self.tape.val(self)
    }

    /// Accumulated adjoint. Meaningful after a gradient run covering this node.
    #[inline]
    pub fn adjoint(self) -> f64 {
        self.tape.adjoint(self)
    }

    /// Whether this handle refers to an independent input.
    pub fn is_leaf(self) -> bool {
        self.tape.is_leaf_node(self)
    }
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Var");
        d.field("id", &self.id);
        if self.tape.is_live(*self) {
            d.field("val", &self.val());
        } else {
            d.field("stale", &true);
        }
        d.finish()
    }
}

impl fmt::Display for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.val(), f)
    }
}

mod sealed {
    use super::*;

    pub trait Operand<'t>: Copy {
        fn arg(self) -> Arg;
        fn tape(self) -> Option<&'t Tape>;
    }

    pub trait Binary<'t> {
        fn record(self, op: BinaryOp) -> Var<'t>;
    }

    pub trait Ternary<'t> {
        fn record_fma(self) -> Var<'t>;
    }
}

/// A primitive operand: a [`Var`] or a plain `f64` constant.
pub trait Operand<'t>: sealed::Operand<'t> {}

impl<'t, T: sealed::Operand<'t>> Operand<'t> for T {}

/// Operand pairs accepted by binary primitives: at least one is a [`Var`].
pub trait BinaryOperands<'t>: sealed::Binary<'t> {}

impl<'t, T: sealed::Binary<'t>> BinaryOperands<'t> for T {}

/// Operand triples accepted by [`fma`](crate::functions::fma): at least one
/// is a [`Var`].
pub trait TernaryOperands<'t>: sealed::Ternary<'t> {}

impl<'t, T: sealed::Ternary<'t>> TernaryOperands<'t> for T {}

impl<'t> sealed::Operand<'t> for Var<'t> {
    #[inline]
    fn arg(self) -> Arg {
        self.tape.assert_live(self);
        Arg::Var(self.id)
    }

    #[inline]
    fn tape(self) -> Option<&'t Tape> {
        Some(self.tape)
    }
}

impl<'t> sealed::Operand<'t> for f64 {
    #[inline]
    fn arg(self) -> Arg {
        Arg::Const(self)
    }

    #[inline]
    fn tape(self) -> Option<&'t Tape> {
        None
    }
}

/// Panics if `other` is a handle from a different tape.
#[inline]
fn check_same_tape(tape: &Tape, other: Option<&Tape>) {
    if let Some(other) = other {
        assert!(std::ptr::eq(tape, other), "operands belong to different tapes");
    }
}

impl<'t, B: Operand<'t>> sealed::Binary<'t> for (Var<'t>, B) {
    #[inline]
    fn record(self, op: BinaryOp) -> Var<'t> {
        let (a, b) = self;
        check_same_tape(a.tape, b.tape());
        let (x, y) = (a.arg(), b.arg());
        Var::from_parts(a.tape, a.tape.record_binary(op, x, y))
    }
}

impl<'t> sealed::Binary<'t> for (f64, Var<'t>) {
    #[inline]
    fn record(self, op: BinaryOp) -> Var<'t> {
        let (c, b) = self;
        let y = b.arg();
        Var::from_parts(b.tape, b.tape.record_binary(op, Arg::Const(c), y))
    }
}

fn record_fma<'t>(tape: &'t Tape, args: [Arg; 3], others: [Option<&'t Tape>; 2]) -> Var<'t> {
    for other in others {
        check_same_tape(tape, other);
    }
    Var::from_parts(tape, tape.record_fma(args))
}

impl<'t, B: Operand<'t>, C: Operand<'t>> sealed::Ternary<'t> for (Var<'t>, B, C) {
    fn record_fma(self) -> Var<'t> {
        let (a, b, c) = self;
        record_fma(a.tape, [a.arg(), b.arg(), c.arg()], [b.tape(), c.tape()])
    }
}

impl<'t, C: Operand<'t>> sealed::Ternary<'t> for (f64, Var<'t>, C) {
    fn record_fma(self) -> Var<'t> {
        let (a, b, c) = self;
        record_fma(b.tape, [Arg::Const(a), b.arg(), c.arg()], [None, c.tape()])
    }
}

impl<'t> sealed::Ternary<'t> for (f64, f64, Var<'t>) {
    fn record_fma(self) -> Var<'t> {
        let (a, b, c) = self;
        record_fma(c.tape, [Arg::Const(a), Arg::Const(b), c.arg()], [None, None])
    }
}

/// Record a binary primitive for any accepted operand pair.
#[inline]
pub(crate) fn binary<'t, P: BinaryOperands<'t>>(operands: P, op: BinaryOp) -> Var<'t> {
    operands.record(op)
}

/// Record `a * b + c` for any accepted operand triple.
#[inline]
pub(crate) fn ternary_fma<'t, P: TernaryOperands<'t>>(operands: P) -> Var<'t> {
    operands.record_fma()
}

// --- Arithmetic: Var op (Var | f64), f64 op Var ---

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:expr) => {
        impl<'t, B: Operand<'t>> $trait<B> for Var<'t> {
            type Output = Var<'t>;
            #[inline]
            fn $method(self, rhs: B) -> Var<'t> {
                binary((self, rhs), $op)
            }
        }

        impl<'t> $trait<Var<'t>> for f64 {
            type Output = Var<'t>;
            #[inline]
            fn $method(self, rhs: Var<'t>) -> Var<'t> {
                binary((self, rhs), $op)
            }
        }

        impl<'t, B: Operand<'t>> $assign_trait<B> for Var<'t> {
            #[inline]
            fn $assign_method(&mut self, rhs: B) {
                *self = binary((*self, rhs), $op);
            }
        }
    };
}

binary_operator!(Add, add, AddAssign, add_assign, BinaryOp::Add);
binary_operator!(Sub, sub, SubAssign, sub_assign, BinaryOp::Sub);
binary_operator!(Mul, mul, MulAssign, mul_assign, BinaryOp::Mul);
binary_operator!(Div, div, DivAssign, div_assign, BinaryOp::Div);

impl<'t> Neg for Var<'t> {
    type Output = Var<'t>;
    #[inline]
    fn neg(self) -> Var<'t> {
        self.tape.assert_live(self);
        Var::from_parts(self.tape, self.tape.record_unary(UnaryOp::Neg, self.id))
    }
}

// --- Comparisons (values only, nothing recorded) ---

impl PartialEq for Var<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.val() == other.val()
    }
}

impl PartialEq<f64> for Var<'_> {
    fn eq(&self, other: &f64) -> bool {
        self.val() == *other
    }
}

impl PartialEq<Var<'_>> for f64 {
    fn eq(&self, other: &Var<'_>) -> bool {
        *self == other.val()
    }
}

impl PartialOrd for Var<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.val().partial_cmp(&other.val())
    }
}

impl PartialOrd<f64> for Var<'_> {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.val().partial_cmp(other)
    }
}

impl PartialOrd<Var<'_>> for f64 {
    fn partial_cmp(&self, other: &Var<'_>) -> Option<Ordering> {
        self.partial_cmp(&other.val())
    }
}

#[cfg(test)]
mod tests {
    use crate::tape::Tape;
    use approx::assert_relative_eq;

    #[test]
    fn test_sub() {
        // f = x - y, df/dx = 1, df/dy = -1
        let t = Tape::new();
        let x = t.var(3.0);
        let y = t.var(5.0);
        let z = x - y;
        assert_eq!(z.val(), -2.0);

        t.backward(z).unwrap();
        assert_relative_eq!(x.adjoint(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(y.adjoint(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_div() {
        // f = x / y, df/dx = 1/y, df/dy = -x/y^2
        let t = Tape::new();
        let x = t.var(6.0);
        let y = t.var(3.0);
        let z = x / y;
        assert_eq!(z.val(), 2.0);

        t.backward(z).unwrap();
        assert_relative_eq!(x.adjoint(), 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(y.adjoint(), -6.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_neg() {
        let t = Tape::new();
        let x = t.var(3.0);
        let z = -x;
        assert_eq!(z.val(), -3.0);

        t.backward(z).unwrap();
        assert_relative_eq!(x.adjoint(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_three_operand_kinds() {
        // (v, v), (v, c), (c, v) each record one node and give the same partials.
        let t = Tape::new();
        let x = t.var(2.0);
        let y = t.var(7.0);
        let n0 = t.len();

        let vv = x / y;
        let vd = x / 7.0;
        let dv = 2.0 / y;
        assert_eq!(t.len(), n0 + 3);
        assert_eq!(vv.val(), vd.val());
        assert_eq!(vd.val(), dv.val());

        t.backward(vd).unwrap();
        assert_relative_eq!(x.adjoint(), 1.0 / 7.0, epsilon = 1e-12);
        assert_eq!(y.adjoint(), 0.0);

        t.backward(dv).unwrap();
        assert_relative_eq!(y.adjoint(), -2.0 / 49.0, epsilon = 1e-12);
        assert_eq!(x.adjoint(), 0.0);
    }

    #[test]
    fn test_compound_assignment() {
        let t = Tape::new();
        let x = t.var(2.0);
        let mut acc = x;
        acc *= x; // x^2
        acc += 1.0; // x^2 + 1
        acc -= x; // x^2 - x + 1
        acc /= 2.0;
        t.backward(acc).unwrap();
        assert_relative_eq!(acc.val(), 1.5, epsilon = 1e-12);
        assert_relative_eq!(x.adjoint(), (2.0 * 2.0 - 1.0) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_comparisons_use_values_and_record_nothing() {
        let t = Tape::new();
        let x = t.var(1.0);
        let y = t.var(2.0);
        let n = t.len();
        assert!(x < y);
        assert!(y > 1.5);
        assert!(0.5 < x);
        assert!(x == 1.0);
        assert!(x != y);
        assert_eq!(t.len(), n);
    }

    #[test]
    fn test_is_leaf() {
        let t = Tape::new();
        let x = t.var(1.0);
        let y = x + 1.0;
        assert!(x.is_leaf());
        assert!(!y.is_leaf());
    }

    #[test]
    #[should_panic(expected = "different tapes")]
    fn test_mixing_tapes_panics() {
        let t1 = Tape::new();
        let t2 = Tape::new();
        let x = t1.var(1.0);
        let y = t2.var(2.0);
        let _ = x + y;
    }
}
