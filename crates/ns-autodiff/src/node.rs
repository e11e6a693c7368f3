//! Tape node records and the reverse-sweep `propagate` step.
//!
//! A node is written once, when its operation runs, and only its adjoint
//! changes afterwards. Operands are indices into the node store; because an
//! operand is always recorded before its consumer, every index stored in a
//! node is smaller than the node's own index.

use crate::arena::{Arena, Span};
use crate::op::{BinaryOp, UnaryOp};
use std::cell::Cell;

/// Index of a node in the tape's node store (creation order).
pub(crate) type NodeId = u32;

/// A freshly recorded node: its index plus the store generation it was
/// written in. An index is reused once its frame is popped; the pair is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) id: NodeId,
    pub(crate) generation: u32,
}

/// Operand of a primitive: a differentiable node or a plain constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    Var(NodeId),
    Const(f64),
}

/// What produced a node, plus what its `propagate` needs.
///
/// Binary primitives get one variant per operand-kind combination so a
/// constant operand never occupies a node or an adjoint slot.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Op {
    /// Independent input.
    Leaf,
    Unary(UnaryOp, NodeId),
    BinaryVv(BinaryOp, NodeId, NodeId),
    BinaryVd(BinaryOp, NodeId, f64),
    BinaryDv(BinaryOp, f64, NodeId),
    /// `a * b + c` with any mix of handles and constants.
    Fma([Arg; 3]),
    /// Operands live in the operand arena.
    Sum(Span),
    /// Two operand runs of equal length.
    DotVv(Span, Span),
    /// Operand run and constant run of equal length.
    DotVd(Span, Span),
    LogSumExp(Span),
    /// Operand run plus caller-supplied partials.
    Precomputed(Span, Span),
}

/// One recorded operation result.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) value: f64,
    pub(crate) op: Op,
    pub(crate) adjoint: Cell<f64>,
    pub(crate) generation: u32,
}

impl Node {
    #[inline]
    pub(crate) fn new(value: f64, op: Op, generation: u32) -> Self {
        Self { value, op, adjoint: Cell::new(0.0), generation }
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.op, Op::Leaf)
    }
}

/// Read-only view of the store used during a reverse sweep.
///
/// Only adjoints are written, through their `Cell`s.
pub(crate) struct Graph<'a> {
    pub(crate) nodes: &'a [Node],
    pub(crate) operands: &'a Arena<NodeId>,
    pub(crate) reals: &'a Arena<f64>,
}

impl Graph<'_> {
    #[inline]
    fn value(&self, id: NodeId) -> f64 {
        self.nodes[id as usize].value
    }

    #[inline]
    fn accumulate(&self, id: NodeId, delta: f64) {
        let adj = &self.nodes[id as usize].adjoint;
        adj.set(adj.get() + delta);
    }

    #[inline]
    fn poison(&self, id: NodeId) {
        self.nodes[id as usize].adjoint.set(f64::NAN);
    }

    fn arg_value(&self, arg: Arg) -> f64 {
        match arg {
            Arg::Var(id) => self.value(id),
            Arg::Const(c) => c,
        }
    }

    fn any_nan(&self, ids: &[NodeId]) -> bool {
        ids.iter().any(|&id| self.value(id).is_nan())
    }
}

impl Node {
    /// Push this node's adjoint to its operands.
    ///
    /// If any operand value is NaN, every differentiable operand's adjoint is
    /// overwritten with NaN, whatever this node's own adjoint is.
    pub(crate) fn propagate(&self, g: &Graph<'_>) {
        let adj = self.adjoint.get();
        match self.op {
            Op::Leaf => {}

            Op::Unary(op, a) => {
                let x = g.value(a);
                if x.is_nan() {
                    g.poison(a);
                } else if adj != 0.0 {
                    g.accumulate(a, adj * op.partial(x, self.value));
                }
            }

            Op::BinaryVv(op, a, b) => {
                let (va, vb) = (g.value(a), g.value(b));
                if va.is_nan() || vb.is_nan() {
                    g.poison(a);
                    g.poison(b);
                } else if adj != 0.0 {
                    g.accumulate(a, adj * op.partial_lhs(va, vb, self.value));
                    g.accumulate(b, adj * op.partial_rhs(va, vb, self.value));
                }
            }

            Op::BinaryVd(op, a, c) => {
                let va = g.value(a);
                if va.is_nan() || c.is_nan() {
                    g.poison(a);
                } else if adj != 0.0 {
                    g.accumulate(a, adj * op.partial_lhs(va, c, self.value));
                }
            }

            Op::BinaryDv(op, c, b) => {
                let vb = g.value(b);
                if c.is_nan() || vb.is_nan() {
                    g.poison(b);
                } else if adj != 0.0 {
                    g.accumulate(b, adj * op.partial_rhs(c, vb, self.value));
                }
            }

            Op::Fma(args) => {
                let [va, vb, vc] = args.map(|a| g.arg_value(a));
                let partials = [vb, va, 1.0];
                let poisoned = va.is_nan() || vb.is_nan() || vc.is_nan();
                for (arg, d) in args.into_iter().zip(partials) {
                    if let Arg::Var(id) = arg {
                        if poisoned {
                            g.poison(id);
                        } else if adj != 0.0 {
                            g.accumulate(id, adj * d);
                        }
                    }
                }
            }

            Op::Sum(xs) => {
                let xs = g.operands.get(xs);
                if g.any_nan(xs) {
                    xs.iter().for_each(|&id| g.poison(id));
                } else if adj != 0.0 {
                    xs.iter().for_each(|&id| g.accumulate(id, adj));
                }
            }

            Op::DotVv(xs, ys) => {
                let (xs, ys) = (g.operands.get(xs), g.operands.get(ys));
                if g.any_nan(xs) || g.any_nan(ys) {
                    xs.iter().chain(ys).for_each(|&id| g.poison(id));
                } else if adj != 0.0 {
                    for (&x, &y) in xs.iter().zip(ys) {
                        g.accumulate(x, adj * g.value(y));
                        g.accumulate(y, adj * g.value(x));
                    }
                }
            }

            Op::DotVd(xs, cs) => {
                let (xs, cs) = (g.operands.get(xs), g.reals.get(cs));
                if g.any_nan(xs) || cs.iter().any(|c| c.is_nan()) {
                    xs.iter().for_each(|&id| g.poison(id));
                } else if adj != 0.0 {
                    for (&x, &c) in xs.iter().zip(cs) {
                        g.accumulate(x, adj * c);
                    }
                }
            }

            Op::LogSumExp(xs) => {
                let xs = g.operands.get(xs);
                if g.any_nan(xs) {
                    xs.iter().for_each(|&id| g.poison(id));
                } else if adj != 0.0 {
                    for &x in xs {
                        g.accumulate(x, adj * (g.value(x) - self.value).exp());
                    }
                }
            }

            Op::Precomputed(xs, partials) => {
                let (xs, partials) = (g.operands.get(xs), g.reals.get(partials));
                if g.any_nan(xs) {
                    xs.iter().for_each(|&id| g.poison(id));
                } else if adj != 0.0 {
                    for (&x, &d) in xs.iter().zip(partials) {
                        g.accumulate(x, adj * d);
                    }
                }
            }
        }
    }
}
