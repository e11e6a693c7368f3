//! Tape-based reverse-mode automatic differentiation.
//!
//! A [`Tape`] is the differentiation context: it owns the node store (one
//! record per elementary operation, in creation order), the arenas holding
//! n-ary payloads, and the stack of nesting frames. Handles ([`Var`]) borrow
//! the tape, so arithmetic on handles records new nodes without threading a
//! `&mut` through user code.
//!
//! Creation order is a valid reverse-topological order: an operand is always
//! recorded before the node consuming it. A gradient run is therefore one
//! backward walk over the active segment, with no sort and no revisits.
//!
//! # Example
//! ```
//! use ns_autodiff::tape::Tape;
//!
//! let tape = Tape::new();
//! let x = tape.var(3.0);
//! let y = tape.var(5.0);
//! let z = x * y;       // z = x * y = 15
//! let w = z + x;       // w = z + x = 18
//! tape.backward(w).unwrap();
//! assert_eq!(x.adjoint(), 6.0);  // dw/dx = y + 1 = 6
//! assert_eq!(y.adjoint(), 3.0);  // dw/dy = x = 3
//! ```
//!
//! # Threading
//!
//! `Tape` is `Send` but not `Sync`: one tape per worker, never shared. Handles
//! borrow their tape and cannot leave its thread.

use crate::arena::{Arena, Checkpoint};
use crate::error::{Error, Result};
use crate::node::{Arg, Graph, Node, NodeId, Op, Slot};
use crate::op::{BinaryOp, UnaryOp};
use crate::var::Var;
use std::cell::RefCell;

/// Sizing and limits for a [`Tape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeConfig {
    /// Nodes reserved up front.
    /// Default: 1024.
    pub node_capacity: usize,
    /// Capacity (in elements) of the first arena block; later blocks double.
    /// Default: 4096.
    pub block_len: usize,
    /// Arena blocks kept reserved across a rewind.
    /// Default: 1.
    pub retained_blocks: usize,
    /// Hard cap on live nodes. Exceeding it is fatal (panic), like running out
    /// of memory. Default: no cap.
    pub max_nodes: Option<usize>,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self { node_capacity: 1024, block_len: 4096, retained_blocks: 1, max_nodes: None }
    }
}

/// Memory accounting snapshot, see [`Tape::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeStats {
    /// Live nodes (tape length).
    pub nodes: usize,
    /// Live operand-index slots in the arena.
    pub operand_slots: usize,
    /// Live constant/partial slots in the arena.
    pub real_slots: usize,
    /// Reserved arena blocks, live and spare.
    pub blocks: usize,
    /// Bytes reserved by the node store and the arenas.
    pub bytes_reserved: usize,
}

/// Saved boundary of an enclosing frame.
#[derive(Debug, Clone, Copy)]
struct Frame {
    nodes: usize,
    operands: Checkpoint,
    reals: Checkpoint,
    generation: u32,
}

#[derive(Debug)]
pub(crate) struct Store {
    nodes: Vec<Node>,
    operands: Arena<NodeId>,
    reals: Arena<f64>,
    frames: Vec<Frame>,
    max_nodes: Option<usize>,
    /// Bumped by every pop and recovery; stamped into each new node.
    generation: u32,
}

impl Store {
    fn new(config: TapeConfig) -> Self {
        Self {
            nodes: Vec::with_capacity(config.node_capacity),
            operands: Arena::new(config.block_len, config.retained_blocks),
            reals: Arena::new(config.block_len, config.retained_blocks),
            frames: Vec::new(),
            max_nodes: config.max_nodes,
            generation: 0,
        }
    }

    /// First node of the active segment.
    #[inline]
    fn segment_start(&self) -> usize {
        self.frames.last().map_or(0, |f| f.nodes)
    }

    #[inline]
    fn value(&self, id: NodeId) -> f64 {
        self.nodes[id as usize].value
    }

    #[inline]
    fn arg_value(&self, arg: Arg) -> f64 {
        match arg {
            Arg::Var(id) => self.value(id),
            Arg::Const(c) => c,
        }
    }

    #[inline]
    fn push(&mut self, value: f64, op: Op) -> Slot {
        let id = self.nodes.len();
        if self.max_nodes.is_some_and(|max| id >= max) || id >= NodeId::MAX as usize {
            node_limit_exhausted(id);
        }
        self.nodes.push(Node::new(value, op, self.generation));
        Slot { id: id as NodeId, generation: self.generation }
    }

    /// The node behind `v`, if `v` has not been discarded since it was made.
    #[inline]
    fn get(&self, v: Var<'_>) -> Option<&Node> {
        self.nodes.get(v.id() as usize).filter(|n| n.generation == v.generation())
    }

    /// The node behind `v`; panics on a handle discarded by a pop or a
    /// recovery.
    #[inline]
    fn live(&self, v: Var<'_>) -> &Node {
        match self.get(v) {
            Some(node) => node,
            None => stale_handle(v.id()),
        }
    }

    fn graph(&self) -> Graph<'_> {
        Graph { nodes: &self.nodes, operands: &self.operands, reals: &self.reals }
    }

    fn frame(&self) -> Frame {
        Frame {
            nodes: self.nodes.len(),
            operands: self.operands.checkpoint(),
            reals: self.reals.checkpoint(),
            generation: self.generation,
        }
    }

    fn rewind(&mut self, frame: Frame) {
        debug_assert!(frame.nodes <= self.nodes.len(), "nesting frame above the tape end");
        self.nodes.truncate(frame.nodes);
        self.operands.reset_to(frame.operands);
        self.reals.reset_to(frame.reals);
        self.generation = self.generation.wrapping_add(1);
    }

    /// Reject a root or `wrt` handle that is not a live node of the active
    /// segment of this tape.
    fn check_active(&self, tape: &Tape, v: Var<'_>, what: &str) -> Result<usize> {
        if !std::ptr::eq(v.tape(), tape) {
            return Err(Error::Gradient(format!("{what} handle belongs to a different tape")));
        }
        let id = v.id() as usize;
        if self.get(v).is_none() {
            return Err(Error::Gradient(format!(
                "{what} handle refers to node {id}, discarded by pop_nesting or recover_memory"
            )));
        }
        let start = self.segment_start();
        if id < start {
            return Err(Error::Gradient(format!(
                "{what} handle refers to node {id}, recorded in an enclosing nesting frame \
                 (active segment starts at {start})"
            )));
        }
        Ok(id)
    }
}

#[cold]
#[inline(never)]
fn node_limit_exhausted(len: usize) -> ! {
    log::error!("tape exhausted: cannot record node {len}");
    panic!("tape exhausted: cannot record node {len}");
}

#[cold]
#[inline(never)]
fn stale_handle(id: NodeId) -> ! {
    panic!("stale handle: node {id} was discarded by pop_nesting or recover_memory");
}

/// Reverse-mode AD tape.
///
/// Build a computation by creating leaves with [`var`](Tape::var) and combining
/// the returned handles, then call [`backward`](Tape::backward) or
/// [`gradient`](Tape::gradient) and read adjoints off the handles.
#[derive(Debug)]
pub struct Tape {
    store: RefCell<Store>,
}

impl Tape {
    /// Create an empty tape with the default [`TapeConfig`].
    pub fn new() -> Self {
        Self::with_config(TapeConfig::default())
    }

    /// Create a tape pre-allocated for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(TapeConfig { node_capacity: capacity, ..TapeConfig::default() })
    }

    /// Create a tape with explicit sizing and limits.
    pub fn with_config(config: TapeConfig) -> Self {
        Self { store: RefCell::new(Store::new(config)) }
    }

    /// Number of live nodes on the tape, across all frames.
    pub fn len(&self) -> usize {
        self.store.borrow().nodes.len()
    }

    /// Whether the tape holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.store.borrow().nodes.is_empty()
    }

    /// Memory accounting snapshot.
    pub fn stats(&self) -> TapeStats {
        let s = self.store.borrow();
        TapeStats {
            nodes: s.nodes.len(),
            operand_slots: s.operands.len(),
            real_slots: s.reals.len(),
            blocks: s.operands.block_count() + s.reals.block_count(),
            bytes_reserved: s.nodes.capacity() * std::mem::size_of::<Node>()
                + s.operands.bytes_reserved()
                + s.reals.bytes_reserved(),
        }
    }

    // --- Leaves ---

    /// Record an independent input (leaf) and return its handle.
    #[doc(alias = "leaf")]
    #[inline]
    pub fn var(&self, value: f64) -> Var<'_> {
        let slot = self.store.borrow_mut().push(value, Op::Leaf);
        Var::from_parts(self, slot)
    }

    /// Record one leaf per value.
    pub fn vars(&self, values: &[f64]) -> Vec<Var<'_>> {
        values.iter().map(|&v| self.var(v)).collect()
    }

    // --- Value access ---

    /// Primal value of a node (same as [`Var::val`]).
    ///
    /// # Panics
    ///
    /// If `v` was discarded by [`pop_nesting`](Tape::pop_nesting) or
    /// [`recover_memory`](Tape::recover_memory).
    #[inline]
    pub fn val(&self, v: Var<'_>) -> f64 {
        self.store.borrow().live(v).value
    }

    /// Adjoint of a node after a gradient run (same as [`Var::adjoint`]).
    ///
    /// # Panics
    ///
    /// As [`val`](Tape::val).
    #[inline]
    pub fn adjoint(&self, v: Var<'_>) -> f64 {
        self.store.borrow().live(v).adjoint.get()
    }

    /// Whether `v` still refers to the node it was created for.
    pub fn is_live(&self, v: Var<'_>) -> bool {
        std::ptr::eq(v.tape(), self) && self.store.borrow().get(v).is_some()
    }

    #[inline]
    pub(crate) fn is_leaf_node(&self, v: Var<'_>) -> bool {
        self.store.borrow().live(v).is_leaf()
    }

    /// Panics if `v` is stale.
    #[inline]
    pub(crate) fn assert_live(&self, v: Var<'_>) {
        self.store.borrow().live(v);
    }

    /// Generation stamped into the frame at `depth` (1-based), if open.
    pub(crate) fn frame_generation(&self, depth: usize) -> Option<u32> {
        let s = self.store.borrow();
        depth.checked_sub(1).and_then(|i| s.frames.get(i)).map(|f| f.generation)
    }

    // --- Recording (used by the handle layer) ---

    pub(crate) fn record_unary(&self, op: UnaryOp, a: NodeId) -> Slot {
        let mut s = self.store.borrow_mut();
        let x = s.value(a);
        let value = if x.is_nan() { f64::NAN } else { op.eval(x) };
        s.push(value, Op::Unary(op, a))
    }

    pub(crate) fn record_binary(&self, op: BinaryOp, a: Arg, b: Arg) -> Slot {
        let mut s = self.store.borrow_mut();
        let (va, vb) = (s.arg_value(a), s.arg_value(b));
        let value = if va.is_nan() || vb.is_nan() { f64::NAN } else { op.eval(va, vb) };
        let node_op = match (a, b) {
            (Arg::Var(x), Arg::Var(y)) => Op::BinaryVv(op, x, y),
            (Arg::Var(x), Arg::Const(c)) => Op::BinaryVd(op, x, c),
            (Arg::Const(c), Arg::Var(y)) => Op::BinaryDv(op, c, y),
            (Arg::Const(_), Arg::Const(_)) => {
                unreachable!("operand pairing never records two constants")
            }
        };
        s.push(value, node_op)
    }

    pub(crate) fn record_fma(&self, args: [Arg; 3]) -> Slot {
        let mut s = self.store.borrow_mut();
        let [a, b, c] = args.map(|a| s.arg_value(a));
        let value = if a.is_nan() || b.is_nan() || c.is_nan() { f64::NAN } else { a.mul_add(b, c) };
        s.push(value, Op::Fma(args))
    }

    /// Record an n-ary node: `build` stores its payload in the arenas and
    /// returns `(value, op)`.
    pub(crate) fn record_nary(
        &self,
        build: impl FnOnce(&mut Arena<NodeId>, &mut Arena<f64>) -> (f64, Op),
    ) -> Slot {
        let mut s = self.store.borrow_mut();
        let Store { operands, reals, .. } = &mut *s;
        let (value, op) = build(operands, reals);
        s.push(value, op)
    }

    // --- Backward pass ---

    /// Run one reverse sweep over the active segment.
    ///
    /// Zeroes every adjoint in the segment, adds `seeds[i]` to the adjoint of
    /// `roots[i]` (repeated roots accumulate), then calls `propagate` on each
    /// node from newest to oldest. Several outputs combined with weights cost
    /// a single sweep.
    ///
    /// # Errors
    ///
    /// [`Error::Gradient`] if `roots` is empty, its length differs from
    /// `seeds`, nothing is recorded in the active segment, or a root is not a
    /// live node of the active segment of this tape.
    pub fn gradient(&self, roots: &[Var<'_>], seeds: &[f64]) -> Result<()> {
        if roots.is_empty() {
            return Err(Error::Gradient("gradient requires at least one root".to_string()));
        }
        if roots.len() != seeds.len() {
            return Err(Error::Gradient(format!(
                "roots/seeds length mismatch: {} roots, {} seeds",
                roots.len(),
                seeds.len()
            )));
        }

        let s = self.store.borrow();
        let start = s.segment_start();
        let end = s.nodes.len();
        if start == end {
            return Err(Error::Gradient(
                "no computation recorded on the active tape segment".to_string(),
            ));
        }
        let root_ids = roots
            .iter()
            .map(|&r| s.check_active(self, r, "root"))
            .collect::<Result<Vec<_>>>()?;

        let segment = &s.nodes[start..end];
        for node in segment {
            node.adjoint.set(0.0);
        }
        for (&id, &seed) in root_ids.iter().zip(seeds) {
            let adj = &s.nodes[id].adjoint;
            adj.set(adj.get() + seed);
        }

        let graph = s.graph();
        for node in segment.iter().rev() {
            node.propagate(&graph);
        }
        log::trace!("gradient: swept {} nodes (segment {start}..{end})", end - start);
        Ok(())
    }

    /// Run reverse-mode AD from a single output with seed 1.
    ///
    /// After calling this, use [`Var::adjoint`] to read ∂out/∂x for any `x`
    /// in the active segment.
    pub fn backward(&self, out: Var<'_>) -> Result<()> {
        self.gradient(&[out], &[1.0])
    }

    /// Gradient of `out` with respect to the leaves `wrt`.
    ///
    /// # Errors
    ///
    /// As [`gradient`](Tape::gradient), plus [`Error::Gradient`] if a `wrt`
    /// handle is not a leaf or is not in the active segment.
    pub fn grad(&self, out: Var<'_>, wrt: &[Var<'_>]) -> Result<Vec<f64>> {
        {
            let s = self.store.borrow();
            for &x in wrt {
                let id = s.check_active(self, x, "wrt")?;
                if !s.nodes[id].is_leaf() {
                    return Err(Error::Gradient(format!(
                        "cannot differentiate with respect to node {id}: not a leaf"
                    )));
                }
            }
        }
        self.backward(out)?;
        Ok(wrt.iter().map(|&x| x.adjoint()).collect())
    }

    /// Zero every adjoint in the active segment.
    pub fn zero_adjoints(&self) {
        let s = self.store.borrow();
        for node in &s.nodes[s.segment_start()..] {
            node.adjoint.set(0.0);
        }
    }

    // --- Nesting ---

    /// Open a nesting frame at the current tape end.
    ///
    /// Nodes recorded until the matching [`pop_nesting`](Tape::pop_nesting)
    /// form a new active segment; gradient runs stay inside it.
    pub fn push_nesting(&self) {
        let mut s = self.store.borrow_mut();
        let frame = s.frame();
        s.frames.push(frame);
        log::debug!("push_nesting: depth {} at node {}", s.frames.len(), frame.nodes);
    }

    /// Close the innermost frame: truncate the tape and rewind the arenas to
    /// where they were at the matching push.
    ///
    /// Handles created inside the frame are dead afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::Nesting`] if no frame is open.
    pub fn pop_nesting(&self) -> Result<()> {
        let mut s = self.store.borrow_mut();
        let Some(frame) = s.frames.pop() else {
            return Err(Error::Nesting(
                "pop_nesting called without a matching push_nesting".to_string(),
            ));
        };
        let discarded = s.nodes.len() - frame.nodes;
        s.rewind(frame);
        log::debug!("pop_nesting: depth {}, discarded {discarded} nodes", s.frames.len());
        Ok(())
    }

    /// Discard every node and arena allocation, keeping reserved capacity.
    ///
    /// Used between independent top-level evaluations. All handles are dead
    /// afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::Nesting`] while any nesting frame is open.
    pub fn recover_memory(&self) -> Result<()> {
        let mut s = self.store.borrow_mut();
        if !s.frames.is_empty() {
            return Err(Error::Nesting(format!(
                "recover_memory called with {} open nesting frame(s)",
                s.frames.len()
            )));
        }
        let discarded = s.nodes.len();
        let start = Frame {
            nodes: 0,
            operands: Checkpoint::START,
            reals: Checkpoint::START,
            generation: s.generation,
        };
        s.rewind(start);
        log::debug!("recover_memory: discarded {discarded} nodes");
        Ok(())
    }

    /// Number of open nesting frames.
    pub fn nesting_depth(&self) -> usize {
        self.store.borrow().frames.len()
    }

    /// Open a nesting frame that is popped when the guard drops.
    pub fn nested(&self) -> NestedGuard<'_> {
        self.push_nesting();
        let s = self.store.borrow();
        NestedGuard { tape: self, depth: s.frames.len(), generation: s.generation }
    }

    /// Run `f` inside a fresh nesting frame.
    ///
    /// The frame is popped when `f` returns or unwinds. `f` must not return
    /// handles created inside the frame.
    pub fn with_nested<R>(&self, f: impl FnOnce(&Tape) -> R) -> R {
        let _frame = self.nested();
        f(self)
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope guard for a nesting frame, see [`Tape::nested`].
///
/// Dropping the guard pops its frame, and any inner frames left open above it.
#[derive(Debug)]
pub struct NestedGuard<'t> {
    tape: &'t Tape,
    depth: usize,
    generation: u32,
}

impl NestedGuard<'_> {
    /// Depth of the guarded frame (1 for the outermost nested frame).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for NestedGuard<'_> {
    fn drop(&mut self) {
        if self.tape.frame_generation(self.depth) != Some(self.generation) {
            log::warn!("nesting frame {} was popped before its guard dropped", self.depth);
            return;
        }
        let current = self.tape.nesting_depth();
        if current > self.depth {
            log::warn!("nesting guard dropped with {} inner frame(s) still open", current - self.depth);
        }
        for _ in 0..=current - self.depth {
            // The guarded frame is still open, so every pop has a frame to close.
            let _ = self.tape.pop_nesting();
        }
    }
}
