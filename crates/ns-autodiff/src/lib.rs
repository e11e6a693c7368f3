//! # ns-autodiff
//!
//! Reverse-mode automatic differentiation (AD) core.
//!
//! Provides:
//! - **Reverse mode** via an explicit [`Tape`]: handles ([`Var`]) record one
//!   node per elementary operation, and a single backward sweep over the tape
//!   yields the gradient (efficient for many parameters)
//! - **Nesting**: [`Tape::push_nesting`] / [`Tape::pop_nesting`] scope a
//!   sub-computation so it can be differentiated and discarded while the outer
//!   computation stays live
//! - **Forward mode** via [`Dual`] numbers, which compose over [`Var`] for
//!   Hessians
//! - [`Scalar`] trait for writing objectives once over `f64`, `Var` and `Dual`
//!
//! ```
//! use ns_autodiff::Tape;
//!
//! let tape = Tape::new();
//! let a = tape.var(3.0);
//! let b = tape.var(4.0);
//! let c = a * b + a;
//! tape.backward(c).unwrap();
//! assert_eq!(c.val(), 15.0);
//! assert_eq!(a.adjoint(), 5.0);
//! assert_eq!(b.adjoint(), 3.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod dual;
pub mod error;
pub mod functional;
pub mod functions;
pub mod math;
mod node;
mod op;
pub mod scalar;
pub mod tape;
pub mod var;

pub use dual::Dual;
pub use error::{Error, Result};
pub use functions::{atan2, fdim, fma, fmax, fmin, fmod, hypot, log_sum_exp, pow};
pub use scalar::Scalar;
pub use tape::{NestedGuard, Tape, TapeConfig, TapeStats};
pub use var::{BinaryOperands, Operand, TernaryOperands, Var};
