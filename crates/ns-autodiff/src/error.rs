//! Error types for the differentiation core.
//!
//! Only coarse-grained misuse surfaces here. Node construction and `propagate`
//! never fail; numerical trouble shows up as NaN values and adjoints. Arena
//! exhaustion is fatal and panics instead of returning an error.

use thiserror::Error;

/// Differentiation core error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed arguments to an n-ary constructor or functional
    /// (mismatched lengths and the like).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid differentiation request: no recorded computation, a root outside
    /// the active segment, or a gradient with respect to a non-leaf handle.
    #[error("Gradient error: {0}")]
    Gradient(String),

    /// Nesting-discipline violation (pop without push, recovery while nested).
    #[error("Nesting error: {0}")]
    Nesting(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
