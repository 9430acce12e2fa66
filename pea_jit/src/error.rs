//! Error types and result definitions for the escape analysis.
//!
//! This module provides the error hierarchy of the crate:
//! - Bailouts (the analysis cannot proceed for this graph; recoverable)
//! - Pass errors (internal consistency faults; abort the compilation)
//! - Interpreter errors (the reference evaluator could not run a graph)

use thiserror::Error;

/// The result type used by optimization passes.
pub type PeaResult<T> = Result<T, PeaError>;

/// Reasons the escape analysis gives up on a graph.
///
/// Raised during discovery this only disables the optimization; the graph
/// has not been touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Bailout {
    /// An object holding a lock would have to become real.
    #[error("materialization of locked object {0}")]
    MaterializedWithLock(String),

    /// An object tracked around a loop was materialized inside its body.
    #[error("object {0} materialized inside a loop")]
    MaterializedInLoop(String),
}

/// Fatal errors of an optimization pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeaError {
    /// A bailout raised by the analysis itself. Only escapes an iteration;
    /// the phase turns it into a skip or an [`PeaError::InconsistentBailout`].
    #[error("bailout: {0}")]
    Bailout(#[from] Bailout),

    /// The mutating pass bailed out although discovery succeeded.
    #[error("escape analysis bailed out after discovery succeeded: {0}")]
    InconsistentBailout(Bailout),

    /// A broken invariant of the analysis.
    #[error("internal error: {0}")]
    Internal(String),

    /// The graph failed verification after a pass.
    #[error("graph verification failed after {pass}: {message}")]
    Verify {
        /// Pass that produced the graph.
        pass: &'static str,
        /// Verifier message.
        message: String,
    },
}

/// Reasons the reference interpreter could not finish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    /// The step budget ran out.
    #[error("step budget of {0} exhausted")]
    StepLimit(u64),

    /// A node was evaluated before its value was available.
    #[error("no value for node {0}")]
    MissingValue(String),

    /// A value of the wrong kind reached an operator.
    #[error("type confusion at {node}: expected {expected}")]
    TypeConfusion {
        /// The evaluated node.
        node: String,
        /// The expected value kind.
        expected: &'static str,
    },

    /// An operator the interpreter cannot execute.
    #[error("unsupported operator {0}")]
    Unsupported(String),

    /// The graph has no reachable terminator on the executed path.
    #[error("malformed control flow at {0}")]
    MalformedControl(String),
}
