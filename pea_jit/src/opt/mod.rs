//! Optimization passes for the Sea-of-Nodes IR.
//!
//! This module contains the optimization pipeline and individual optimization passes:
//!
//! - **PEA (Partial Escape Analysis)**: Removes allocations that do not
//!   escape, materializing them only on the paths where they do
//! - **Canonicalize**: Constant folding and redundant phi removal
//! - **DCE (Dead Code Elimination)**: Removes unreachable nodes
//!
//! # Optimization Pipeline
//!
//! The optimization pipeline runs passes in a specific order:
//!
//! 1. **Canonicalize**: Fold what the front end left behind
//! 2. **PEA**: Virtualize allocations, then clean up after itself
//! 3. **DCE**: Remove dead nodes
//!
//! See [`pipeline`] for the driver.

pub mod canonicalize;
pub mod dce;
pub mod pea;
pub mod pipeline;

// Re-export key types
pub use canonicalize::Canonicalize;
pub use dce::Dce;
pub use pea::{EscapeStats, MetricsSink, PartialEscape, PartialEscapePhase, PeaConfig};
pub use pipeline::{
    optimize, optimize_full, optimize_minimal, OptPipeline, PipelineConfig, PipelineStats,
};

use crate::error::PeaResult;
use crate::ir::graph::Graph;
use crate::ir::types::TypeRegistry;

// =============================================================================
// Optimization Pass Trait
// =============================================================================

/// A single optimization pass over the IR graph.
pub trait OptimizationPass {
    /// The name of this pass (for debugging/logging).
    fn name(&self) -> &'static str;

    /// Run the optimization pass on the graph.
    /// Returns true if the graph was modified.
    fn run(&mut self, graph: &mut Graph, types: &TypeRegistry) -> PeaResult<bool>;
}
