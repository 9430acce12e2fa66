//! Optimization Pipeline.
//!
//! Orchestrates the optimization passes with proper ordering,
//! fixed-point iteration, and per-pass statistics.
//!
//! # Pass Phases
//!
//! 1. **Canonicalization**: constant folding, redundant phis
//! 2. **EscapeAnalysis**: partial escape analysis
//! 3. **Cleanup**: DCE
//!
//! # Fixed-Point Iteration
//!
//! Each phase reruns its passes until none of them changes the graph or
//! `max_iterations_per_phase` is reached.

use log::debug;

use super::canonicalize::Canonicalize;
use super::dce::Dce;
use super::pea::{PartialEscape, PeaConfig};
use super::OptimizationPass;
use crate::error::PeaResult;
use crate::ir::graph::Graph;
use crate::ir::types::TypeRegistry;

use std::time::{Duration, Instant};

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Early passes: constant folding.
    Canonicalization,
    /// Allocation removal.
    EscapeAnalysis,
    /// Cleanup passes: DCE.
    Cleanup,
}

impl PassPhase {
    /// All phases in execution order.
    pub const ALL: [PassPhase; 3] = [
        PassPhase::Canonicalization,
        PassPhase::EscapeAnalysis,
        PassPhase::Cleanup,
    ];
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    /// The pass (boxed for polymorphism).
    pass: Box<dyn OptimizationPass>,
    /// Which phase this pass belongs to.
    phase: PassPhase,
    /// Pass-specific statistics.
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum iterations per phase.
    pub max_iterations_per_phase: usize,

    /// Enable canonicalization.
    pub enable_canonicalize: bool,

    /// Enable partial escape analysis.
    pub enable_pea: bool,

    /// Enable DCE.
    pub enable_dce: bool,

    /// Configuration of the escape analysis.
    pub pea: PeaConfig,

    /// Collect timing statistics.
    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_phase: 4,
            enable_canonicalize: true,
            enable_pea: true,
            enable_dce: true,
            pea: PeaConfig::default(),
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Create a minimal configuration (no escape analysis).
    pub fn minimal() -> Self {
        Self {
            max_iterations_per_phase: 2,
            enable_pea: false,
            collect_timing: false,
            ..Default::default()
        }
    }

    /// Create a full optimization configuration.
    pub fn full() -> Self {
        Self {
            max_iterations_per_phase: 8,
            pea: PeaConfig {
                max_rounds: 5,
                ..PeaConfig::default()
            },
            ..Default::default()
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// The main optimization pipeline.
pub struct OptPipeline {
    /// Configuration.
    config: PipelineConfig,

    /// Registered passes in order.
    passes: Vec<PassEntry>,

    /// Total iterations run.
    total_iterations: usize,

    /// Total time spent.
    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_iterations: 0,
            total_time: Duration::ZERO,
        };

        pipeline.register_default_passes();
        pipeline
    }

    /// Register the default set of optimization passes.
    fn register_default_passes(&mut self) {
        if self.config.enable_canonicalize {
            self.register(Canonicalize::new(), PassPhase::Canonicalization);
        }
        if self.config.enable_pea {
            let pea = PartialEscape::new(self.config.pea.clone());
            self.register(pea, PassPhase::EscapeAnalysis);
        }
        if self.config.enable_dce {
            self.register(Dce::new(), PassPhase::Cleanup);
        }
    }

    /// Register a custom pass.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Run the optimization pipeline on a graph.
    pub fn run(&mut self, graph: &mut Graph, types: &TypeRegistry) -> PeaResult<PipelineStats> {
        let start = Instant::now();
        let initial_size = graph.len();

        let mut stats = PipelineStats::default();
        for phase in PassPhase::ALL {
            stats.total_iterations += self.run_phase(graph, types, phase)?;
            stats.phases_run += 1;
        }

        self.total_iterations = stats.total_iterations;
        self.total_time = start.elapsed();

        stats.total_time = self.total_time;
        stats.initial_size = initial_size;
        stats.final_size = graph.len();

        Ok(stats)
    }

    /// Run all passes in a specific phase. Returns the iterations taken.
    fn run_phase(
        &mut self,
        graph: &mut Graph,
        types: &TypeRegistry,
        phase: PassPhase,
    ) -> PeaResult<usize> {
        let mut iterations = 0;

        while iterations < self.config.max_iterations_per_phase {
            iterations += 1;
            let mut iter_changed = false;

            for entry in self.passes.iter_mut().filter(|e| e.phase == phase) {
                let start = self.config.collect_timing.then(Instant::now);

                let changed = entry.pass.run(graph, types)?;

                if let Some(start) = start {
                    entry.time += start.elapsed();
                }

                entry.runs += 1;
                if changed {
                    entry.changes += 1;
                    iter_changed = true;
                }
            }

            if !iter_changed {
                // Fixed point reached for this phase
                break;
            }
        }

        debug!("{:?} phase: {} iteration(s)", phase, iterations);
        Ok(iterations)
    }

    /// Get pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    /// Get total iterations run.
    #[inline]
    pub fn iterations(&self) -> usize {
        self.total_iterations
    }

    /// Get total time spent.
    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    /// Pass name.
    pub name: String,
    /// Pass phase.
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    /// Total time spent in this pass.
    pub time: Duration,
}

/// Statistics from the entire pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total iterations across all phases.
    pub total_iterations: usize,
    /// Number of phases run.
    pub phases_run: usize,
    /// Total time spent.
    pub total_time: Duration,
    /// Initial graph size.
    pub initial_size: usize,
    /// Final graph size.
    pub final_size: usize,
}

impl PipelineStats {
    /// Get size reduction ratio.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run full optimization pipeline on a graph.
pub fn optimize_full(graph: &mut Graph, types: &TypeRegistry) -> PeaResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::full()).run(graph, types)
}

/// Run minimal optimization pipeline on a graph.
pub fn optimize_minimal(graph: &mut Graph, types: &TypeRegistry) -> PeaResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::minimal()).run(graph, types)
}

/// Run default optimization pipeline on a graph.
pub fn optimize(graph: &mut Graph, types: &TypeRegistry) -> PeaResult<PipelineStats> {
    OptPipeline::new().run(graph, types)
}

// =============================================================================
// Tests
// =============================================================================
