//! Partial Escape Analysis (PEA).
//!
//! Allocations that do not escape are replaced by their field values.
//! Allocations that escape on some paths only are materialized right where
//! they escape and stay virtual everywhere else.
//!
//! # Algorithm
//!
//! Each round of [`PartialEscapePhase`]:
//!
//! 1. Build the CFG and the schedule
//! 2. Run a discovery iteration that never touches the graph and collects
//!    the allocations it could virtualize
//! 3. Run a mutating iteration restricted to those allocations
//! 4. Remove the leftovers with DCE and fold with the canonicalizer
//!
//! A bailout in discovery ends the phase with the graph untouched. A bailout
//! in the mutating iteration means the two iterations disagreed and is fatal.

pub mod block_state;
pub mod config;
pub mod iteration;
pub mod object_state;
pub mod record;
pub mod sink;
pub mod snapshot;
pub mod stats;
pub mod usage;

pub use block_state::BlockState;
pub use config::PeaConfig;
pub use iteration::{EscapeAnalysisIteration, IterationOutcome};
pub use object_state::{Entry, ObjectState, Repr};
pub use record::{escape_op, EscapeField, EscapeOp, EscapeRecord, FieldKey, RecordId};
pub use sink::{DiscoverySink, GraphSink, MutatingSink};
pub use stats::{EscapeStats, MetricsSink};
pub use usage::Usage;

use std::sync::Arc;

use log::{debug, info, warn};
use rustc_hash::FxHashSet;

use super::canonicalize::Canonicalize;
use super::dce::Dce;
use super::OptimizationPass;
use crate::error::{Bailout, PeaError, PeaResult};
use crate::ir::cfg::Cfg;
use crate::ir::graph::Graph;
use crate::ir::schedule::Schedule;
use crate::ir::types::TypeRegistry;

// =============================================================================
// Phase
// =============================================================================

/// Drives discovery and mutating iterations over one graph.
#[derive(Debug, Clone, Default)]
pub struct PartialEscapePhase {
    config: PeaConfig,
    /// Where counters go. `None` means [`MetricsSink::global`].
    metrics: Option<Arc<MetricsSink>>,
}

impl PartialEscapePhase {
    /// Create a phase reporting into the global metrics sink.
    pub fn new(config: PeaConfig) -> Self {
        PartialEscapePhase {
            config,
            metrics: None,
        }
    }

    /// Report into `metrics` instead of the global sink.
    pub fn with_metrics(mut self, metrics: Arc<MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &PeaConfig {
        &self.config
    }

    fn metrics(&self) -> &MetricsSink {
        self.metrics
            .as_deref()
            .unwrap_or_else(|| MetricsSink::global())
    }

    /// Run the phase on `graph`.
    pub fn apply(&self, graph: &mut Graph, types: &TypeRegistry) -> PeaResult<EscapeStats> {
        let mut total = EscapeStats::default();
        if !self.config.enabled {
            return Ok(total);
        }

        for round in 0..self.config.max_rounds {
            let cfg = Cfg::build(graph);
            let schedule = Schedule::compute(graph, &cfg);
            let mut allocations = FxHashSet::default();

            let discovery = EscapeAnalysisIteration::new(
                DiscoverySink::new(graph),
                types,
                &self.config,
                &cfg,
                &schedule,
                &mut allocations,
            )
            .run();
            let discovered = match discovery {
                Ok(outcome) => outcome,
                Err(PeaError::Bailout(bailout)) => {
                    count_bailout(&mut total, &bailout);
                    debug!("PEA round {}: giving up: {}", round, bailout);
                    break;
                }
                Err(err) => return Err(err),
            };
            if !discovered.changed {
                debug!("PEA round {}: nothing to virtualize", round);
                break;
            }

            let mutation = EscapeAnalysisIteration::new(
                MutatingSink::new(graph),
                types,
                &self.config,
                &cfg,
                &schedule,
                &mut allocations,
            )
            .run();
            let outcome = match mutation {
                Ok(outcome) => outcome,
                Err(PeaError::Bailout(bailout)) => {
                    warn!("PEA round {}: bailout after discovery: {}", round, bailout);
                    return Err(PeaError::InconsistentBailout(bailout));
                }
                Err(err) => return Err(err),
            };
            total.add(&outcome.stats);

            Dce::new().sweep(graph);
            if self.config.canonicalize && Canonicalize::new().canonicalize(graph) {
                Dce::new().sweep(graph);
            }
            if self.config.verify {
                graph
                    .verify()
                    .map_err(|message| PeaError::Verify { pass: "PEA", message })?;
            }
            debug!("PEA round {}: {}", round, outcome.stats);
        }

        if total.allocations_removed > 0 {
            info!("PEA removed {} allocation(s): {}", total.allocations_removed, total);
        }
        self.metrics().record(&total);
        Ok(total)
    }
}

fn count_bailout(stats: &mut EscapeStats, bailout: &Bailout) {
    match bailout {
        Bailout::MaterializedInLoop(_) => stats.loop_bailouts += 1,
        Bailout::MaterializedWithLock(_) => stats.monitor_bailouts += 1,
    }
}

// =============================================================================
// Pass
// =============================================================================

/// [`PartialEscapePhase`] as a pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct PartialEscape {
    phase: PartialEscapePhase,
    last: EscapeStats,
}

impl PartialEscape {
    /// Create a new pass.
    pub fn new(config: PeaConfig) -> Self {
        PartialEscape {
            phase: PartialEscapePhase::new(config),
            last: EscapeStats::default(),
        }
    }

    /// Counters of the most recent run.
    pub fn stats(&self) -> EscapeStats {
        self.last
    }
}

impl OptimizationPass for PartialEscape {
    fn name(&self) -> &'static str {
        "PEA"
    }

    fn run(&mut self, graph: &mut Graph, types: &TypeRegistry) -> PeaResult<bool> {
        self.last = self.phase.apply(graph, types)?;
        Ok(self.last.removed() > 0 || self.last.materializations > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
