//! Counters of the escape analysis.

use std::fmt;

use parking_lot::Mutex;

/// What one run of the phase removed and created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscapeStats {
    /// Allocations turned virtual.
    pub allocations_removed: u64,
    /// Slots of those allocations.
    pub allocation_fields_removed: u64,
    /// Stores into virtual objects.
    pub stores_removed: u64,
    /// Loads from virtual objects.
    pub loads_removed: u64,
    /// Monitor operations on virtual objects.
    pub locks_removed: u64,
    /// Type checks, null checks, length and hub reads, comparisons.
    pub others_removed: u64,
    /// Materializations inserted.
    pub materializations: u64,
    /// Slots written by those materializations.
    pub materialization_fields: u64,
    /// Runs abandoned because an object materialized inside a loop.
    pub loop_bailouts: u64,
    /// Runs abandoned because a locked object had to materialize.
    pub monitor_bailouts: u64,
}

impl EscapeStats {
    /// All counters zero.
    pub const ZERO: EscapeStats = EscapeStats {
        allocations_removed: 0,
        allocation_fields_removed: 0,
        stores_removed: 0,
        loads_removed: 0,
        locks_removed: 0,
        others_removed: 0,
        materializations: 0,
        materialization_fields: 0,
        loop_bailouts: 0,
        monitor_bailouts: 0,
    };

    /// Add another set of counters into this one.
    pub fn add(&mut self, other: &EscapeStats) {
        self.allocations_removed += other.allocations_removed;
        self.allocation_fields_removed += other.allocation_fields_removed;
        self.stores_removed += other.stores_removed;
        self.loads_removed += other.loads_removed;
        self.locks_removed += other.locks_removed;
        self.others_removed += other.others_removed;
        self.materializations += other.materializations;
        self.materialization_fields += other.materialization_fields;
        self.loop_bailouts += other.loop_bailouts;
        self.monitor_bailouts += other.monitor_bailouts;
    }

    /// Total of eliminated operations, allocations included.
    pub fn removed(&self) -> u64 {
        self.allocations_removed
            + self.stores_removed
            + self.loads_removed
            + self.locks_removed
            + self.others_removed
    }
}

impl fmt::Display for EscapeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocations={} (fields={}) stores={} loads={} locks={} others={} \
             materializations={} (fields={}) bailouts: loop={} monitor={}",
            self.allocations_removed,
            self.allocation_fields_removed,
            self.stores_removed,
            self.loads_removed,
            self.locks_removed,
            self.others_removed,
            self.materializations,
            self.materialization_fields,
            self.loop_bailouts,
            self.monitor_bailouts,
        )
    }
}

// =============================================================================
// Metrics Sink
// =============================================================================

/// Counters shared by concurrent compilations.
#[derive(Debug)]
pub struct MetricsSink {
    inner: Mutex<Totals>,
}

#[derive(Debug)]
struct Totals {
    stats: EscapeStats,
    runs: u64,
}

static GLOBAL: MetricsSink = MetricsSink::new();

impl MetricsSink {
    /// An empty sink.
    pub const fn new() -> Self {
        MetricsSink {
            inner: parking_lot::const_mutex(Totals {
                stats: EscapeStats::ZERO,
                runs: 0,
            }),
        }
    }

    /// The process-wide sink.
    pub fn global() -> &'static MetricsSink {
        &GLOBAL
    }

    /// Add the counters of one phase run.
    pub fn record(&self, stats: &EscapeStats) {
        let mut totals = self.inner.lock();
        totals.stats.add(stats);
        totals.runs += 1;
    }

    /// Current totals.
    pub fn snapshot(&self) -> EscapeStats {
        self.inner.lock().stats
    }

    /// Number of recorded runs.
    pub fn runs(&self) -> u64 {
        self.inner.lock().runs
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add() {
        let mut a = EscapeStats {
            loads_removed: 2,
            ..EscapeStats::default()
        };
        let b = EscapeStats {
            loads_removed: 1,
            materializations: 3,
            ..EscapeStats::default()
        };
        a.add(&b);
        assert_eq!(a.loads_removed, 3);
        assert_eq!(a.materializations, 3);
        assert_eq!(a.removed(), 3);
    }

    #[test]
    fn test_sink_accumulates_across_threads() {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    sink.record(&EscapeStats {
                        allocations_removed: 1,
                        ..EscapeStats::ZERO
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.runs(), 4);
        assert_eq!(sink.snapshot().allocations_removed, 4);
    }
}
