//! Convergence diagnostics snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chain::ChainId;

/// tracecomp result for one scalar trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDiagnostic {
    pub name: String,
    pub effective_size: f64,
    pub relative_diff: f64,
}

/// Cross-chain convergence metrics from one diagnostics run.
///
/// A fresh value is produced on every evaluation and only ever superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceMetrics {
    /// bpcomp maxdiff: largest bipartition frequency disagreement between chains
    pub max_bipartition_diff: f64,
    /// Smallest effective sample size over all monitored traces
    pub min_effective_size: f64,
    /// Largest relative difference between chain means over all monitored traces
    pub max_relative_diff: f64,
    /// Per-trace detail, empty when the collector only reports aggregates
    #[serde(default)]
    pub traces: Vec<TraceDiagnostic>,
    pub computed_at: DateTime<Utc>,
}

impl ConvergenceMetrics {
    pub fn new(max_bipartition_diff: f64, min_effective_size: f64, max_relative_diff: f64) -> Self {
        Self {
            max_bipartition_diff,
            min_effective_size,
            max_relative_diff,
            traces: Vec::new(),
            computed_at: Utc::now(),
        }
    }

    /// Aggregate per-trace results; `None` when there are no traces.
    pub fn from_traces(max_bipartition_diff: f64, traces: Vec<TraceDiagnostic>) -> Option<Self> {
        if traces.is_empty() {
            return None;
        }

        let min_effective_size = traces
            .iter()
            .map(|t| t.effective_size)
            .fold(f64::INFINITY, f64::min);
        let max_relative_diff = traces
            .iter()
            .map(|t| t.relative_diff)
            .fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            max_bipartition_diff,
            min_effective_size,
            max_relative_diff,
            traces,
            computed_at: Utc::now(),
        })
    }
}

/// Sample counts of the chains taking part in one evaluation, read together
/// before any diagnostics run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSnapshot {
    pub counts: Vec<(ChainId, u64)>,
}

impl SampleSnapshot {
    pub fn push(&mut self, chain: ChainId, samples: u64) {
        self.counts.push((chain, samples));
    }

    /// Samples of the shortest chain; 0 for an empty snapshot.
    pub fn min_samples(&self) -> u64 {
        self.counts.iter().map(|(_, n)| *n).min().unwrap_or(0)
    }
}
