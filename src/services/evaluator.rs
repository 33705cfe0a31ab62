//! Convergence evaluation.
//!
//! A pure decision function over the latest metrics, the shortest chain
//! length and the configured thresholds. It has no access to supervisor
//! timing, so the same inputs always give the same verdict.

use crate::domain::models::{ConvergenceMetrics, SampleBounds, ThresholdConfig, Verdict};

/// Decide whether the run should continue.
///
/// First match wins:
/// 1. `min_samples_seen < min_sample_size` → `BelowFloor`
/// 2. every threshold met (inclusive) → `Converged`
/// 3. `min_samples_seen >= max_sample_size` → `CeilingReached`
/// 4. otherwise → `Continue`
pub fn evaluate(
    metrics: &ConvergenceMetrics,
    min_samples_seen: u64,
    thresholds: &ThresholdConfig,
    bounds: &SampleBounds,
) -> Verdict {
    if let Some(verdict) = check_floor(min_samples_seen, bounds) {
        return verdict;
    }

    if is_converged(metrics, thresholds) {
        return Verdict::Converged;
    }

    if min_samples_seen >= bounds.max_sample_size {
        return Verdict::CeilingReached;
    }

    Verdict::Continue
}

/// `Some(BelowFloor)` when the shortest chain has not reached the floor.
///
/// The supervisor calls this before asking for metrics so that diagnostics
/// never run on too little data.
pub const fn check_floor(min_samples_seen: u64, bounds: &SampleBounds) -> Option<Verdict> {
    if min_samples_seen < bounds.min_sample_size {
        Some(Verdict::BelowFloor)
    } else {
        None
    }
}

/// All three thresholds met, boundaries included.
pub fn is_converged(metrics: &ConvergenceMetrics, thresholds: &ThresholdConfig) -> bool {
    metrics.max_bipartition_diff <= thresholds.max_diff_bpcomp
        && metrics.min_effective_size >= thresholds.effective_size_tracecomp
        && metrics.max_relative_diff <= thresholds.relative_diff_tracecomp
}
