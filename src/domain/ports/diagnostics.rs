use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::DiagnosticsError;
use crate::domain::models::ConvergenceMetrics;

/// Inputs of one diagnostics run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsRequest {
    /// Output bases of the chains to compare
    pub chain_outputs: Vec<PathBuf>,
    /// Base for the comparison outputs (`<base>.bpcomp`, `<base>.tracecomp`)
    pub comparison_base: PathBuf,
    /// Samples discarded from the start of every chain
    pub burnin: u64,
}

/// Computes cross-chain convergence metrics.
///
/// Implementations may shell out to the Phylobayes comparison tools or
/// compute the statistics in process; the supervisor does not care which.
#[async_trait]
pub trait DiagnosticsCollector: Send + Sync {
    async fn compute(
        &self,
        request: &DiagnosticsRequest,
    ) -> Result<ConvergenceMetrics, DiagnosticsError>;
}
