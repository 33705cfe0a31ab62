use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{ChainId, ChainState, ConvergenceMetrics, Verdict};

/// Per-chain line of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain: ChainId,
    pub state: ChainState,
    pub samples: u64,
    pub restarts: u32,
}

/// What the supervisor knows at the end of a poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub run_id: Uuid,
    pub cycle: u64,
    pub state: String,
    pub verdict: Option<Verdict>,
    pub chains: Vec<ChainStatus>,
    pub metrics: Option<ConvergenceMetrics>,
    pub consecutive_diagnostic_failures: u32,
    pub updated_at: DateTime<Utc>,
}

/// Receives status reports. Failures to publish never affect the run.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, report: &StatusReport);
}

/// Discards every report
pub struct NullStatusSink;

#[async_trait]
impl StatusSink for NullStatusSink {
    async fn publish(&self, _report: &StatusReport) {}
}
