//! Public types for the chain supervisor.
//!
//! Lifecycle states, the outcome handed back to the job wrapper, and the
//! handle used to cancel a run from outside.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{ConvergenceMetrics, Verdict};
use crate::domain::ports::ChainStatus;

/// Supervisor state machine: `Initializing -> Running -> {Converged, CeilingReached, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Initializing,
    Running,
    Converged,
    CeilingReached,
    Failed,
}

impl SupervisorState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::CeilingReached | Self::Failed)
    }

    /// Terminal state a terminal verdict leads to; `None` for non-terminal verdicts.
    pub const fn for_verdict(verdict: &Verdict) -> Option<Self> {
        match verdict {
            Verdict::Converged => Some(Self::Converged),
            Verdict::CeilingReached => Some(Self::CeilingReached),
            Verdict::Failed(_) => Some(Self::Failed),
            Verdict::Continue | Verdict::BelowFloor => None,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Converged => "converged",
            Self::CeilingReached => "ceiling_reached",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finished run hands back to the job wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Always terminal
    pub verdict: Verdict,
    /// Poll cycles completed
    pub cycles: u64,
    /// Collector invocations, retries included
    pub diagnostics_invocations: u64,
    /// Chain states after shutdown
    pub chains: Vec<ChainStatus>,
    pub last_metrics: Option<ConvergenceMetrics>,
}

/// Cancels a run from outside (signal handler, operator, tests).
///
/// Cloning shares the underlying token; the first reason given wins.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the run has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| "cancellation request".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_for_verdict() {
        assert_eq!(
            SupervisorState::for_verdict(&Verdict::Converged),
            Some(SupervisorState::Converged)
        );
        assert_eq!(SupervisorState::for_verdict(&Verdict::BelowFloor), None);
        assert!(SupervisorState::Failed.is_terminal());
        assert!(!SupervisorState::Running.is_terminal());
    }

    #[test]
    fn test_cancel_handle_keeps_first_reason() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());

        clone.cancel("SIGTERM");
        handle.cancel("SIGINT");

        assert!(handle.is_cancelled());
        assert_eq!(handle.reason(), "SIGTERM");
    }
}
