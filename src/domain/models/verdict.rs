use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::ChainId;

/// Outcome of one evaluation.
///
/// `Converged`, `CeilingReached` and `Failed` end the run; `Continue` and
/// `BelowFloor` send the supervisor back to sleep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Converged,
    CeilingReached,
    BelowFloor,
    Failed(FailureReason),
}

impl Verdict {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::CeilingReached | Self::Failed(_)
        )
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Converged => "converged",
            Self::CeilingReached => "ceiling_reached",
            Self::BelowFloor => "below_floor",
            Self::Failed(_) => "failed",
        }
    }
}

/// Structured reason attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("{chain} failed to start: {message}")]
    SpawnError { chain: ChainId, message: String },

    #[error("{chain} exited unexpectedly with code {code}")]
    UnexpectedExit { chain: ChainId, code: i32 },

    #[error("diagnostics tool unavailable: {message}")]
    DiagnosticsToolUnavailable { message: String },

    #[error("diagnostics failed in {attempts} consecutive cycles: {last_error}")]
    DiagnosticsExhausted { attempts: u32, last_error: String },

    #[error("cancelled by {signal}")]
    Cancelled { signal: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl FailureReason {
    /// Machine-readable failure code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SpawnError { .. } => "spawn_error",
            Self::UnexpectedExit { .. } => "unexpected_exit",
            Self::DiagnosticsToolUnavailable { .. } => "diagnostics_tool_unavailable",
            Self::DiagnosticsExhausted { .. } => "diagnostics_exhausted",
            Self::Cancelled { .. } => "cancelled",
            Self::Config { .. } => "config_error",
        }
    }
}
