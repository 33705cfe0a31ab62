//! Output formatting utilities for the CLI.

pub mod table;

pub use table::TableFormatter;

use serde::Serialize;

use crate::domain::models::{FailureReason, Verdict};
use crate::services::RunOutcome;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Process exit status for a finished run.
///
/// `0` converged, `2` stopped at the sample ceiling without converging,
/// `1` for every failure.
pub const fn exit_status(verdict: &Verdict) -> u8 {
    match verdict {
        Verdict::Converged => 0,
        Verdict::CeilingReached => 2,
        Verdict::Failed(_) | Verdict::Continue | Verdict::BelowFloor => 1,
    }
}

impl CommandOutput for RunOutcome {
    fn to_human(&self) -> String {
        let mut lines = vec![match &self.verdict {
            Verdict::Converged => format!("Chains converged after {} poll cycles", self.cycles),
            Verdict::CeilingReached => format!(
                "Sample ceiling reached after {} poll cycles without convergence",
                self.cycles
            ),
            Verdict::Failed(reason) => format!("Run failed ({}): {reason}", reason.code()),
            other => format!("Run ended with {}", other.label()),
        }];

        if let Some(metrics) = &self.last_metrics {
            lines.push(format!(
                "Last diagnostics: maxdiff {:.4}, min effective size {:.1}, max relative diff {:.4}",
                metrics.max_bipartition_diff, metrics.min_effective_size, metrics.max_relative_diff
            ));
        }

        if !self.chains.is_empty() {
            lines.push(TableFormatter::new().format_chains(&self.chains));
        }

        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        let reason = match &self.verdict {
            Verdict::Failed(reason) => Some(reason),
            _ => None,
        };

        serde_json::json!({
            "run_id": self.run_id,
            "verdict": self.verdict.label(),
            "reason": reason.map(FailureReason::code),
            "message": reason.map(ToString::to_string),
            "exit_status": exit_status(&self.verdict),
            "cycles": self.cycles,
            "diagnostics_invocations": self.diagnostics_invocations,
            "chains": self.chains,
            "metrics": self.last_metrics,
        })
    }
}
