//! Diagnostics collector backed by the Phylobayes `bpcomp` and `tracecomp` tools.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::parser::{parse_bpcomp, parse_tracecomp};
use crate::domain::errors::DiagnosticsError;
use crate::domain::models::chain::{trace_path, with_suffix};
use crate::domain::models::{ConvergenceMetrics, DiagnosticsConfig};
use crate::domain::ports::{DiagnosticsCollector, DiagnosticsRequest};
use crate::infrastructure::process::trace::ends_on_line_boundary;

/// Delay before re-checking a trace that ends mid-line
const PARTIAL_READ_BACKOFF: Duration = Duration::from_millis(200);

/// Longest stderr excerpt kept in an error
const STDERR_EXCERPT: usize = 512;

/// Runs bpcomp and tracecomp over the chain outputs and parses their reports.
pub struct PbToolsCollector {
    config: DiagnosticsConfig,
}

impl PbToolsCollector {
    pub const fn new(config: DiagnosticsConfig) -> Self {
        Self { config }
    }

    /// Wait until every trace ends on a line boundary.
    async fn await_complete_traces(&self, request: &DiagnosticsRequest) -> Result<(), DiagnosticsError> {
        for output in &request.chain_outputs {
            self.await_complete_trace(&trace_path(output)).await?;
        }
        Ok(())
    }

    async fn await_complete_trace(&self, path: &Path) -> Result<(), DiagnosticsError> {
        let max_attempts = self.config.partial_read_retries;
        let attempts = AtomicU32::new(0);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(PARTIAL_READ_BACKOFF)
            .with_max_elapsed_time(None)
            .build();

        let counter = &attempts;
        let operation = move || async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            match ends_on_line_boundary(path).await {
                Ok(true) => Ok(()),
                Ok(false) if attempt < max_attempts => Err(backoff::Error::transient(
                    DiagnosticsError::PartialRead {
                        path: path.to_path_buf(),
                        attempts: attempt,
                    },
                )),
                Ok(false) => Err(backoff::Error::permanent(DiagnosticsError::PartialRead {
                    path: path.to_path_buf(),
                    attempts: attempt,
                })),
                Err(source) => Err(backoff::Error::permanent(DiagnosticsError::Io {
                    path: path.to_path_buf(),
                    source,
                })),
            }
        };

        backoff::future::retry_notify(policy, operation, |_err: DiagnosticsError, wait: Duration| {
            debug!(
                path = %path.display(),
                retry_in_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Trace ends mid-line, waiting for the writer"
            );
        })
        .await
    }

    /// `<tool> -o <base>.<tool> -x <burnin> <chain1> <chain2> ...`
    fn tool_args(tool: &str, request: &DiagnosticsRequest) -> Vec<String> {
        let report = with_suffix(&request.comparison_base, &format!(".{tool}"));
        let mut args = vec![
            "-o".to_string(),
            report.to_string_lossy().into_owned(),
            "-x".to_string(),
            request.burnin.to_string(),
        ];
        args.extend(
            request
                .chain_outputs
                .iter()
                .map(|output| output.to_string_lossy().into_owned()),
        );
        args
    }

    /// Run one tool to completion and return its stdout.
    async fn run_tool(
        &self,
        tool: &str,
        binary: &str,
        request: &DiagnosticsRequest,
    ) -> Result<String, DiagnosticsError> {
        let args = Self::tool_args(tool, request);
        debug!(tool, binary, args = ?args, "Running diagnostics tool");

        let mut cmd = Command::new(binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => DiagnosticsError::ToolUnavailable {
                tool: tool.to_string(),
                message: format!("{binary}: {err}"),
            },
            _ => DiagnosticsError::ToolFailed {
                tool: tool.to_string(),
                code: None,
                stderr: err.to_string(),
            },
        })?;

        let secs = self.config.tool_timeout_secs;
        let output = timeout(Duration::from_secs(secs), child.wait_with_output())
            .await
            .map_err(|_| DiagnosticsError::ToolTimeout {
                tool: tool.to_string(),
                secs,
            })?
            .map_err(|err| DiagnosticsError::ToolFailed {
                tool: tool.to_string(),
                code: None,
                stderr: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(DiagnosticsError::ToolFailed {
                tool: tool.to_string(),
                code: output.status.code(),
                stderr: excerpt(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DiagnosticsCollector for PbToolsCollector {
    async fn compute(
        &self,
        request: &DiagnosticsRequest,
    ) -> Result<ConvergenceMetrics, DiagnosticsError> {
        if request.chain_outputs.len() < 2 {
            return Err(DiagnosticsError::InsufficientChains {
                available: request.chain_outputs.len(),
            });
        }

        self.await_complete_traces(request).await?;

        let bpcomp = self
            .run_tool("bpcomp", &self.config.bpcomp_binary, request)
            .await?;
        let max_diff = parse_bpcomp(&bpcomp)?;

        let tracecomp = self
            .run_tool("tracecomp", &self.config.tracecomp_binary, request)
            .await?;
        let traces = parse_tracecomp(&tracecomp)?;

        let metrics = ConvergenceMetrics::from_traces(max_diff, traces).ok_or_else(|| {
            DiagnosticsError::MalformedOutput {
                tool: "tracecomp".to_string(),
                detail: "no trace rows".to_string(),
            }
        })?;

        info!(
            burnin = request.burnin,
            max_diff = metrics.max_bipartition_diff,
            min_effective_size = metrics.min_effective_size,
            max_relative_diff = metrics.max_relative_diff,
            traces = metrics.traces.len(),
            "Diagnostics computed"
        );

        if metrics.traces.iter().any(|t| t.effective_size < 1.0) {
            warn!("tracecomp reported an effective size below 1; burn-in may exceed the chains");
        }

        Ok(metrics)
    }
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}
