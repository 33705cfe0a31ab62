//! Domain errors for the chain governor.

use std::path::PathBuf;

use thiserror::Error;

use super::models::ChainId;

/// Configuration errors, raised before any chain is spawned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Input alignment path cannot be empty")]
    MissingInput,

    #[error("Invalid chain count: {0}. Must be at least 1")]
    InvalidChainCount(usize),

    #[error("Invalid process count: {0}. Must be at least 1")]
    InvalidProcessCount(usize),

    #[error("Invalid sample bounds: min_sample_size ({min}) must not exceed max_sample_size ({max})")]
    SampleBounds { min: u64, max: u64 },

    #[error("Invalid threshold {name}: {value}. Must be a finite, non-negative number")]
    NegativeThreshold { name: &'static str, value: f64 },

    #[error("Invalid sleep range: sleep_min_secs ({min}) must not exceed sleep_max_secs ({max})")]
    SleepRange { min: u64, max: u64 },

    #[error("Invalid burn-in fraction: {0}. Must be in [0, 1)")]
    InvalidBurnin(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid retry count for {0}: cannot be 0")]
    InvalidRetries(&'static str),

    #[error(
        "Invalid backoff configuration: retry_initial_backoff_ms ({0}) must not exceed retry_max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Configuration could not be loaded: {0}")]
    Load(String),
}

/// Errors raised by chain process handles and launchers.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program} for {chain}: {source}")]
    Spawn {
        chain: ChainId,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{chain} exited during startup with code {code}")]
    StartupExit { chain: ChainId, code: i32 },

    #[error("Failed to signal process group {pgid} of {chain}: {message}")]
    Signal {
        chain: ChainId,
        pgid: i32,
        message: String,
    },

    #[error("I/O error for {chain} at {}: {source}", path.display())]
    Io {
        chain: ChainId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while computing convergence diagnostics.
///
/// Everything except [`DiagnosticsError::ToolUnavailable`] is transient: the
/// supervisor retries it and, past the retry ceiling, gives up on the run.
#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Cross-chain comparison needs at least two chains, {available} available")]
    InsufficientChains { available: usize },

    #[error("Output {} still being written after {attempts} read attempts", path.display())]
    PartialRead { path: PathBuf, attempts: u32 },

    #[error("{tool} exited with code {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} did not finish within {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("{tool} produced unusable output: {detail}")]
    MalformedOutput { tool: String, detail: String },

    #[error("{tool} is unavailable: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiagnosticsError {
    /// Whether a later attempt may succeed without operator intervention.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::ToolUnavailable { .. })
    }
}
