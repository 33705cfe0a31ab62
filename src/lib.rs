//! pbgovernor - Phylobayes chain starter and convergence governor
//!
//! Starts two or more Phylobayes MCMC chains (directly, through mpirun or as
//! Slurm job steps), periodically compares them with `bpcomp` and `tracecomp`,
//! and stops them once they agree or a sample ceiling is reached.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Run configuration, chain and verdict models, port traits
//! - **Service Layer** (`services`): Convergence evaluation and the chain supervisor
//! - **Infrastructure Layer** (`infrastructure`): Processes, diagnostics tools, config, logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use pbgovernor::cli::Cli;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<std::process::ExitCode> {
//!     pbgovernor::cli::execute(Cli::parse()).await
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ChainId, ChainState, ConvergenceMetrics, FailureReason, RunConfig, Verdict,
};
pub use domain::ports::{ChainLauncher, ChainProcess, DiagnosticsCollector, StatusSink};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CancelHandle, ChainSupervisor, RunOutcome};
