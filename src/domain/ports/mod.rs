//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - ChainProcess / ChainLauncher: one running sampler chain and how to start it
//! - DiagnosticsCollector: cross-chain convergence metrics
//! - StatusSink: where per-cycle status reports go
//!
//! The supervisor only talks to these traits, so it runs unchanged against
//! fake chains and collectors in tests.

pub mod chain_process;
pub mod diagnostics;
pub mod status;

pub use chain_process::{ChainLauncher, ChainProcess};
pub use diagnostics::{DiagnosticsCollector, DiagnosticsRequest};
pub use status::{ChainStatus, NullStatusSink, StatusReport, StatusSink};
