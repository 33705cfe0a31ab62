//! Domain layer for the Phylobayes chain governor
//!
//! This module contains the run configuration, chain lifecycle and verdict
//! models, the error taxonomy and the port traits that infrastructure
//! adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ConfigError, DiagnosticsError, ProcessError};
