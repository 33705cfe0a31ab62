//! Infrastructure layer module
//!
//! This module contains the adapters behind the domain ports and the
//! process-wide plumbing:
//! - Sampler chain processes (pb, pb_mpi under mpirun or srun)
//! - Diagnostics through bpcomp and tracecomp
//! - Configuration management
//! - Logging infrastructure
//! - Status file and signal handling
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod diagnostics;
pub mod logging;
pub mod process;
pub mod signals;
pub mod status;
