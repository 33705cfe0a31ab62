//! Chain process port - interface for one running sampler chain.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::ProcessError;
use crate::domain::models::{ChainId, ChainSpec, ChainState, PollStatus};

/// Handle on one spawned chain (a single sampler process or a multi-rank group).
///
/// The supervisor owns every handle exclusively; nothing else mutates it.
#[async_trait]
pub trait ChainProcess: Send + Sync {
    fn id(&self) -> ChainId;

    /// Lifecycle state as of the last poll or stop
    fn state(&self) -> ChainState;

    /// Output base of this chain (`<base>.trace`, `<base>.treelist`, ...)
    fn output_base(&self) -> &Path;

    /// Check liveness without blocking on the child.
    async fn poll(&mut self) -> PollStatus;

    /// Samples written so far. Never decreases.
    async fn sample_count(&mut self) -> u64;

    /// Stop the chain.
    ///
    /// `graceful` asks the sampler to stop cooperatively and escalates to a
    /// kill after the grace period; otherwise the chain is killed at once.
    /// Stopping a chain that has already exited or been stopped is a no-op.
    async fn stop(&mut self, graceful: bool) -> Result<(), ProcessError>;
}

/// Starts chains. The execution substrate (plain, MPI, Slurm) lives behind this.
#[async_trait]
pub trait ChainLauncher: Send + Sync {
    async fn start(&self, spec: &ChainSpec) -> Result<Box<dyn ChainProcess>, ProcessError>;
}
