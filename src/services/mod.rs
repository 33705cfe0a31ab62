//! Service layer
//!
//! - `evaluator`: pure convergence decision over the latest metrics
//! - `chain_supervisor`: the poll/sleep/evaluate control loop over a set of chains

pub mod chain_supervisor;
pub mod evaluator;

pub use chain_supervisor::{CancelHandle, ChainSupervisor, RunOutcome, SupervisorState};
pub use evaluator::evaluate;
