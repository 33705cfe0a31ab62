//! Sampler chain processes
//!
//! Launching chains under the configured execution strategy, tracking their
//! liveness and sample counts, and stopping them.

pub mod handle;
pub mod launcher;
pub mod trace;

pub use handle::SamplerProcess;
pub use launcher::{resolve_strategy, LaunchCommand, OutputCapture, SamplerLauncher};
pub use trace::TraceCounter;
