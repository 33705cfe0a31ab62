pub mod chain;
pub mod config;
pub mod metrics;
pub mod verdict;

pub use chain::{ChainId, ChainSpec, ChainState, OutputLayout, PollStatus};
pub use config::{
    DiagnosticsConfig, ExecutionStrategy, LauncherConfig, LogFormat, LoggingConfig, PollConfig,
    RestartPolicy, RotationPolicy, RunConfig, SampleBounds, ShutdownConfig, ThresholdConfig,
};
pub use metrics::{ConvergenceMetrics, SampleSnapshot, TraceDiagnostic};
pub use verdict::{FailureReason, Verdict};
