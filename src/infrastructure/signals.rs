//! Termination signals turned into run cancellation.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::services::CancelHandle;

/// Cancel `handle` on the first SIGINT or SIGTERM.
///
/// Slurm sends SIGTERM ahead of the job's time limit; the supervisor then
/// stops the chains within its shutdown deadline.
pub fn install(handle: CancelHandle) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            () = handle.cancelled() => return,
        };

        info!(signal = name, "Termination signal received, stopping chains");
        handle.cancel(name);

        // A second signal while shutting down is only reported
        tokio::select! {
            _ = sigterm.recv() => warn!("SIGTERM received again, shutdown already in progress"),
            _ = sigint.recv() => warn!("SIGINT received again, shutdown already in progress"),
        }
    }))
}
