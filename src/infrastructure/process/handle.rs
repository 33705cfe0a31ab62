//! Process handle for one running sampler chain.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::trace::TraceCounter;
use crate::domain::errors::ProcessError;
use crate::domain::models::chain::{run_flag_path, trace_path};
use crate::domain::models::{ChainId, ChainState, PollStatus};
use crate::domain::ports::ChainProcess;

/// Upper bound on reaping a chain after SIGKILL
const REAP_TIMEOUT: Duration = Duration::from_secs(10);

/// A sampler chain running in its own process group.
///
/// The group holds the sampler, or the MPI/Slurm launcher and every rank it
/// starts, so signals reach all of them. Dropping a live handle kills the group.
pub struct SamplerProcess {
    chain: ChainId,
    output_base: PathBuf,
    child: Child,
    pgid: Pid,
    state: ChainState,
    exit_code: Option<i32>,
    counter: TraceCounter,
    grace_period: Duration,
}

impl SamplerProcess {
    /// Wrap a child spawned with `process_group(0)`, whose pid is its group id.
    pub fn new(
        chain: ChainId,
        output_base: PathBuf,
        child: Child,
        pid: u32,
        grace_period: Duration,
    ) -> Self {
        let counter = TraceCounter::new(trace_path(&output_base));
        Self {
            chain,
            output_base,
            child,
            pgid: Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)),
            state: ChainState::Starting,
            exit_code: None,
            counter,
            grace_period,
        }
    }

    pub const fn pgid(&self) -> i32 {
        self.pgid.as_raw()
    }

    fn record_exit(&mut self, status: ExitStatus, state: ChainState) -> i32 {
        let code = exit_code(status);
        self.exit_code = Some(code);
        self.state = match state {
            ChainState::Exited(_) => ChainState::Exited(code),
            other => other,
        };
        code
    }

    /// Ask the sampler to stop at the end of its current cycle, the way
    /// `stoppb` does: the sampler keeps going while `<base>.run` holds `1`.
    async fn request_cooperative_stop(&self) {
        let run_flag = run_flag_path(&self.output_base);
        if !run_flag.exists() {
            return;
        }

        if let Err(err) = tokio::fs::write(&run_flag, "0").await {
            warn!(chain = %self.chain, path = %run_flag.display(), error = %err, "Failed to clear run flag");
        } else {
            debug!(chain = %self.chain, path = %run_flag.display(), "Run flag cleared");
        }
    }

    /// Signal the whole process group. A group that no longer exists is not an error.
    fn signal_group(&self, signal: Signal) -> Result<(), ProcessError> {
        match killpg(self.pgid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(ProcessError::Signal {
                chain: self.chain,
                pgid: self.pgid.as_raw(),
                message: errno.to_string(),
            }),
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.signal_group(Signal::SIGKILL)?;

        match timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                let code = self.record_exit(status, ChainState::Killed);
                info!(chain = %self.chain, code, "Chain killed");
            }
            Ok(Err(err)) => {
                self.state = ChainState::Killed;
                return Err(ProcessError::Io {
                    chain: self.chain,
                    path: self.output_base.clone(),
                    source: err,
                });
            }
            Err(_) => {
                self.state = ChainState::Killed;
                warn!(chain = %self.chain, "Chain not reaped after SIGKILL");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChainProcess for SamplerProcess {
    fn id(&self) -> ChainId {
        self.chain
    }

    fn state(&self) -> ChainState {
        self.state
    }

    fn output_base(&self) -> &Path {
        &self.output_base
    }

    async fn poll(&mut self) -> PollStatus {
        match self.state {
            ChainState::Exited(code) => return PollStatus::Exited(code),
            ChainState::Killed => return PollStatus::Exited(self.exit_code.unwrap_or(-1)),
            ChainState::Starting | ChainState::Running => {}
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                let code = self.record_exit(status, ChainState::Exited(0));
                info!(chain = %self.chain, code, "Chain exited");
                PollStatus::Exited(code)
            }
            Ok(None) => {
                self.state = ChainState::Running;
                PollStatus::Running
            }
            Err(err) => {
                warn!(chain = %self.chain, error = %err, "Failed to poll chain");
                PollStatus::Unknown
            }
        }
    }

    async fn sample_count(&mut self) -> u64 {
        match self.counter.refresh().await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(
                    chain = %self.chain,
                    path = %self.counter.path().display(),
                    error = %err,
                    "Failed to read trace, keeping last sample count"
                );
                self.counter.samples()
            }
        }
    }

    async fn stop(&mut self, graceful: bool) -> Result<(), ProcessError> {
        if !self.state.is_live() {
            debug!(chain = %self.chain, state = %self.state, "Chain already stopped");
            return Ok(());
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            let code = self.record_exit(status, ChainState::Exited(0));
            info!(chain = %self.chain, code, "Chain had already exited");
            return Ok(());
        }

        if graceful {
            self.request_cooperative_stop().await;
            self.signal_group(Signal::SIGTERM)?;

            match timeout(self.grace_period, self.child.wait()).await {
                Ok(Ok(status)) => {
                    let code = self.record_exit(status, ChainState::Killed);
                    info!(chain = %self.chain, code, "Chain stopped");
                    // Ranks left behind by a launcher that exited first.
                    let _ = self.signal_group(Signal::SIGKILL);
                    return Ok(());
                }
                Ok(Err(err)) => {
                    warn!(chain = %self.chain, error = %err, "Failed to wait for chain, killing");
                }
                Err(_) => {
                    warn!(
                        chain = %self.chain,
                        grace_secs = self.grace_period.as_secs(),
                        "Chain ignored stop request, killing"
                    );
                }
            }
        }

        self.kill().await
    }
}

impl Drop for SamplerProcess {
    fn drop(&mut self) {
        // Ensure the process group does not outlive its handle
        if self.state.is_live() {
            let _ = killpg(self.pgid, Signal::SIGKILL);
            let _ = self.child.start_kill();
        }
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
