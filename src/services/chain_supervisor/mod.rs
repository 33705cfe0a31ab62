//! Chain supervisor
//!
//! Drives one supervised run: spawns the chains, polls them on a jittered
//! interval, gathers diagnostics once every chain has reached the sample
//! floor, and stops every chain once a terminal verdict is reached.
//!
//! The loop is the only place that suspends, and every suspension is bounded:
//! the poll sleep (interruptible by cancellation), diagnostics (bounded by the
//! collector's tool timeout and the retry budget) and shutdown (bounded by the
//! hard deadline).

mod diagnostics;
pub mod types;

pub use types::{CancelHandle, RunOutcome, SupervisorState};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    ChainId, ChainSpec, ConvergenceMetrics, FailureReason, OutputLayout, PollStatus, RunConfig,
    SampleSnapshot, Verdict,
};
use crate::domain::ports::{
    ChainLauncher, ChainProcess, ChainStatus, DiagnosticsCollector, DiagnosticsRequest,
    NullStatusSink, StatusReport, StatusSink,
};
use crate::services::evaluator;

use self::diagnostics::collect_with_retry;

/// A chain handle plus the supervisor's bookkeeping for it
struct ManagedChain {
    spec: ChainSpec,
    handle: Box<dyn ChainProcess>,
    restarts: u32,
    /// High-water mark of the chain's sample count
    samples: u64,
}

impl ManagedChain {
    fn status(&self) -> ChainStatus {
        ChainStatus {
            chain: self.spec.chain,
            state: self.handle.state(),
            samples: self.samples,
            restarts: self.restarts,
        }
    }
}

/// Supervises one set of chains for one input alignment.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use pbgovernor::domain::models::RunConfig;
/// use pbgovernor::infrastructure::diagnostics::PbToolsCollector;
/// use pbgovernor::infrastructure::process::SamplerLauncher;
/// use pbgovernor::services::ChainSupervisor;
///
/// # async fn example(config: RunConfig) {
/// let launcher = Arc::new(SamplerLauncher::new(config.launcher.clone(), config.shutdown));
/// let collector = Arc::new(PbToolsCollector::new(config.diagnostics.clone()));
/// let outcome = ChainSupervisor::new(config, launcher, collector).run().await;
/// println!("{}", outcome.verdict.label());
/// # }
/// ```
pub struct ChainSupervisor {
    config: RunConfig,
    layout: OutputLayout,
    launcher: Arc<dyn ChainLauncher>,
    collector: Arc<dyn DiagnosticsCollector>,
    status_sink: Arc<dyn StatusSink>,
    cancel: CancelHandle,
    rng: fastrand::Rng,
    run_id: Uuid,
    state: SupervisorState,
    chains: Vec<ManagedChain>,
    cycles: u64,
    diagnostics_invocations: u64,
    consecutive_diagnostic_failures: u32,
    last_metrics: Option<ConvergenceMetrics>,
}

impl ChainSupervisor {
    pub fn new(
        config: RunConfig,
        launcher: Arc<dyn ChainLauncher>,
        collector: Arc<dyn DiagnosticsCollector>,
    ) -> Self {
        let layout = OutputLayout::new(&config.input, &config.sampler_args, config.processes);

        Self {
            config,
            layout,
            launcher,
            collector,
            status_sink: Arc::new(NullStatusSink),
            cancel: CancelHandle::new(),
            rng: fastrand::Rng::new(),
            run_id: Uuid::new_v4(),
            state: SupervisorState::Initializing,
            chains: Vec::new(),
            cycles: 0,
            diagnostics_invocations: 0,
            consecutive_diagnostic_failures: 0,
            last_metrics: None,
        }
    }

    #[must_use]
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Seed the poll jitter, for reproducible runs.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub const fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Run to a terminal verdict. Every chain has been stopped when this returns.
    pub async fn run(mut self) -> RunOutcome {
        info!(
            run_id = %self.run_id,
            input = %self.config.input.display(),
            chains = self.config.chains,
            processes = self.config.processes,
            output_base = %self.layout.base().display(),
            "Starting supervised run"
        );

        let verdict = match self.initialize().await {
            Ok(()) => {
                self.transition(SupervisorState::Running);
                self.run_loop().await
            }
            Err(reason) => Verdict::Failed(reason),
        };

        self.finish(verdict).await
    }

    /// Validate the configuration and spawn every chain.
    async fn initialize(&mut self) -> Result<(), FailureReason> {
        if let Err(err) = self.config.validate() {
            error!(error = %err, "Invalid run configuration");
            return Err(FailureReason::Config {
                message: err.to_string(),
            });
        }

        if self.config.chains < 2 {
            warn!(
                chains = self.config.chains,
                "Cross-chain diagnostics need at least two chains"
            );
        }

        for index in 0..self.config.chains {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled_reason());
            }

            let spec = self.chain_spec(ChainId(index));
            match self.launcher.start(&spec).await {
                Ok(handle) => {
                    info!(
                        chain = %spec.chain,
                        output_base = %spec.output_base.display(),
                        "Chain started"
                    );
                    self.chains.push(ManagedChain {
                        spec,
                        handle,
                        restarts: 0,
                        samples: 0,
                    });
                }
                Err(err) => {
                    error!(chain = %spec.chain, error = %err, "Chain failed to start");
                    return Err(FailureReason::SpawnError {
                        chain: spec.chain,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Sleep, poll, evaluate; until a terminal verdict.
    async fn run_loop(&mut self) -> Verdict {
        loop {
            let interval = self.config.poll.next_interval(&mut self.rng);
            debug!(sleep_secs = interval.as_secs(), "Sleeping until next poll");

            let cancel = self.cancel.clone();
            tokio::select! {
                () = sleep(interval) => {}
                () = cancel.cancelled() => return Verdict::Failed(self.cancelled_reason()),
            }

            self.cycles += 1;
            let verdict = self.run_cycle().await;
            debug!(cycle = self.cycles, verdict = verdict.label(), "Poll cycle finished");

            if verdict.is_terminal() {
                return verdict;
            }
            self.publish_status(Some(&verdict)).await;
        }
    }

    /// One poll cycle: liveness, sample snapshot, diagnostics, verdict.
    async fn run_cycle(&mut self) -> Verdict {
        let cycle = self.cycles;

        if let Some(verdict) = self.check_liveness(cycle).await {
            return verdict;
        }

        let snapshot = self.snapshot_samples().await;
        let min_seen = snapshot.min_samples();
        info!(
            cycle,
            min_samples = min_seen,
            floor = self.config.samples.min_sample_size,
            ceiling = self.config.samples.max_sample_size,
            "Sample counts read"
        );

        // A chain that died while the counts were read may have left a
        // half-written trace behind; it is handled like any other early exit.
        if let Some(verdict) = self.check_liveness(cycle).await {
            return verdict;
        }

        if let Some(verdict) = evaluator::check_floor(min_seen, &self.config.samples) {
            info!(cycle, min_samples = min_seen, "Below sample floor, diagnostics deferred");
            return verdict;
        }

        let request = DiagnosticsRequest {
            chain_outputs: self
                .chains
                .iter()
                .map(|chain| chain.handle.output_base().to_path_buf())
                .collect(),
            comparison_base: self.layout.base().to_path_buf(),
            burnin: self.config.diagnostics.burnin(min_seen),
        };

        let cancel = self.cancel.clone();
        let attempt = tokio::select! {
            attempt = collect_with_retry(self.collector.as_ref(), &self.config.diagnostics, &request) => attempt,
            () = cancel.cancelled() => return Verdict::Failed(self.cancelled_reason()),
        };
        self.diagnostics_invocations += u64::from(attempt.attempts);

        match attempt.result {
            Ok(metrics) => {
                self.consecutive_diagnostic_failures = 0;
                let verdict = evaluator::evaluate(
                    &metrics,
                    min_seen,
                    &self.config.thresholds,
                    &self.config.samples,
                );
                info!(
                    cycle,
                    max_diff = metrics.max_bipartition_diff,
                    min_effective_size = metrics.min_effective_size,
                    max_relative_diff = metrics.max_relative_diff,
                    verdict = verdict.label(),
                    "Diagnostics evaluated"
                );
                self.last_metrics = Some(metrics);
                verdict
            }
            Err(err) if !err.is_transient() => {
                error!(error = %err, "Diagnostics tool unavailable");
                Verdict::Failed(FailureReason::DiagnosticsToolUnavailable {
                    message: err.to_string(),
                })
            }
            Err(err) if min_seen >= self.config.samples.max_sample_size => {
                warn!(
                    error = %err,
                    min_samples = min_seen,
                    "Diagnostics failed at the sample ceiling, stopping chains"
                );
                Verdict::CeilingReached
            }
            Err(err) => {
                self.consecutive_diagnostic_failures += 1;
                let ceiling = self.config.diagnostics.failed_cycle_ceiling;
                if self.consecutive_diagnostic_failures >= ceiling {
                    error!(
                        error = %err,
                        failed_cycles = self.consecutive_diagnostic_failures,
                        "Diagnostics kept failing, giving up"
                    );
                    Verdict::Failed(FailureReason::DiagnosticsExhausted {
                        attempts: self.consecutive_diagnostic_failures,
                        last_error: err.to_string(),
                    })
                } else {
                    warn!(
                        error = %err,
                        failed_cycles = self.consecutive_diagnostic_failures,
                        ceiling,
                        "Diagnostics failed this cycle, trying again next poll"
                    );
                    Verdict::Continue
                }
            }
        }
    }

    /// Poll every chain and deal with the ones that exited.
    ///
    /// `Some` ends the cycle: a failure, a cancellation, or `Continue` after a
    /// relaunch so the relaunched chain is not evaluated yet.
    async fn check_liveness(&mut self, cycle: u64) -> Option<Verdict> {
        let mut relaunched = false;
        for index in 0..self.chains.len() {
            let status = self.chains[index].handle.poll().await;
            match status {
                PollStatus::Running => {}
                PollStatus::Unknown => {
                    warn!(chain = %self.chains[index].handle.id(), "Chain liveness unknown");
                }
                PollStatus::Exited(code) => {
                    if let Err(reason) = self.handle_early_exit(index, code).await {
                        return Some(Verdict::Failed(reason));
                    }
                    relaunched = true;
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Some(Verdict::Failed(self.cancelled_reason()));
        }

        if relaunched {
            info!(cycle, "Chain relaunched, evaluation deferred to the next cycle");
            return Some(Verdict::Continue);
        }

        None
    }

    /// React to a chain that exited before a terminal verdict: relaunch it if
    /// the restart policy allows, fail the run otherwise.
    async fn handle_early_exit(&mut self, index: usize, code: i32) -> Result<(), FailureReason> {
        let chain = &self.chains[index];
        let id = chain.handle.id();

        if !self.config.restart.allows(chain.restarts) {
            error!(chain = %id, code, restarts = chain.restarts, "Chain exited unexpectedly");
            return Err(FailureReason::UnexpectedExit { chain: id, code });
        }

        warn!(chain = %id, code, restarts = chain.restarts, "Chain exited unexpectedly, relaunching");
        let spec = chain.spec.clone();
        match self.launcher.start(&spec).await {
            Ok(handle) => {
                let chain = &mut self.chains[index];
                chain.handle = handle;
                chain.restarts += 1;
                Ok(())
            }
            Err(err) => {
                error!(chain = %id, error = %err, "Chain failed to relaunch");
                Err(FailureReason::SpawnError {
                    chain: id,
                    message: err.to_string(),
                })
            }
        }
    }

    /// Read every chain's sample count before anything else looks at the outputs.
    async fn snapshot_samples(&mut self) -> SampleSnapshot {
        let mut snapshot = SampleSnapshot::default();
        for chain in &mut self.chains {
            let samples = chain.handle.sample_count().await;
            chain.samples = chain.samples.max(samples);
            snapshot.push(chain.handle.id(), chain.samples);
        }
        snapshot
    }

    /// Enter the terminal state, stop every chain and build the outcome.
    async fn finish(mut self, verdict: Verdict) -> RunOutcome {
        if let Some(state) = SupervisorState::for_verdict(&verdict) {
            self.transition(state);
        }

        self.stop_all().await;
        self.publish_status(Some(&verdict)).await;

        match &verdict {
            Verdict::Failed(reason) => {
                error!(run_id = %self.run_id, code = reason.code(), reason = %reason, "Run failed");
            }
            other => {
                info!(
                    run_id = %self.run_id,
                    verdict = other.label(),
                    cycles = self.cycles,
                    "Run finished"
                );
            }
        }

        RunOutcome {
            run_id: self.run_id,
            verdict,
            cycles: self.cycles,
            diagnostics_invocations: self.diagnostics_invocations,
            chains: self.chains.iter().map(ManagedChain::status).collect(),
            last_metrics: self.last_metrics,
        }
    }

    /// Gracefully stop all chains concurrently; kill whatever is left once the
    /// hard deadline passes.
    async fn stop_all(&mut self) {
        if self.chains.is_empty() {
            return;
        }

        let deadline = Duration::from_secs(self.config.shutdown.hard_deadline_secs);
        info!(
            chains = self.chains.len(),
            deadline_secs = deadline.as_secs(),
            "Stopping chains"
        );

        let stops = self.chains.iter_mut().map(|chain| async move {
            let id = chain.handle.id();
            (id, chain.handle.stop(true).await)
        });

        let stopped = timeout(deadline, join_all(stops)).await;
        let mut needs_kill = Vec::new();
        match stopped {
            Ok(results) => {
                for (chain, result) in results {
                    if let Err(err) = result {
                        warn!(chain = %chain, error = %err, "Graceful stop failed");
                        needs_kill.push(chain);
                    }
                }
            }
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs(), "Shutdown deadline passed, killing chains");
                needs_kill.extend(self.chains.iter().map(|chain| chain.spec.chain));
            }
        }

        for chain in self
            .chains
            .iter_mut()
            .filter(|chain| needs_kill.contains(&chain.spec.chain))
        {
            if let Err(err) = chain.handle.stop(false).await {
                error!(chain = %chain.spec.chain, error = %err, "Failed to kill chain");
            }
        }

        for chain in &mut self.chains {
            let samples = chain.handle.sample_count().await;
            chain.samples = chain.samples.max(samples);
        }
    }

    async fn publish_status(&self, verdict: Option<&Verdict>) {
        let report = StatusReport {
            run_id: self.run_id,
            cycle: self.cycles,
            state: self.state.to_string(),
            verdict: verdict.cloned(),
            chains: self.chains.iter().map(ManagedChain::status).collect(),
            metrics: self.last_metrics.clone(),
            consecutive_diagnostic_failures: self.consecutive_diagnostic_failures,
            updated_at: Utc::now(),
        };
        self.status_sink.publish(&report).await;
    }

    fn transition(&mut self, to: SupervisorState) {
        info!(from = %self.state, to = %to, "Supervisor state change");
        self.state = to;
    }

    fn cancelled_reason(&self) -> FailureReason {
        let signal = self.cancel.reason();
        warn!(reason = %signal, "Run cancelled");
        FailureReason::Cancelled { signal }
    }

    fn chain_spec(&self, chain: ChainId) -> ChainSpec {
        ChainSpec {
            chain,
            input: self.config.input.clone(),
            sampler_args: self.config.sampler_args.clone(),
            processes: self.config.processes,
            output_base: self.layout.chain_base(chain),
        }
    }
}
