//! Common test utilities for integration tests
//!
//! Fake chains, a fake launcher and a scripted diagnostics collector, so the
//! supervisor can be driven without any Phylobayes binary installed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pbgovernor::domain::errors::{DiagnosticsError, ProcessError};
use pbgovernor::domain::models::{
    ChainId, ChainSpec, ChainState, ConvergenceMetrics, PollStatus, RunConfig,
};
use pbgovernor::domain::ports::{
    ChainLauncher, ChainProcess, DiagnosticsCollector, DiagnosticsRequest, StatusReport,
    StatusSink,
};
use pbgovernor::services::CancelHandle;

/// Shared knobs and counters for one fake chain, surviving relaunches
#[derive(Default)]
pub struct ChainControl {
    pub samples: AtomicU64,
    /// Exit code the chain reports on its next poll
    pub exit_code: Mutex<Option<i32>>,
    /// Ignore graceful stops, so only a kill ends the chain
    pub ignore_graceful: AtomicBool,
    pub graceful_stops: AtomicU32,
    pub kills: AtomicU32,
    /// stop() calls that found the chain already stopped
    pub noop_stops: AtomicU32,
    pub starts: AtomicU32,
    /// Exit code a relaunched chain reports, instead of running on
    pub relaunch_exit: Mutex<Option<i32>>,
    /// Exit code the chain takes on while its samples are being read
    pub exit_on_sample_read: Mutex<Option<i32>>,
}

impl ChainControl {
    pub fn set_samples(&self, samples: u64) {
        self.samples.store(samples, Ordering::SeqCst);
    }

    pub fn exit_with(&self, code: i32) {
        *self.exit_code.lock().unwrap() = Some(code);
    }

    pub fn graceful_stops(&self) -> u32 {
        self.graceful_stops.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn noop_stops(&self) -> u32 {
        self.noop_stops.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

pub struct FakeChain {
    id: ChainId,
    base: PathBuf,
    state: ChainState,
    control: Arc<ChainControl>,
}

#[async_trait]
impl ChainProcess for FakeChain {
    fn id(&self) -> ChainId {
        self.id
    }

    fn state(&self) -> ChainState {
        self.state
    }

    fn output_base(&self) -> &Path {
        &self.base
    }

    async fn poll(&mut self) -> PollStatus {
        match self.state {
            ChainState::Exited(code) => return PollStatus::Exited(code),
            ChainState::Killed => return PollStatus::Exited(137),
            ChainState::Starting | ChainState::Running => {}
        }

        let exit = *self.control.exit_code.lock().unwrap();
        match exit {
            Some(code) => {
                self.state = ChainState::Exited(code);
                PollStatus::Exited(code)
            }
            None => {
                self.state = ChainState::Running;
                PollStatus::Running
            }
        }
    }

    async fn sample_count(&mut self) -> u64 {
        let exit = self.control.exit_on_sample_read.lock().unwrap().take();
        if exit.is_some() {
            *self.control.exit_code.lock().unwrap() = exit;
        }
        self.control.samples.load(Ordering::SeqCst)
    }

    async fn stop(&mut self, graceful: bool) -> Result<(), ProcessError> {
        if !self.state.is_live() {
            self.control.noop_stops.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        if graceful {
            self.control.graceful_stops.fetch_add(1, Ordering::SeqCst);
            if self.control.ignore_graceful.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
        } else {
            self.control.kills.fetch_add(1, Ordering::SeqCst);
        }

        self.state = ChainState::Killed;
        Ok(())
    }
}

/// Launcher handing out fake chains, one control block per chain index
pub struct FakeLauncher {
    pub controls: Vec<Arc<ChainControl>>,
    /// Chain index whose start fails
    pub fail_on: Option<usize>,
}

impl FakeLauncher {
    pub fn new(chains: usize) -> Self {
        Self {
            controls: (0..chains)
                .map(|_| Arc::new(ChainControl::default()))
                .collect(),
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, index: usize) -> Self {
        self.fail_on = Some(index);
        self
    }

    pub fn control(&self, index: usize) -> Arc<ChainControl> {
        Arc::clone(&self.controls[index])
    }

    pub fn set_all_samples(&self, samples: u64) {
        for control in &self.controls {
            control.set_samples(samples);
        }
    }
}

#[async_trait]
impl ChainLauncher for FakeLauncher {
    async fn start(&self, spec: &ChainSpec) -> Result<Box<dyn ChainProcess>, ProcessError> {
        if self.fail_on == Some(spec.chain.index()) {
            return Err(ProcessError::Spawn {
                chain: spec.chain,
                program: "pb".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "pb: not found"),
            });
        }

        let control = Arc::clone(&self.controls[spec.chain.index()]);
        let previous_starts = control.starts.fetch_add(1, Ordering::SeqCst);
        if previous_starts > 0 {
            // A relaunched chain resumes its output and runs again
            let next = control.relaunch_exit.lock().unwrap().take();
            *control.exit_code.lock().unwrap() = next;
        }

        Ok(Box::new(FakeChain {
            id: spec.chain,
            base: spec.output_base.clone(),
            state: ChainState::Starting,
            control,
        }))
    }
}

type CollectorResult = Result<ConvergenceMetrics, DiagnosticsError>;

/// Collector replaying a fixed script, then repeating a fallback result
pub struct ScriptedCollector {
    script: Mutex<VecDeque<CollectorResult>>,
    fallback: Box<dyn Fn() -> CollectorResult + Send + Sync>,
    calls: AtomicU32,
    requests: Mutex<Vec<DiagnosticsRequest>>,
}

impl ScriptedCollector {
    pub fn new(script: Vec<CollectorResult>) -> Self {
        Self::with_fallback(script, || Ok(metrics(0.0, 1000.0, 0.0)))
    }

    pub fn with_fallback(
        script: Vec<CollectorResult>,
        fallback: impl Fn() -> CollectorResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Box::new(fallback),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(metrics: ConvergenceMetrics) -> Self {
        Self::with_fallback(Vec::new(), move || Ok(metrics.clone()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DiagnosticsRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagnosticsCollector for ScriptedCollector {
    async fn compute(&self, request: &DiagnosticsRequest) -> CollectorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| (self.fallback)())
    }
}

/// Status sink recording every report; optionally cancels the run after `n` reports
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<StatusReport>>,
    cancel_after: Option<(usize, CancelHandle)>,
}

impl RecordingSink {
    pub fn cancelling_after(reports: usize, cancel: CancelHandle) -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            cancel_after: Some((reports, cancel)),
        }
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn publish(&self, report: &StatusReport) {
        let count = {
            let mut reports = self.reports.lock().unwrap();
            reports.push(report.clone());
            reports.len()
        };
        if let Some((after, cancel)) = &self.cancel_after {
            if count >= *after {
                cancel.cancel("test");
            }
        }
    }
}

pub fn metrics(max_diff: f64, min_ess: f64, max_rel_diff: f64) -> ConvergenceMetrics {
    ConvergenceMetrics::new(max_diff, min_ess, max_rel_diff)
}

pub fn transient() -> DiagnosticsError {
    DiagnosticsError::ToolFailed {
        tool: "bpcomp".to_string(),
        code: Some(1),
        stderr: "error reading treelist".to_string(),
    }
}

/// Two chains, a one-second poll and fast retries
pub fn run_config(min_sample_size: u64, max_sample_size: u64) -> RunConfig {
    let mut config = RunConfig {
        input: PathBuf::from("data/aln.phy"),
        ..Default::default()
    };
    config.samples.min_sample_size = min_sample_size;
    config.samples.max_sample_size = max_sample_size;
    config.poll.sleep_min_secs = 1;
    config.poll.sleep_max_secs = 1;
    config.diagnostics.retry_initial_backoff_ms = 10;
    config.diagnostics.retry_max_backoff_ms = 100;
    config.shutdown.grace_period_secs = 1;
    config.shutdown.hard_deadline_secs = 5;
    config
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write an executable shell script to `dir/name`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path)
        .expect("stat script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}
