use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// Configuration of one supervised run.
///
/// Built once at startup by the config loader and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// Path to the input alignment; also the base of every output name
    #[serde(default)]
    pub input: PathBuf,

    /// Sampler arguments, passed through verbatim (split on whitespace)
    #[serde(default = "default_sampler_args")]
    pub sampler_args: String,

    /// Number of independent chains to run
    #[serde(default = "default_chains")]
    pub chains: usize,

    /// Number of ranks each chain is distributed over (1 = single process)
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Convergence thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Per-chain sample floor and ceiling
    #[serde(default)]
    pub samples: SampleBounds,

    /// Poll interval bounds
    #[serde(default)]
    pub poll: PollConfig,

    /// How chains are launched
    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Diagnostics tool invocation and retry settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Chain shutdown bounds
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// What to do when a chain exits before a terminal verdict
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Write a JSON status document next to the chain outputs every cycle
    #[serde(default = "default_true")]
    pub status_file: bool,
}

fn default_sampler_args() -> String {
    "-cat -gtr".to_string()
}

const fn default_chains() -> usize {
    2
}

const fn default_processes() -> usize {
    1
}

const fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            sampler_args: default_sampler_args(),
            chains: default_chains(),
            processes: default_processes(),
            thresholds: ThresholdConfig::default(),
            samples: SampleBounds::default(),
            poll: PollConfig::default(),
            launcher: LauncherConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            shutdown: ShutdownConfig::default(),
            restart: RestartPolicy::default(),
            logging: LoggingConfig::default(),
            status_file: default_true(),
        }
    }
}

impl RunConfig {
    /// Validate the configuration. Called before any chain is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.as_os_str().is_empty() {
            return Err(ConfigError::MissingInput);
        }

        if self.chains == 0 {
            return Err(ConfigError::InvalidChainCount(self.chains));
        }

        if self.processes == 0 {
            return Err(ConfigError::InvalidProcessCount(self.processes));
        }

        self.thresholds.validate()?;

        if self.samples.min_sample_size > self.samples.max_sample_size {
            return Err(ConfigError::SampleBounds {
                min: self.samples.min_sample_size,
                max: self.samples.max_sample_size,
            });
        }

        if self.poll.sleep_min_secs > self.poll.sleep_max_secs {
            return Err(ConfigError::SleepRange {
                min: self.poll.sleep_min_secs,
                max: self.poll.sleep_max_secs,
            });
        }

        self.diagnostics.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }
}

/// Thresholds the diagnostics must meet for the chains to count as converged.
///
/// All comparisons are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThresholdConfig {
    /// Largest acceptable bpcomp maxdiff (<0.1 good, <0.3 acceptable)
    #[serde(default = "default_max_diff_bpcomp")]
    pub max_diff_bpcomp: f64,

    /// Smallest acceptable tracecomp effective size (>300 good, >50 acceptable)
    #[serde(default = "default_effective_size_tracecomp")]
    pub effective_size_tracecomp: f64,

    /// Largest acceptable tracecomp relative difference (<0.1 good, <0.3 acceptable)
    #[serde(default = "default_relative_diff_tracecomp")]
    pub relative_diff_tracecomp: f64,
}

const fn default_max_diff_bpcomp() -> f64 {
    0.3
}

const fn default_effective_size_tracecomp() -> f64 {
    50.0
}

const fn default_relative_diff_tracecomp() -> f64 {
    0.3
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_diff_bpcomp: default_max_diff_bpcomp(),
            effective_size_tracecomp: default_effective_size_tracecomp(),
            relative_diff_tracecomp: default_relative_diff_tracecomp(),
        }
    }
}

impl ThresholdConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_diff_bpcomp", self.max_diff_bpcomp),
            ("effective_size_tracecomp", self.effective_size_tracecomp),
            ("relative_diff_tracecomp", self.relative_diff_tracecomp),
        ];

        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeThreshold { name, value });
            }
        }

        Ok(())
    }
}

/// Per-chain sample bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SampleBounds {
    /// Samples every chain needs before diagnostics are attempted
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// Samples after which the run stops even without convergence
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: u64,
}

const fn default_min_sample_size() -> u64 {
    6667
}

const fn default_max_sample_size() -> u64 {
    100_000
}

impl Default for SampleBounds {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            max_sample_size: default_max_sample_size(),
        }
    }
}

/// Bounds of the randomized sleep between two polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollConfig {
    #[serde(default = "default_sleep_secs")]
    pub sleep_min_secs: u64,

    #[serde(default = "default_sleep_secs")]
    pub sleep_max_secs: u64,
}

const fn default_sleep_secs() -> u64 {
    3600
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            sleep_min_secs: default_sleep_secs(),
            sleep_max_secs: default_sleep_secs(),
        }
    }
}

impl PollConfig {
    /// Draw the next sleep uniformly from `[sleep_min_secs, sleep_max_secs]`.
    pub fn next_interval(&self, rng: &mut fastrand::Rng) -> Duration {
        let (low, high) = if self.sleep_min_secs <= self.sleep_max_secs {
            (self.sleep_min_secs, self.sleep_max_secs)
        } else {
            (self.sleep_max_secs, self.sleep_min_secs)
        };
        Duration::from_secs(rng.u64(low..=high))
    }
}

/// Execution substrate used to launch one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// srun inside a Slurm allocation, mpirun for multi-rank chains, plain otherwise
    #[default]
    Auto,
    /// Run the sampler binary directly
    Direct,
    /// Run through an MPI launcher
    Mpirun,
    /// Run as a Slurm job step
    Srun,
}

/// Chain launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LauncherConfig {
    #[serde(default)]
    pub strategy: ExecutionStrategy,

    /// Single-process sampler binary
    #[serde(default = "default_sampler_binary")]
    pub sampler_binary: String,

    /// Multi-rank sampler binary
    #[serde(default = "default_mpi_sampler_binary")]
    pub mpi_sampler_binary: String,

    #[serde(default = "default_mpirun_binary")]
    pub mpirun_binary: String,

    #[serde(default = "default_srun_binary")]
    pub srun_binary: String,

    /// Restart a chain from its existing output instead of starting afresh
    #[serde(default = "default_true")]
    pub resume_existing: bool,

    /// A chain that exits within this window counts as a failed start
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
}

fn default_sampler_binary() -> String {
    "pb".to_string()
}

fn default_mpi_sampler_binary() -> String {
    "pb_mpi".to_string()
}

fn default_mpirun_binary() -> String {
    "mpirun".to_string()
}

fn default_srun_binary() -> String {
    "srun".to_string()
}

const fn default_startup_grace_secs() -> u64 {
    5
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            sampler_binary: default_sampler_binary(),
            mpi_sampler_binary: default_mpi_sampler_binary(),
            mpirun_binary: default_mpirun_binary(),
            srun_binary: default_srun_binary(),
            resume_existing: default_true(),
            startup_grace_secs: default_startup_grace_secs(),
        }
    }
}

/// Diagnostics tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticsConfig {
    #[serde(default = "default_bpcomp_binary")]
    pub bpcomp_binary: String,

    #[serde(default = "default_tracecomp_binary")]
    pub tracecomp_binary: String,

    /// Upper bound on a single tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Fraction of the shortest chain discarded as burn-in
    #[serde(default = "default_burnin_fraction")]
    pub burnin_fraction: f64,

    /// Transient failures retried within one poll cycle
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Consecutive poll cycles whose diagnostics failed before the run fails
    #[serde(default = "default_failed_cycle_ceiling")]
    pub failed_cycle_ceiling: u32,

    /// Attempts at reading a trace that is still being appended
    #[serde(default = "default_partial_read_retries")]
    pub partial_read_retries: u32,
}

fn default_bpcomp_binary() -> String {
    "bpcomp".to_string()
}

fn default_tracecomp_binary() -> String {
    "tracecomp".to_string()
}

const fn default_tool_timeout_secs() -> u64 {
    600
}

const fn default_burnin_fraction() -> f64 {
    0.25
}

const fn default_transient_retries() -> u32 {
    3
}

const fn default_retry_initial_backoff_ms() -> u64 {
    500
}

const fn default_retry_max_backoff_ms() -> u64 {
    5000
}

const fn default_failed_cycle_ceiling() -> u32 {
    3
}

const fn default_partial_read_retries() -> u32 {
    3
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            bpcomp_binary: default_bpcomp_binary(),
            tracecomp_binary: default_tracecomp_binary(),
            tool_timeout_secs: default_tool_timeout_secs(),
            burnin_fraction: default_burnin_fraction(),
            transient_retries: default_transient_retries(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            failed_cycle_ceiling: default_failed_cycle_ceiling(),
            partial_read_retries: default_partial_read_retries(),
        }
    }
}

impl DiagnosticsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.burnin_fraction) {
            return Err(ConfigError::InvalidBurnin(self.burnin_fraction));
        }

        if self.failed_cycle_ceiling == 0 {
            return Err(ConfigError::InvalidRetries("failed_cycle_ceiling"));
        }

        if self.partial_read_retries == 0 {
            return Err(ConfigError::InvalidRetries("partial_read_retries"));
        }

        if self.retry_initial_backoff_ms > self.retry_max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                self.retry_initial_backoff_ms,
                self.retry_max_backoff_ms,
            ));
        }

        Ok(())
    }

    /// Samples discarded as burn-in given the shortest chain length.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn burnin(&self, min_samples: u64) -> u64 {
        (min_samples as f64 * self.burnin_fraction).floor() as u64
    }
}

/// Bounds on stopping chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShutdownConfig {
    /// Time a chain gets to exit after the cooperative stop request
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Deadline for stopping all chains, after which they are killed
    #[serde(default = "default_hard_deadline_secs")]
    pub hard_deadline_secs: u64,
}

const fn default_grace_period_secs() -> u64 {
    60
}

const fn default_hard_deadline_secs() -> u64 {
    120
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            hard_deadline_secs: default_hard_deadline_secs(),
        }
    }
}

/// Reaction to a chain that terminates before the run reaches a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Any early exit fails the run
    #[default]
    Never,
    /// Relaunch the chain (resuming from its output) up to `max_restarts` times
    OnFailure { max_restarts: u32 },
}

impl RestartPolicy {
    /// Whether a chain that has already been restarted `restarts` times may be restarted again.
    pub const fn allows(&self, restarts: u32) -> bool {
        match self {
            Self::Never => false,
            Self::OnFailure { max_restarts } => restarts < *max_restarts,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (if None logs only go to stderr)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Also log to stderr when a log directory is set
    #[serde(default = "default_true")]
    pub enable_stderr: bool,

    /// Log file rotation
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stderr: default_true(),
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    #[default]
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RunConfig {
        RunConfig {
            input: PathBuf::from("data/alignment.phy"),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_governor_conventions() {
        let config = RunConfig::default();
        assert_eq!(config.chains, 2);
        assert_eq!(config.processes, 1);
        assert_eq!(config.sampler_args, "-cat -gtr");
        assert!((config.thresholds.max_diff_bpcomp - 0.3).abs() < f64::EPSILON);
        assert!((config.thresholds.effective_size_tracecomp - 50.0).abs() < f64::EPSILON);
        assert!((config.thresholds.relative_diff_tracecomp - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.samples.min_sample_size, 6667);
        assert_eq!(config.samples.max_sample_size, 100_000);
        assert_eq!(config.poll.sleep_min_secs, 3600);
        assert_eq!(config.restart, RestartPolicy::Never);
    }

    #[test]
    fn test_validate_requires_input() {
        let config = RunConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingInput));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_floor_above_ceiling() {
        let mut config = valid_config();
        config.samples.min_sample_size = 500;
        config.samples.max_sample_size = 100;
        assert_eq!(
            config.validate(),
            Err(ConfigError::SampleBounds { min: 500, max: 100 })
        );
    }

    #[test]
    fn test_validate_floor_equal_to_ceiling_is_allowed() {
        let mut config = valid_config();
        config.samples.min_sample_size = 100;
        config.samples.max_sample_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_chains_and_processes() {
        let mut config = valid_config();
        config.chains = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChainCount(0)));

        let mut config = valid_config();
        config.processes = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidProcessCount(0)));
    }

    #[test]
    fn test_validate_rejects_nan_threshold() {
        let mut config = valid_config();
        config.thresholds.relative_diff_tracecomp = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeThreshold {
                name: "relative_diff_tracecomp",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_sleep_range() {
        let mut config = valid_config();
        config.poll.sleep_min_secs = 7200;
        config.poll.sleep_max_secs = 3600;
        assert_eq!(
            config.validate(),
            Err(ConfigError::SleepRange { min: 7200, max: 3600 })
        );
    }

    #[test]
    fn test_validate_burnin_fraction() {
        let mut config = valid_config();
        config.diagnostics.burnin_fraction = 1.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidBurnin(1.0)));
    }

    #[test]
    fn test_burnin_is_a_quarter_of_shortest_chain() {
        let diagnostics = DiagnosticsConfig::default();
        assert_eq!(diagnostics.burnin(6667), 1666);
        assert_eq!(diagnostics.burnin(0), 0);
    }

    #[test]
    fn test_poll_interval_stays_within_bounds() {
        let poll = PollConfig {
            sleep_min_secs: 10,
            sleep_max_secs: 20,
        };
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..100 {
            let secs = poll.next_interval(&mut rng).as_secs();
            assert!((10..=20).contains(&secs));
        }
    }

    #[test]
    fn test_fixed_poll_interval() {
        let poll = PollConfig::default();
        let mut rng = fastrand::Rng::with_seed(1);
        assert_eq!(poll.next_interval(&mut rng), Duration::from_secs(3600));
    }

    #[test]
    fn test_restart_policy_budget() {
        assert!(!RestartPolicy::Never.allows(0));
        let policy = RestartPolicy::OnFailure { max_restarts: 2 };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
input: runs/opisthokonta.phy
chains: 4
processes: 16
thresholds:
  max_diff_bpcomp: 0.1
samples:
  min_sample_size: 1000
restart:
  mode: on_failure
  max_restarts: 2
logging:
  level: debug
  format: json
";
        let config: RunConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.chains, 4);
        assert_eq!(config.processes, 16);
        assert!((config.thresholds.max_diff_bpcomp - 0.1).abs() < f64::EPSILON);
        assert!((config.thresholds.effective_size_tracecomp - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.samples.min_sample_size, 1000);
        assert_eq!(config.samples.max_sample_size, 100_000);
        assert_eq!(config.restart, RestartPolicy::OnFailure { max_restarts: 2 });
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }
}
