//! CLI type definitions
//!
//! Flags mirror the long-standing `start_phylobayes` options so existing
//! sbatch scripts keep working; everything else comes from `--config` or
//! `PBGOV_*` variables.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::domain::models::{ExecutionStrategy, LogFormat, RestartPolicy};
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "pbgovernor")]
#[command(
    about = "Starts two or more Phylobayes chains (stand-alone, with mpirun or with srun) and stops them once they converge"
)]
#[command(version)]
pub struct Cli {
    /// Path to the alignment; its stem is the base of the output names
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Phylobayes arguments, e.g. --pb-args="-cat -gtr" (part of the output names)
    #[arg(long, allow_hyphen_values = true)]
    pub pb_args: Option<String>,

    /// Number of chains to start
    #[arg(short, long)]
    pub chains: Option<usize>,

    /// Processes per chain; above 1 starts pb_mpi. Derived from SLURM_NTASKS under Slurm
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Largest bpcomp maxdiff accepted as converged
    #[arg(short = 'm', long)]
    pub max_diff_bpcomp: Option<f64>,

    /// Smallest tracecomp effective size accepted as converged
    #[arg(short = 'e', long)]
    pub effective_size_tracecomp: Option<f64>,

    /// Largest tracecomp relative difference accepted as converged
    #[arg(short = 'r', long)]
    pub relative_diff_tracecomp: Option<f64>,

    /// Sample count at which the chains are stopped regardless of convergence
    #[arg(short = 'x', long)]
    pub max_sample_size: Option<u64>,

    /// Sample count from which diagnostics run every poll
    #[arg(short = 'n', long)]
    pub min_sample_size: Option<u64>,

    /// Minimum seconds between polls
    #[arg(short = 'y', long)]
    pub sleep_range_min: Option<u64>,

    /// Maximum seconds between polls
    #[arg(short = 'z', long)]
    pub sleep_range_max: Option<u64>,

    /// YAML configuration file
    #[arg(long, env = "PBGOV_CONFIG")]
    pub config: Option<PathBuf>,

    /// How chains are launched
    #[arg(long, value_enum)]
    pub launcher: Option<LauncherArg>,

    /// Relaunch a chain that dies, resuming its output, up to N times
    #[arg(long, value_name = "N")]
    pub restart_on_failure: Option<u32>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    pub log_level: Option<String>,

    /// Console log format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Also write JSON logs to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Do not write the per-cycle status document
    #[arg(long)]
    pub no_status_file: bool,

    /// Seed for the poll interval jitter
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output the run summary in JSON format
    #[arg(short, long)]
    pub json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LauncherArg {
    Auto,
    Direct,
    Mpirun,
    Srun,
}

impl From<LauncherArg> for ExecutionStrategy {
    fn from(arg: LauncherArg) -> Self {
        match arg {
            LauncherArg::Auto => Self::Auto,
            LauncherArg::Direct => Self::Direct,
            LauncherArg::Mpirun => Self::Mpirun,
            LauncherArg::Srun => Self::Srun,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

impl Cli {
    /// Config loader with the given flags as the highest-precedence layer.
    pub fn loader(&self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_file(path);
        }

        let loader = loader
            .set_opt("input", self.input.as_ref())
            .set_opt("sampler_args", self.pb_args.as_ref())
            .set_opt("chains", self.chains)
            .set_opt("processes", self.processes)
            .set_opt("thresholds.max_diff_bpcomp", self.max_diff_bpcomp)
            .set_opt("thresholds.effective_size_tracecomp", self.effective_size_tracecomp)
            .set_opt("thresholds.relative_diff_tracecomp", self.relative_diff_tracecomp)
            .set_opt("samples.max_sample_size", self.max_sample_size)
            .set_opt("samples.min_sample_size", self.min_sample_size)
            .set_opt("poll.sleep_min_secs", self.sleep_range_min)
            .set_opt("poll.sleep_max_secs", self.sleep_range_max)
            .set_opt("launcher.strategy", self.launcher.map(ExecutionStrategy::from))
            .set_opt(
                "restart",
                self.restart_on_failure
                    .map(|max_restarts| RestartPolicy::OnFailure { max_restarts }),
            )
            .set_opt("logging.level", self.log_level.as_ref())
            .set_opt("logging.format", self.log_format.map(LogFormat::from))
            .set_opt("logging.log_dir", self.log_dir.as_ref());

        if self.no_status_file {
            loader.set("status_file", false)
        } else {
            loader
        }
    }
}
