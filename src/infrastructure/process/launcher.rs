//! Chain launcher: builds the sampler command line for the execution strategy
//! in effect and spawns it in a fresh process group.

use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::handle::{exit_code, SamplerProcess};
use crate::domain::errors::ProcessError;
use crate::domain::models::chain::{log_path, trace_path};
use crate::domain::models::{ChainSpec, ExecutionStrategy, LauncherConfig, ShutdownConfig};
use crate::domain::ports::{ChainLauncher, ChainProcess};

/// Where the chain's stdout and stderr go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCapture {
    /// Redirected by us into `<base>.out`
    LogFile,
    /// The launcher writes `<base>.out` itself (`srun -o`)
    Delegated,
}

/// A fully resolved command line for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub capture: OutputCapture,
}

/// Launches sampler chains directly, through mpirun, or as Slurm job steps.
pub struct SamplerLauncher {
    config: LauncherConfig,
    shutdown: ShutdownConfig,
    in_slurm: bool,
}

impl SamplerLauncher {
    /// Create a launcher. Slurm is detected from `SLURM_JOB_ID`.
    pub fn new(config: LauncherConfig, shutdown: ShutdownConfig) -> Self {
        let in_slurm = std::env::var_os("SLURM_JOB_ID").is_some();
        Self {
            config,
            shutdown,
            in_slurm,
        }
    }

    /// Override Slurm detection.
    #[must_use]
    pub const fn with_slurm(mut self, in_slurm: bool) -> Self {
        self.in_slurm = in_slurm;
        self
    }

    /// The strategy a chain with `processes` ranks is launched with
    pub const fn strategy_for(&self, processes: usize) -> ExecutionStrategy {
        resolve_strategy(self.config.strategy, processes, self.in_slurm)
    }

    /// Build the command line for `spec`.
    ///
    /// With `resume` set the sampler is pointed at its existing output and
    /// picks up where it left off; otherwise it starts afresh from the input.
    pub fn build_command(&self, spec: &ChainSpec, resume: bool) -> LaunchCommand {
        let strategy = self.strategy_for(spec.processes);
        let sampler = if spec.processes > 1 {
            &self.config.mpi_sampler_binary
        } else {
            &self.config.sampler_binary
        };

        let name = spec.output_base.to_string_lossy().into_owned();
        let mut sampler_args: Vec<String> = Vec::new();
        if !resume {
            sampler_args.extend(spec.sampler_args.split_whitespace().map(str::to_string));
            sampler_args.push("-d".to_string());
            sampler_args.push(spec.input.to_string_lossy().into_owned());
        }
        sampler_args.push(name.clone());

        match strategy {
            ExecutionStrategy::Srun => {
                let mut args = vec![
                    "--cpu_bind=v,threads".to_string(),
                    "-c".to_string(),
                    "1".to_string(),
                    "-n".to_string(),
                    spec.processes.to_string(),
                    "-o".to_string(),
                    format!("{name}.out"),
                    sampler.clone(),
                ];
                args.extend(sampler_args);
                LaunchCommand {
                    program: self.config.srun_binary.clone(),
                    args,
                    capture: OutputCapture::Delegated,
                }
            }
            ExecutionStrategy::Mpirun => {
                let mut args = vec!["-np".to_string(), spec.processes.to_string(), sampler.clone()];
                args.extend(sampler_args);
                LaunchCommand {
                    program: self.config.mpirun_binary.clone(),
                    args,
                    capture: OutputCapture::LogFile,
                }
            }
            ExecutionStrategy::Direct | ExecutionStrategy::Auto => LaunchCommand {
                program: sampler.clone(),
                args: sampler_args,
                capture: OutputCapture::LogFile,
            },
        }
    }

    fn should_resume(&self, spec: &ChainSpec) -> bool {
        self.config.resume_existing && trace_path(&spec.output_base).exists()
    }
}

/// Resolve `Auto` against the environment. Explicit strategies pass through.
pub const fn resolve_strategy(
    configured: ExecutionStrategy,
    processes: usize,
    in_slurm: bool,
) -> ExecutionStrategy {
    match configured {
        ExecutionStrategy::Auto if in_slurm => ExecutionStrategy::Srun,
        ExecutionStrategy::Auto if processes > 1 => ExecutionStrategy::Mpirun,
        ExecutionStrategy::Auto => ExecutionStrategy::Direct,
        other => other,
    }
}

fn open_log(spec: &ChainSpec) -> Result<(Stdio, Stdio), ProcessError> {
    let path = log_path(&spec.output_base);
    let io_err = |source| ProcessError::Io {
        chain: spec.chain,
        path: path.clone(),
        source,
    };

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err)?;
    let stderr = stdout.try_clone().map_err(io_err)?;
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}

#[async_trait]
impl ChainLauncher for SamplerLauncher {
    async fn start(&self, spec: &ChainSpec) -> Result<Box<dyn ChainProcess>, ProcessError> {
        let resume = self.should_resume(spec);
        let command = self.build_command(spec, resume);

        info!(
            chain = %spec.chain,
            program = %command.program,
            args = ?command.args,
            resume,
            "Launching chain"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .process_group(0);

        match command.capture {
            OutputCapture::LogFile => {
                let (stdout, stderr) = open_log(spec)?;
                cmd.stdout(stdout).stderr(stderr);
            }
            OutputCapture::Delegated => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            chain: spec.chain,
            program: command.program.clone(),
            source,
        })?;

        let Some(pid) = child.id() else {
            return Err(ProcessError::StartupExit {
                chain: spec.chain,
                code: -1,
            });
        };

        // A sampler that dies straight away (bad arguments, unreadable input)
        // is a failed start rather than an early exit.
        let grace = Duration::from_secs(self.config.startup_grace_secs);
        let early_exit = if grace.is_zero() {
            child.try_wait().ok().flatten()
        } else {
            timeout(grace, child.wait()).await.ok().and_then(Result::ok)
        };
        if let Some(status) = early_exit {
            return Err(ProcessError::StartupExit {
                chain: spec.chain,
                code: exit_code(status),
            });
        }

        let process = SamplerProcess::new(
            spec.chain,
            spec.output_base.clone(),
            child,
            pid,
            Duration::from_secs(self.shutdown.grace_period_secs),
        );
        debug!(chain = %spec.chain, pgid = process.pgid(), "Chain process group started");

        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ChainId;
    use std::path::PathBuf;

    fn spec(processes: usize) -> ChainSpec {
        ChainSpec {
            chain: ChainId(0),
            input: PathBuf::from("data/aln.phy"),
            sampler_args: "-cat  -gtr".to_string(),
            processes,
            output_base: PathBuf::from("data/aln_cat_gtr_4_chain1"),
        }
    }

    fn launcher(strategy: ExecutionStrategy, in_slurm: bool) -> SamplerLauncher {
        let config = LauncherConfig {
            strategy,
            ..Default::default()
        };
        SamplerLauncher::new(config, ShutdownConfig::default()).with_slurm(in_slurm)
    }

    #[test]
    fn test_auto_strategy_resolution() {
        assert_eq!(
            resolve_strategy(ExecutionStrategy::Auto, 4, true),
            ExecutionStrategy::Srun
        );
        assert_eq!(
            resolve_strategy(ExecutionStrategy::Auto, 4, false),
            ExecutionStrategy::Mpirun
        );
        assert_eq!(
            resolve_strategy(ExecutionStrategy::Auto, 1, false),
            ExecutionStrategy::Direct
        );
        assert_eq!(
            resolve_strategy(ExecutionStrategy::Direct, 4, true),
            ExecutionStrategy::Direct
        );
    }

    #[test]
    fn test_srun_command_line() {
        let command = launcher(ExecutionStrategy::Auto, true).build_command(&spec(4), false);
        assert_eq!(command.program, "srun");
        assert_eq!(
            command.args,
            vec![
                "--cpu_bind=v,threads",
                "-c",
                "1",
                "-n",
                "4",
                "-o",
                "data/aln_cat_gtr_4_chain1.out",
                "pb_mpi",
                "-cat",
                "-gtr",
                "-d",
                "data/aln.phy",
                "data/aln_cat_gtr_4_chain1",
            ]
        );
        assert_eq!(command.capture, OutputCapture::Delegated);
    }

    #[test]
    fn test_mpirun_command_line() {
        let command = launcher(ExecutionStrategy::Mpirun, false).build_command(&spec(4), false);
        assert_eq!(command.program, "mpirun");
        assert_eq!(&command.args[..3], ["-np", "4", "pb_mpi"]);
        assert_eq!(command.capture, OutputCapture::LogFile);
    }

    #[test]
    fn test_direct_single_process_uses_pb() {
        let command = launcher(ExecutionStrategy::Auto, false).build_command(&spec(1), false);
        assert_eq!(command.program, "pb");
        assert_eq!(
            command.args,
            vec!["-cat", "-gtr", "-d", "data/aln.phy", "data/aln_cat_gtr_4_chain1"]
        );
    }

    #[test]
    fn test_resume_passes_only_the_chain_name() {
        let command = launcher(ExecutionStrategy::Direct, false).build_command(&spec(1), true);
        assert_eq!(command.args, vec!["data/aln_cat_gtr_4_chain1"]);

        let command = launcher(ExecutionStrategy::Srun, true).build_command(&spec(2), true);
        assert_eq!(
            command.args.last().map(String::as_str),
            Some("data/aln_cat_gtr_4_chain1")
        );
        assert_eq!(command.args[command.args.len() - 2], "pb_mpi");
    }

    #[test]
    fn test_resume_requires_existing_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = spec(1);
        chain.output_base = dir.path().join("aln_chain1");

        let launcher = launcher(ExecutionStrategy::Direct, false);
        assert!(!launcher.should_resume(&chain));

        std::fs::write(trace_path(&chain.output_base), "#iter\n").unwrap();
        assert!(launcher.should_resume(&chain));

        let no_resume = SamplerLauncher::new(
            LauncherConfig {
                resume_existing: false,
                ..Default::default()
            },
            ShutdownConfig::default(),
        );
        assert!(!no_resume.should_resume(&chain));
    }
}
