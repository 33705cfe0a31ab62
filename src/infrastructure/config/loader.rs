use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::Serialize;

pub use crate::domain::errors::ConfigError;
use crate::domain::models::RunConfig;

/// Prefix of environment overrides, e.g. `PBGOV_THRESHOLDS__MAX_DIFF_BPCOMP=0.1`
pub const ENV_PREFIX: &str = "PBGOV_";

/// Processes per chain changed to fit a Slurm allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlurmFit {
    /// `SLURM_NTASKS`
    pub ntasks: usize,
    /// Processes per chain before fitting
    pub requested: usize,
    pub processes: usize,
}

/// Configuration loader with hierarchical merging
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults (Serialized)
/// 2. YAML file given with `--config` (optional)
/// 3. Environment variables (`PBGOV_*`, nested with `__`)
/// 4. Command-line overrides
///
/// After merging, the process count is fitted to a Slurm allocation when
/// `SLURM_NTASKS` is set, and the result is validated.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            overrides: Figment::new(),
        }
    }

    /// Merge a YAML file above the defaults.
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override one key (dotted for nested keys, e.g. `samples.min_sample_size`).
    #[must_use]
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Override `key` only when a value was given.
    #[must_use]
    pub fn set_opt<T: Serialize>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// The merged provider stack, before extraction.
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(RunConfig::default()));

        if let Some(path) = &self.file {
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(self.overrides.clone())
    }

    /// Load, fit to the Slurm allocation, and validate.
    pub fn load(&self) -> Result<RunConfig, ConfigError> {
        self.load_with_fit().map(|(config, _)| config)
    }

    /// Like [`ConfigLoader::load`], also returning the Slurm adjustment made,
    /// so it can be logged once logging is up.
    pub fn load_with_fit(&self) -> Result<(RunConfig, Option<SlurmFit>), ConfigError> {
        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
        }

        let mut config: RunConfig = self
            .figment()
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;

        let mut fit = None;
        if let Some(ntasks) = slurm_ntasks() {
            let processes = fit_processes(ntasks, config.chains);
            if processes != config.processes {
                fit = Some(SlurmFit {
                    ntasks,
                    requested: config.processes,
                    processes,
                });
                config.processes = processes;
            }
        }

        Self::validate(&config)?;
        Ok((config, fit))
    }

    /// Validate configuration after loading
    pub fn validate(config: &RunConfig) -> Result<(), ConfigError> {
        config.validate()
    }
}

fn slurm_ntasks() -> Option<usize> {
    std::env::var("SLURM_NTASKS").ok()?.trim().parse().ok()
}

/// Ranks per chain so that all chains together fit in `ntasks` (at least one).
pub const fn fit_processes(ntasks: usize, chains: usize) -> usize {
    let chains = if chains == 0 { 1 } else { chains };
    let processes = ntasks / chains;
    if processes == 0 {
        1
    } else {
        processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExecutionStrategy, RestartPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CLEAN_ENV: [(&str, Option<&str>); 4] = [
        ("SLURM_NTASKS", None),
        ("PBGOV_INPUT", None),
        ("PBGOV_CHAINS", None),
        ("PBGOV_THRESHOLDS__MAX_DIFF_BPCOMP", None),
    ];

    #[test]
    fn test_defaults_need_an_input() {
        temp_env::with_vars(CLEAN_ENV, || {
            let result = ConfigLoader::new().load();
            assert!(matches!(result, Err(ConfigError::MissingInput)));
        });
    }

    #[test]
    fn test_cli_overrides_win() {
        temp_env::with_vars(CLEAN_ENV, || {
            let config = ConfigLoader::new()
                .set("input", "data/aln.phy")
                .set("chains", 3)
                .set("samples.min_sample_size", 100)
                .set_opt::<u64>("samples.max_sample_size", None)
                .load()
                .unwrap();

            assert_eq!(config.input, PathBuf::from("data/aln.phy"));
            assert_eq!(config.chains, 3);
            assert_eq!(config.samples.min_sample_size, 100);
            assert_eq!(config.samples.max_sample_size, 100_000);
        });
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "input: from_file.phy\nchains: 4\nthresholds:\n  max_diff_bpcomp: 0.1\nlauncher:\n  strategy: mpirun\nrestart:\n  mode: on_failure\n  max_restarts: 2"
        )
        .unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("SLURM_NTASKS", None),
                ("PBGOV_INPUT", None),
                ("PBGOV_CHAINS", Some("6")),
                ("PBGOV_THRESHOLDS__MAX_DIFF_BPCOMP", None),
            ],
            || {
                let config = ConfigLoader::new()
                    .with_file(file.path())
                    .set("input", "from_cli.phy")
                    .load()
                    .unwrap();

                assert_eq!(config.input, PathBuf::from("from_cli.phy"), "CLI should win");
                assert_eq!(config.chains, 6, "Environment should beat the file");
                assert!((config.thresholds.max_diff_bpcomp - 0.1).abs() < f64::EPSILON);
                assert!(
                    (config.thresholds.effective_size_tracecomp - 50.0).abs() < f64::EPSILON,
                    "Defaults should persist when not overridden"
                );
                assert_eq!(config.launcher.strategy, ExecutionStrategy::Mpirun);
                assert_eq!(config.restart, RestartPolicy::OnFailure { max_restarts: 2 });
            },
        );
    }

    #[test]
    fn test_env_override_of_nested_key() {
        temp_env::with_vars(
            [
                ("SLURM_NTASKS", None),
                ("PBGOV_INPUT", Some("aln.phy")),
                ("PBGOV_CHAINS", None),
                ("PBGOV_THRESHOLDS__MAX_DIFF_BPCOMP", Some("0.05")),
            ],
            || {
                let config = ConfigLoader::new().load().unwrap();
                assert!((config.thresholds.max_diff_bpcomp - 0.05).abs() < f64::EPSILON);
            },
        );
    }

    #[test]
    fn test_slurm_allocation_sets_processes() {
        temp_env::with_vars(
            [
                ("SLURM_NTASKS", Some("16")),
                ("PBGOV_INPUT", None),
                ("PBGOV_CHAINS", None),
                ("PBGOV_THRESHOLDS__MAX_DIFF_BPCOMP", None),
            ],
            || {
                let (config, fit) = ConfigLoader::new()
                    .set("input", "aln.phy")
                    .set("chains", 2)
                    .set("processes", 1)
                    .load_with_fit()
                    .unwrap();
                assert_eq!(config.processes, 8);
                assert_eq!(
                    fit,
                    Some(SlurmFit {
                        ntasks: 16,
                        requested: 1,
                        processes: 8,
                    })
                );

                let (_, fit) = ConfigLoader::new()
                    .set("input", "aln.phy")
                    .set("chains", 2)
                    .set("processes", 8)
                    .load_with_fit()
                    .unwrap();
                assert_eq!(fit, None, "nothing to report when the count already fits");
            },
        );
    }

    #[test]
    fn test_fit_processes_never_zero() {
        assert_eq!(fit_processes(16, 2), 8);
        assert_eq!(fit_processes(5, 2), 2);
        assert_eq!(fit_processes(1, 4), 1);
        assert_eq!(fit_processes(8, 0), 8);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        temp_env::with_vars(CLEAN_ENV, || {
            let result = ConfigLoader::new()
                .with_file("/nonexistent/pbgovernor.yaml")
                .set("input", "aln.phy")
                .load();
            assert!(matches!(result, Err(ConfigError::Load(_))));
        });
    }

    #[test]
    fn test_invalid_bounds_are_rejected() {
        temp_env::with_vars(CLEAN_ENV, || {
            let result = ConfigLoader::new()
                .set("input", "aln.phy")
                .set("samples.min_sample_size", 500)
                .set("samples.max_sample_size", 100)
                .load();
            assert!(matches!(
                result,
                Err(ConfigError::SampleBounds { min: 500, max: 100 })
            ));
        });
    }
}
