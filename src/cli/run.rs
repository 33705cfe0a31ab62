//! The supervised run behind the `pbgovernor` command.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::output::{exit_status, output};
use super::types::Cli;
use crate::domain::ports::StatusSink;
use crate::infrastructure::diagnostics::PbToolsCollector;
use crate::infrastructure::logging::LoggerImpl;
use crate::infrastructure::process::SamplerLauncher;
use crate::infrastructure::signals;
use crate::infrastructure::status::JsonStatusFile;
use crate::services::ChainSupervisor;

/// Load the configuration, supervise the chains to a verdict and report it.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    let (config, fit) = cli
        .loader()
        .load_with_fit()
        .context("Failed to load configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("Failed to initialize logging")?;

    if let Some(fit) = fit {
        info!(
            ntasks = fit.ntasks,
            chains = config.chains,
            requested = fit.requested,
            processes = fit.processes,
            "Fitted processes per chain to the Slurm allocation"
        );
    }

    let launcher = Arc::new(SamplerLauncher::new(config.launcher.clone(), config.shutdown));
    let collector = Arc::new(PbToolsCollector::new(config.diagnostics.clone()));
    let status_file = config.status_file;

    let mut supervisor = ChainSupervisor::new(config, launcher, collector);
    if let Some(seed) = cli.seed {
        supervisor = supervisor.with_seed(seed);
    }
    if status_file {
        let sink = JsonStatusFile::new(supervisor.layout().base());
        info!(path = %sink.path().display(), "Writing run status");
        let sink: Arc<dyn StatusSink> = Arc::new(sink);
        supervisor = supervisor.with_status_sink(sink);
    }

    let listener = signals::install(supervisor.cancel_handle())
        .context("Failed to install signal handlers")?;

    let outcome = supervisor.run().await;
    listener.abort();

    output(&outcome, cli.json);
    Ok(ExitCode::from(exit_status(&outcome.verdict)))
}
