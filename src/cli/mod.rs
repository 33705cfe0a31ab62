//! Command-line interface

pub mod output;
pub mod run;
pub mod types;

pub use output::{exit_status, CommandOutput};
pub use run::execute;
pub use types::Cli;

use crate::domain::errors::ConfigError;

/// Machine-readable code for an error raised before the run started.
///
/// Only configuration problems are `config_error`; logger or signal setup
/// failures are `startup_error`.
pub fn error_code(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<ConfigError>().is_some() {
        "config_error"
    } else {
        "startup_error"
    }
}

/// Report an error that ended the program before a run outcome existed.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) {
    if json_mode {
        let value = serde_json::json!({
            "verdict": "failed",
            "reason": error_code(err),
            "message": format!("{err:#}"),
            "exit_status": 1,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_code_distinguishes_config_errors() {
        let config: Result<(), ConfigError> = Err(ConfigError::MissingInput);
        let err = config.context("Failed to load configuration").unwrap_err();
        assert_eq!(error_code(&err), "config_error");

        let io: std::io::Result<()> = Err(std::io::Error::other("signalfd"));
        let err = io.context("Failed to install signal handlers").unwrap_err();
        assert_eq!(error_code(&err), "startup_error");

        assert_eq!(error_code(&anyhow::anyhow!("global subscriber already set")), "startup_error");
    }
}
