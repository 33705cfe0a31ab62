//! pbgovernor CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use pbgovernor::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match pbgovernor::cli::execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            pbgovernor::cli::handle_error(&err, json);
            ExitCode::FAILURE
        }
    }
}
