//! CLI entry point for the harvester.

use std::process::ExitCode;

use eurlex_harvester::cli;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Logs go to stderr so fragment output on stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
