use std::process::ExitCode;

use clap::Parser;
use lumier::cli::{Cli, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::debug!(stage = error.stage(), "command failed");
            eprintln!("error: {error}");
            if error.requires_new_credentials() {
                eprintln!("hint: store a valid API key with `lumier set-key <key>`");
            }
            ExitCode::FAILURE
        }
    }
}
