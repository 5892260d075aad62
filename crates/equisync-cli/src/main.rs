mod cli;
mod commands;
mod error;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("equisync={level},equisync_core={level},equisync_warehouse={level}").into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let rows = commands::run(cli).await?;
    output::render(&rows, cli.format, cli.pretty)
}
