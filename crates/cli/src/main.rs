mod analyze;
mod cli;
mod csv_sink;
mod stress;
mod workload;

use anyhow::Result;
use clap::Parser;

use crate::cli::{CliArgs, Command};

fn main() -> Result<()> {
    triage_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Stress(args) => stress::run(args),
        Command::Analyze(args) => analyze::run(args),
    }
}
