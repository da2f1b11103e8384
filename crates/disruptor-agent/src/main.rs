//! Fault-injection agent entry point.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disruptor_agent::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    disruptor_agent::run(cli.command).await
}
