use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod bootstrap;
mod config;
mod domain;
mod error;
mod gateway;
mod messaging;
mod metrics;
mod proto;
mod service;
mod store;
mod utils;
mod worker;

use config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, override with RUST_LOG
    // Example: RUST_LOG=debug order_pipeline standalone
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_pipeline=debug"))
        )
        .init();

    let cli = Cli::parse();
    bootstrap::run(cli.command).await
}
