// civic_portal - main.rs
// Binary entry: tracing setup, then CLI dispatch

use clap::Parser;
use tracing_subscriber::EnvFilter;

use civic_portal::cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run(Cli::parse()).await
}
