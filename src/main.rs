use anyhow::Result;
use clap::Parser;
use schema_net::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // stderr only: stdout carries the driver protocol.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schema_net=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.run()
}
