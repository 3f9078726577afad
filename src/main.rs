//! Binary entry point for cortex-rs.

use std::io::Write;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cortex_rs::cli::{Cli, execute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = execute(cli).await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(output.as_bytes())
        .map_err(|e| anyhow::anyhow!("failed to write to stdout: {e}"))?;
    Ok(())
}
