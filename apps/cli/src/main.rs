//! SWR CLI: weekly podcast transcripts turned into an emailed stock report.
//!
//! Runs the pipeline on demand or from cron, manages feeds, receivers and
//! settings, and serves the MCP tools over stdio.

mod commands;
mod progress;
mod wizard;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
