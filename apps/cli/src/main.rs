//! levelgrid CLI entry point.
//!
//! Turns uploaded leveling guides into role grids with generated
//! behavioral examples, and manages the prompt registry behind them.

mod commands;

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
