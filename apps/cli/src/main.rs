//! FragmentSync CLI: operate the section content pipeline from a terminal.
//!
//! Loads, refreshes and watches externally authored page sections, and
//! manages the local cache, config override, theme and analytics buffer.

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
