//! leadgen CLI: submit lead-generation jobs, run the HTTP API, inspect results.
//!
//! Turns an industry and a location into a verified contact list delivered
//! to a spreadsheet.

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
