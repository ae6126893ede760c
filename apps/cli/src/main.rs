//! Folio CLI: assemble headless-CMS pages from the command line.
//!
//! Resolves a URL path to a CMS document, gathers its modules and globals,
//! and prints the localized, reference-resolved page tree as JSON.

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
