//! DocAssembler CLI: provider index reconciliation and document extraction.
//!
//! Reads declarative provider specifications, reconciles each provider's
//! web index with the stored catalog, and extracts formatted documents.

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
