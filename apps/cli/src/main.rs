//! filingprep CLI: prepare regulatory filings into canonical text, table
//! grids and anchors, and map excerpts back onto prepared bundles.

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
