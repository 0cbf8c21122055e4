//! parcelpipe CLI — public real-estate registry ingestion pipeline.
//!
//! Normalizes cadastral shapefiles, land-attribute CSV extracts,
//! building-register text dumps, and transaction spreadsheets into a
//! PNU-keyed PostGIS store, and drives the transaction crawler.

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
