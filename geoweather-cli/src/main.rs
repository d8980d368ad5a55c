//! Binary crate for the `geoweather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Presenting pipeline output in the terminal

use std::process::ExitCode;

use clap::Parser;

mod cli;
mod logging;
mod presenter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cmd = cli::Cli::parse();
    logging::init(cmd.verbose)?;
    cmd.run().await
}
