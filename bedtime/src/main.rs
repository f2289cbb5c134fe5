//! Bedtime story generator CLI.
//!
//! ```bash
//! cargo run -p bedtime -- generate --mode best "a story about a brave rabbit"
//! cargo run -p bedtime -- interactive --names-file names.json
//! ```

mod cli;
mod interactive;
mod report;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    cli::Cli::parse().run().await
}
