//! paperpipe CLI: scheduled entry points of the paper recommendation pipeline.
//!
//! Each subcommand is meant to run from cron or a CI schedule. Discovery and
//! the relevance batch are started by `enqueue`; `advance-interest` and
//! `advance-delivery` move pending jobs forward one step per invocation.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
