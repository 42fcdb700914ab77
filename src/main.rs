//! `stree`: plan supply trees and manage capability rules.

use clap::Parser;

mod cli;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Cli::parse().run().await
}
