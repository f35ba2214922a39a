use anyhow::Result;
use clap::Parser;
use unita::cli::{Cli, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.run().await
}
