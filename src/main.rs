use anyhow::Result;
use clap::Parser;
use web_mirror::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    run(cli).await
}
