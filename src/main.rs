use clap::Parser;
use fleetrun::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_logging()?;
    cli.execute().await
}
