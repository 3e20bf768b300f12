use clap::Parser;
use lobbyreg_cli::{execute, service_management, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    service_management::start(&cli)?;
    execute(&cli).await?;
    Ok(())
}
