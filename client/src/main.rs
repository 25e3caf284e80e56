use clap::Parser;

use client::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = CliConfig::parse().into_client_config();
    client::start::run(cfg).await
}
