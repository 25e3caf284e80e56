use clap::Parser;

use server::{AppState, BlobStore, CliConfig, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = CliConfig::parse().into_server_config();
    toolkit::init_logging(&cfg.log_path)?;

    let store = Store::open(&cfg.db_path)?;
    let blobs = BlobStore::new(cfg.data_dir.clone()).await?;
    let addr = cfg.listen_addr;
    let state = AppState::new(store, blobs, cfg);

    server::serve(state, addr).await
}
