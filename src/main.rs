use anyhow::Result;

use framegrab_lib::{run, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Reads RUST_LOG; defaults to info so capture outcomes are visible.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("framegrab starting up...");

    let config = AppConfig::from_env()?;
    run(config).await
}
