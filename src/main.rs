use anyhow::Result;
use tracing::{error, info};

use solana_strategy_engine::{Config, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    info!("starting strategy engine");

    let config = Config::from_env()?;
    let mut engine = Engine::new(config)?;
    engine.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }

    info!("shutdown signal received");
    engine.stop().await?;
    Ok(())
}
