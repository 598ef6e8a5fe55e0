//! `operative serve`: Start the static file / front-end config server.

use anyhow::Context;
use operative_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("loading config")?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("Operative HTTP server");
    println!("   Listening:  [{}]:{}", config.server.host, config.server.port);
    println!("   Static dir: {}", config.server.static_dir.display());

    operative_gateway::start(config.server)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server failed: {e}"))?;

    Ok(())
}
