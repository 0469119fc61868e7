//! `storyloom serve`: Start the HTTP gateway.

use anyhow::Context;
use storyloom_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    eprintln!("storyloom gateway");
    eprintln!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    eprintln!("   Storage:   {} ({})", config.storage.backend, config.storage.path);
    eprintln!("   RAG:       {}", if config.rag_active() { "on" } else { "off" });

    storyloom_gateway::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("Gateway failed: {e}"))?;

    Ok(())
}
