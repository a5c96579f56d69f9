mod command;
mod config;
mod delivery;
mod error;
mod handler;
mod message;
mod platform;
mod probe;
mod source;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigHandle};
use crate::delivery::Jitter;
use crate::handler::PixivHandler;
use crate::platform::onebot::{self, OneBotClient};
use crate::probe::HttpProbe;
use crate::source::LoliconClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pixivbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  OneBot API: {}", config.onebot.api_base);
    info!("  Illustration API: {}", config.source.api_base);
    info!("  Command prefix: {}", config.pixiv.prefix());
    info!("  Enabled: {}", config.pixiv.enabled);

    let handler = PixivHandler::new(
        ConfigHandle::new(config.pixiv.clone()),
        Arc::new(LoliconClient::new(config.source.clone())),
        Arc::new(HttpProbe::new(&config.source)),
        Arc::new(OneBotClient::new(config.onebot.clone())),
        Jitter::from(&config.delivery),
    );

    info!("Pixiv bot is starting...");
    onebot::run(Arc::new(handler), &config.onebot).await?;

    Ok(())
}
