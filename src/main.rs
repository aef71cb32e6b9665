use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use insta_relay::bot::{Bot, TelegramClient};
use insta_relay::cache::DiskStore;
use insta_relay::config::Config;
use insta_relay::downloader::Downloader;
use insta_relay::fetcher;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting insta-relay");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        download_path = %config.download_path.display(),
        strategy = config.fetch_strategy.as_str(),
        max_file_size_mb = config.max_file_size / (1024 * 1024),
        "Configuration loaded"
    );

    if let Some(cookies_path) = config.cookies_file_path.as_deref() {
        if cookies_path.exists() {
            info!(path = %cookies_path.display(), "Cookies file configured and found");
        } else {
            warn!(path = %cookies_path.display(), "Cookies file configured but not found - will not be used until created");
        }
    }

    let store = DiskStore::open(&config.download_path)
        .await
        .context("Failed to open download cache")?;
    info!(root = %store.root().display(), "Download cache ready");

    let fetcher = fetcher::from_config(&config).context("Failed to set up fetcher")?;
    let downloader = Arc::new(Downloader::new(fetcher, Arc::new(store)));

    let client = TelegramClient::new(&config.telegram_api_url, &config.bot_token)
        .context("Failed to set up Telegram client")?;
    let bot = Arc::new(Bot::new(client, downloader, &config));

    let shutdown = CancellationToken::new();
    let bot_handle = tokio::spawn(bot.run(shutdown.clone()));
    info!("Bot started");

    shutdown_signal().await;

    info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = bot_handle.await {
        error!("Bot task ended abnormally: {e}");
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,insta_relay=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
