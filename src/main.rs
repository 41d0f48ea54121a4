//! cdnbot CLI entry point.

use cdnbot::cdn::CdnClient;
use cdnbot::config::Config;
use cdnbot::messaging::{Messaging, SlackAdapter};
use cdnbot::proxy::{ProxyState, TokenRegistry, start_proxy_server};
use cdnbot::relay::{FileRelay, RelaySettings, drain_in_flight};

use anyhow::Context as _;
use clap::Parser;
use futures::StreamExt as _;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use std::time::Duration;

/// How long shutdown waits for in-flight uploads before aborting them.
const RELAY_DRAIN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "cdnbot")]
#[command(about = "Relays files posted in Slack to a CDN through a single-use file proxy")]
struct Cli {
    /// Path to a TOML config file (environment variables override it)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // slack-morphism and reqwest share one rustls backend.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = if let Some(config_path) = cli.config {
        Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        Config::load().with_context(|| "failed to load configuration from environment")?
    };

    tracing::info!(
        channel_id = %config.slack.channel_id,
        public_base_url = %config.proxy.public_base_url,
        "configuration loaded"
    );

    let registry = Arc::new(TokenRegistry::new());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let proxy_state = ProxyState::new(
        registry.clone(),
        config.slack.bot_token.as_str(),
        config.slack.channel_id.as_str(),
    )
    .with_path_prefix(config.proxy.path_prefix()?);
    let proxy_handle = start_proxy_server(config.proxy.bind_addr()?, proxy_state, shutdown_rx)
        .await
        .context("failed to start file proxy")?;

    let slack = Arc::new(
        SlackAdapter::new(&config.slack.bot_token, &config.slack.app_token)
            .context("failed to create slack adapter")?,
    );
    if let Err(error) = slack.health_check().await {
        tracing::warn!(%error, "slack API check failed, continuing");
    }
    let mut inbound = slack
        .start()
        .await
        .context("failed to start slack adapter")?;

    let relay = Arc::new(FileRelay::new(
        slack.clone(),
        Arc::new(CdnClient::new(&config.cdn)),
        registry,
        RelaySettings::from(&config),
    ));

    tracing::info!("cdnbot is running");

    let mut relays = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(message) => {
                    tracing::debug!(message_id = %message.id, content = %message.content, "inbound message");
                    let relay = relay.clone();
                    relays.spawn(async move {
                        relay.handle(&message).await;
                    });
                }
                None => {
                    tracing::warn!("slack inbound stream ended");
                    break;
                }
            },
            Some(result) = relays.join_next(), if !relays.is_empty() => {
                if let Err(error) = result {
                    tracing::warn!(%error, "relay task failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("shutting down...");
    if let Err(error) = slack.shutdown().await {
        tracing::warn!(%error, "slack adapter did not shut down cleanly");
    }
    if !relays.is_empty() {
        tracing::info!(in_flight = relays.len(), "waiting for in-flight relays");
        drain_in_flight(&mut relays, RELAY_DRAIN_GRACE).await;
    }
    let _ = shutdown_tx.send(true);
    if let Err(error) = proxy_handle.await {
        tracing::warn!(%error, "file proxy task failed");
    }

    tracing::info!("cdnbot stopped");
    Ok(())
}
