//! Linker Bridge
//!
//! Runs the link to the community service for a game server.
//! Console lines are relayed as chat until EOF or Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use linker_bridge::{
    ChatType, ConnectionStore, JsonFileStore, LinkContext, LinkerConfig, NetworkTransports,
    OnlinePlayers, StatsUpdateEvent, StoreChannelPolicy, TransportCoordinator, VERSION,
};

/// Name chat from the console is relayed under.
const CONSOLE_PLAYER: &str = "console";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = LinkerConfig::from_env();
    info!("Linker Bridge v{}", VERSION);
    info!("Service: {} / {}", config.bot_http_url, config.bot_ws_url);
    info!("Connection file: {}", config.connection_file.display());

    let store: Arc<dyn ConnectionStore> = Arc::new(JsonFileStore::new(&config.connection_file));
    let ctx = LinkContext {
        factory: Arc::new(NetworkTransports::new(config.clone())),
        store: store.clone(),
        channels: Arc::new(StoreChannelPolicy::new(store)),
        roster: Arc::new(OnlinePlayers::new()),
    };
    let coordinator = TransportCoordinator::restore(config, ctx);
    info!("Restored in {:?} mode", coordinator.mode().await);

    if !coordinator.start_all().await {
        warn!("Initial connect failed; messages will be dropped until the link is up");
    }

    if let Ok(code) = std::env::var("LINKER_CODE") {
        if coordinator.connect_websocket(code.trim()).await {
            info!("Linked with verification code");
        } else {
            warn!("Verification code was not accepted");
        }
    }

    coordinator.send_stats_update(StatsUpdateEvent::Online).await;
    coordinator.send_chat("", ChatType::Start, CONSOLE_PLAYER).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read console input")? {
                    Some(line) if !line.trim().is_empty() => {
                        let delivery = coordinator.send_chat(&line, ChatType::Chat, CONSOLE_PLAYER).await;
                        info!("Relayed console line: {:?}", delivery);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    coordinator.send_chat("", ChatType::Close, CONSOLE_PLAYER).await;
    coordinator.send_stats_update(StatsUpdateEvent::Offline).await;
    coordinator.stop_all().await;
    info!("Linker Bridge stopped");
    Ok(())
}
