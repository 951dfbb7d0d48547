// src/main.rs
//! Squeaky Session Recording Agent
//!
//! Standalone runner: replays captured events for one page and streams them
//! to the collector until the session ends or the process is interrupted.

use anyhow::{Context, Result};
use squeaky_agent::capture::provider::ReplayCapture;
use squeaky_agent::identity::page::{PageState, SharedPage};
use squeaky_agent::identity::storage::{MemoryStorage, SqliteStorage, Storage};
use squeaky_agent::observability::{init_metrics, init_tracing};
use squeaky_agent::session::settings::{FileSettingsSource, HttpSettingsClient, SettingsSource};
use squeaky_agent::transport::link::TcpConnector;
use squeaky_agent::utils::config::AgentConfig;
use squeaky_agent::{Agent, AgentContext};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load configuration
    let config = AgentConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics();

    info!("Starting Squeaky agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let storage: Arc<dyn Storage> = match &config.storage.path {
        Some(path) => Arc::new(SqliteStorage::open(path)?),
        None => Arc::new(MemoryStorage::new()),
    };

    let settings: Arc<dyn SettingsSource> = match &config.api.settings_file {
        Some(path) => Arc::new(FileSettingsSource::new(path)),
        None => Arc::new(HttpSettingsClient::new(config.api.settings_url.clone())),
    };

    let replay_file = config
        .capture
        .replay_file
        .clone()
        .context("capture.replay_file must be set")?;
    let capture = ReplayCapture::new(replay_file).with_realtime(config.capture.realtime);

    let page = Arc::new(SharedPage::new(PageState::from_url(&config.site.page_url)));
    let connector = Arc::new(TcpConnector::new(config.collector.address.clone()));

    let context = AgentContext::new(config, page, settings, connector, Box::new(capture))
        .with_storage(storage);

    let (handle, mut task) = Agent::spawn(context);

    // Graceful shutdown handler
    tokio::select! {
        result = &mut task => {
            let outcome = result.context("Agent task failed")?;
            info!("Agent finished: {:?}", outcome);
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal, cleaning up...");
        }
    }

    handle.shutdown();
    let outcome = task.await.context("Agent task failed")?;
    info!("Agent stopped: {:?}", outcome);

    Ok(())
}
