//! Diagram server - renders scruffy UML diagrams with `suml`
//!
//! Rendered PNGs are kept in a persistent, capacity-bounded cache so that
//! repeated requests for the same diagram do not run the renderer again.

mod error;
mod renderer;
mod server;
mod types;

use crate::error::{Result, ServerError};
use crate::renderer::SumlRenderer;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use diagram_cache::{DiagramCache, SlotStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("diagram_server=info".parse()?)
        .add_directive("diagram_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting diagram server...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache size: {} diagrams", config.cache_size);
    info!("Renderer: {}", config.renderer_command);

    let store = SlotStore::new(
        config.cache_dir.clone(),
        &config.index_filename,
        config.cache_size,
    );
    store.init().await?;

    let index_path = store.index_path().to_path_buf();
    match store.load(&index_path).await {
        Ok(count) => info!(records = count, "Restored cache index"),
        Err(e) if e.is_not_found() => info!(path = ?index_path, "No cache index yet, starting empty"),
        Err(e) => warn!(error = %e, "Failed to load cache index, starting empty"),
    }

    let renderer = SumlRenderer::new(config.renderer_command.clone(), config.render_timeout);
    let cache = DiagramCache::new(store, Arc::new(renderer));

    let state: SharedState = Arc::new(ServerState::new(cache, config.static_dir.clone()));

    // Serve until Ctrl-C
    let served = start_server(state.clone(), config.port).await;

    info!("Flushing cache write-back queue");
    state.cache.shutdown().await;

    served.map_err(ServerError::from)
}

fn load_config() -> Result<ServerConfig> {
    let defaults = ServerConfig::default();

    let port = match std::env::var("PORT") {
        Ok(s) => parse_port(&s)?,
        Err(_) => defaults.port,
    };

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let cache_size = match std::env::var("CACHE_SIZE") {
        Ok(s) => parse_cache_size(&s)?,
        Err(_) => defaults.cache_size,
    };

    let index_filename =
        std::env::var("CACHE_INDEX_FILENAME").unwrap_or(defaults.index_filename);

    let static_dir = std::env::var("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.static_dir);

    let renderer_command = std::env::var("RENDERER_COMMAND").unwrap_or(defaults.renderer_command);

    let render_timeout = std::env::var("RENDER_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(ServerConfig {
        port,
        cache_dir,
        cache_size,
        index_filename,
        static_dir,
        renderer_command,
        render_timeout,
    })
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ServerError::Config(format!("invalid PORT {:?}: {}", value, e)))
}

fn parse_cache_size(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ServerError::Config("CACHE_SIZE must be positive".to_string())),
        Ok(size) => Ok(size),
        Err(e) => Err(ServerError::Config(format!(
            "invalid CACHE_SIZE {:?}: {}",
            value, e
        ))),
    }
}
