//! Core types for the diagram server

use diagram_cache::CacheStats;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the diagram server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    /// Maximum number of rendered diagrams kept on disk
    pub cache_size: usize,
    pub index_filename: String,
    pub static_dir: PathBuf,
    pub renderer_command: String,
    pub render_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            cache_dir: PathBuf::from("./cache"),
            cache_size: 250,
            index_filename: "index".to_string(),
            static_dir: PathBuf::from("./static"),
            renderer_command: "suml".to_string(),
            render_timeout: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
