//! HTTP server for diagram endpoints
//!
//! Serves /suml/class/{expr}.png, /suml/seq/{expr}.png, the /suml/cache
//! statistics page, static files under /suml/static and /health.

use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use diagram_cache::{DiagramCache, DiagramType};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

/// Browsers may keep a rendered diagram for 31 days
const DIAGRAM_CACHE_CONTROL: &str = "max-age=2678400";

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: DiagramCache,
    pub static_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: DiagramCache, static_dir: PathBuf) -> Self {
        Self {
            cache,
            static_dir,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/health", get(health))
        .route("/suml", get(index_redirect))
        .route("/suml/", get(index_redirect))
        .route("/suml/cache", get(cache_stats))
        .route("/suml/cache/", get(cache_stats))
        .route("/suml/class/", get(empty_expression))
        .route("/suml/class/{*file}", get(get_class))
        .route("/suml/seq/", get(empty_expression))
        .route("/suml/seq/{*file}", get(get_sequence))
        .nest_service("/suml/static", static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once a shutdown signal was handled
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

async fn index_redirect() -> Redirect {
    Redirect::temporary("/suml/static/index.html")
}

/// Plain-text listing of cache counters and records
async fn cache_stats(State(state): State<SharedState>) -> Response {
    let now = Utc::now();
    let stats = state.cache.stats().await;
    let records = state.cache.snapshot(now).await;

    let mut body = String::from("Cache stats:\n");
    let _ = writeln!(body, "{} hits / {} misses", stats.hits, stats.misses);
    body.push_str("Cache records:\n");
    for (i, snapshot) in records.iter().enumerate() {
        let r = &snapshot.record;
        let _ = writeln!(
            body,
            "{:04}: Slot={} DiagramType={} Created={} LastAccess={} AccessCount={} Rank={}",
            i, r.slot, r.diagram_type, r.created, r.last_access, r.access_count, snapshot.rank
        );
    }

    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

async fn get_class(State(state): State<SharedState>, Path(file): Path<String>) -> Response {
    diagram(&state, DiagramType::Class, &file).await
}

async fn get_sequence(State(state): State<SharedState>, Path(file): Path<String>) -> Response {
    diagram(&state, DiagramType::Sequence, &file).await
}

// The catch-all segments never match an empty remainder
async fn empty_expression() -> Response {
    bad_request("")
}

fn bad_request(file: &str) -> Response {
    warn!(file = %file, "Bad diagram request");
    (StatusCode::BAD_REQUEST, "Bad request.").into_response()
}

/// Expression part of a `<expression>.png` path segment
fn parse_expression(file: &str) -> Option<&str> {
    file.strip_suffix(".png").filter(|expr| !expr.is_empty())
}

async fn diagram(state: &ServerState, diagram_type: DiagramType, file: &str) -> Response {
    let Some(expression) = parse_expression(file) else {
        return bad_request(file);
    };

    match state.cache.fetch(diagram_type, expression).await {
        Ok(fetched) => {
            let cache_header = if fetched.hit { "HIT" } else { "MISS" };

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "image/png")
                .header(header::CACHE_CONTROL, DIAGRAM_CACHE_CONTROL)
                .header("X-Cache", cache_header)
                .body(Body::from(fetched.data))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            error!(%diagram_type, error = %e, "Failed to fetch diagram");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occured while handling the request.",
            )
                .into_response()
        }
    }
}
