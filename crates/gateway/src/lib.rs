//! HTTP boundary for Operative.
//!
//! Serves the web front-end's static files and one JSON endpoint telling it
//! where the app and VNC endpoints live.
//!
//! Built on Axum for high performance async HTTP.

use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};
use operative_config::ServerConfig;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

/// Endpoints handed to the front-end.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvConfig {
    #[serde(rename = "APP_ENDPOINT")]
    pub app_endpoint: String,
    #[serde(rename = "VNC_ENDPOINT")]
    pub vnc_endpoint: String,
}

impl From<&ServerConfig> for EnvConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            app_endpoint: server.app_endpoint.clone(),
            vnc_endpoint: server.vnc_endpoint.clone(),
        }
    }
}

type SharedState = Arc<EnvConfig>;

/// Build the router: `/env-config.json`, `/health`, and static files for
/// every other path.
pub fn build_router(env: EnvConfig, static_dir: &Path) -> Router {
    Router::new()
        .route("/env-config.json", get(env_config_handler))
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(env))
}

/// Resolve the listen address from `host` and `port`.
pub fn listen_addr(server: &ServerConfig) -> Result<SocketAddr, std::net::AddrParseError> {
    let ip: IpAddr = server.host.parse()?;
    Ok(SocketAddr::new(ip, server.port))
}

/// Start the HTTP server.
pub async fn start(server: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = listen_addr(&server)?;
    let app = build_router(EnvConfig::from(&server), &server.static_dir);

    info!(addr = %addr, static_dir = %server.static_dir.display(), "HTTP server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

async fn env_config_handler(State(env): State<SharedState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(env.as_ref().clone()),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
