//! Arena Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_engine::api::{self, websocket::WsState, ConnectionManager};
use arena_engine::infrastructure::config::EngineConfig;
use arena_engine::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the binary may run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Arena Engine");

    let config = EngineConfig::from_env()?;
    tracing::info!(
        battle_timeout_secs = config.battle_timeout.as_secs(),
        match_timeout_secs = config.match_timeout.as_secs(),
        ready_timeout_secs = config.ready_timeout.as_secs(),
        storage_driver = ?config.storage_driver,
        "Configuration loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let cors = config
        .cors_allowed_origins
        .as_deref()
        .and_then(build_cors_layer);

    let (app, fired_timers) = App::from_config(config);
    let app = Arc::new(app);
    let connections = Arc::new(ConnectionManager::new());
    let ws_state = Arc::new(WsState::new(app.clone(), connections));

    // Every armed timeout lands here.
    tokio::spawn(api::websocket::run_timer_dispatch(
        ws_state.clone(),
        fired_timers,
    ));

    let mut router = api::router(app, ws_state);
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    // Start server
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer(allowed_origins: &str) -> Option<CorsLayer> {
    let allowed_origins = allowed_origins.trim();
    if allowed_origins.is_empty() {
        return None;
    }

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        // Guest login posts JSON, which triggers a CORS preflight.
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    if allowed_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
