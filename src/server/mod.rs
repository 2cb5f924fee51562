// HTTP API: bot CRUD, file lifecycle, widget data, leads, and the
// streaming chat endpoint. CORS is fully permissive because the widget
// runs on arbitrary third-party origins.

pub mod error;
pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use state::{AppState, SharedState};

/// Build the API router over shared state.
#[inline]
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Whole-request ceiling; per-file limits are enforced in the handler
    let body_limit = state
        .config
        .server
        .max_upload_bytes
        .saturating_mul(4)
        .try_into()
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/bots", post(handlers::create_bot).get(handlers::list_bots))
        .route(
            "/api/bots/:bot_id",
            get(handlers::get_bot)
                .patch(handlers::update_bot)
                .delete(handlers::delete_bot),
        )
        .route("/api/bots/:bot_id/files", post(handlers::upload_files))
        .route(
            "/api/bots/:bot_id/files/:file_name",
            delete(handlers::delete_file),
        )
        .route("/api/bots/:bot_id/leads", get(handlers::list_leads))
        .route("/api/widget/:bot_id", get(handlers::widget_config))
        .route("/api/leads", post(handlers::submit_lead))
        .route("/api/chat", post(handlers::chat))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until shutdown.
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config).await?);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting botsmith API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}
