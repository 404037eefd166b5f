//! Tablesync Server - authoritative sync server for tablesync clients.
//!
//! Exposes the sync exchange over HTTP (`POST /api/sync`) and WebSocket
//! (`GET /ws`). Records accepted from one client are pushed to every other
//! connected WebSocket client.

pub mod auth;
pub mod authority;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authority::Authority;
use crate::config::Config;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authority: Arc<Authority>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            authority: Arc::new(Authority::new()),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
