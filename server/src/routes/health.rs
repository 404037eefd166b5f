//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub server_time: String,
    pub tables: usize,
    pub records: usize,
    pub connections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        server_time: chrono::Utc::now().to_rfc3339(),
        tables: state.authority.table_count(),
        records: state.authority.record_count(),
        connections: state.conn_manager.connection_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tablesync Server"
}
