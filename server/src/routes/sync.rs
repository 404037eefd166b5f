//! Sync endpoint routes.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tablesync_engine::SyncMessage;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::handle_sync;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/sync", post(sync_handler))
}

/// POST /api/sync - Exchange a table's unsynced records for its canonical view.
async fn sync_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: std::result::Result<Json<SyncMessage>, JsonRejection>,
) -> Result<Json<SyncMessage>> {
    let Json(message) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    tracing::debug!(
        table = %message.table,
        anonymous = auth.is_anonymous(),
        "HTTP sync request"
    );

    let reply = handle_sync(&state, message, None)?;
    Ok(Json(reply))
}
