//! REST routes for room previews and the reconstruction pipeline callback.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use tracing::error;

use crate::scene::room::RoomMeta;
use crate::services::editing;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RoomList {
    pub room_previews: Vec<RoomMeta>,
}

#[derive(Debug, Serialize)]
pub struct ReconstructionAck {
    pub model_id: String,
    pub version: String,
    /// Connections the announcement was queued for.
    pub notified: usize,
}

/// `GET /api/rooms`: metadata of every persisted room, newest first.
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<RoomList>, StatusCode> {
    let room_previews = editing::fetch_previews(&state).await.map_err(|e| {
        error!(error = %e, "room preview listing failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(RoomList { room_previews }))
}

/// `POST /api/reconstructions/{model_id}/versions/{version}/ready`: record
/// the finished model version and announce it to every editing client in a
/// room.
pub async fn reconstruction_ready(
    State(state): State<AppState>,
    Path((model_id, version)): Path<(String, String)>,
) -> Result<Json<ReconstructionAck>, StatusCode> {
    if model_id.trim().is_empty() || version.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let notified = editing::notify_new_reconstruction(&state, &model_id, &version)
        .await
        .map_err(|e| {
            error!(error = %e, %model_id, %version, "reconstruction announcement failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(ReconstructionAck { model_id, version, notified }))
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
