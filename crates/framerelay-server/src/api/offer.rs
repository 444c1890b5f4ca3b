use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use framerelay_protocol::SessionDescriptionPayload;

use crate::error::{AppError, Result};
use crate::state::AppState;

pub async fn accept_offer(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SessionDescriptionPayload>, JsonRejection>,
) -> Result<Json<SessionDescriptionPayload>> {
    let Json(offer) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if offer.sdp.trim().is_empty() {
        return Err(AppError::BadRequest("sdp must not be empty".to_string()));
    }

    let (session, answer) = state.handshake.accept(offer).await?;
    tracing::info!("Answered offer for session {}", session.id());
    Ok(Json(answer))
}
