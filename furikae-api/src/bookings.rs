use axum::{extract::State, http::StatusCode, routing::post, Router};
use furikae_core::{Booking, Ticket};
use furikae_shared::AttendanceRecordedEvent;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::Json;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub ticket_id: Uuid,
    pub slot_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub booking_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub booking_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reserve", post(reserve))
        .route("/v1/release", post(release))
        .route("/v1/confirm", post(confirm))
        .route("/v1/attendance", post(attendance))
}

async fn reserve(State(state): State<AppState>, Json(req): Json<ReserveRequest>) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.coordinator.reserve(req.ticket_id, req.slot_id).await?;
    Ok(Json(booking))
}

async fn release(State(state): State<AppState>, Json(req): Json<ReleaseRequest>) -> Result<StatusCode, AppError> {
    let reason = req.reason.unwrap_or_else(|| "released by request".to_string());
    state.engine.coordinator.release(req.booking_id, &reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm(State(state): State<AppState>, Json(req): Json<ConfirmRequest>) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.coordinator.confirm(req.booking_id).await?))
}

async fn attendance(
    State(state): State<AppState>,
    Json(event): Json<AttendanceRecordedEvent>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state
        .engine
        .coordinator
        .record_attendance(event.booking_id, event.attended)
        .await?;
    Ok(Json(ticket))
}
