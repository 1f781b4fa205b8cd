use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use furikae_core::{AvailableSlot, SlotDefinition, TimeSlot};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{Json, Query};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSlotParams {
    pub ticket_id: Uuid,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub school_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/transfer-slots", get(transfer_slots))
        .route("/v1/slots", post(register_slot))
}

async fn transfer_slots(
    State(state): State<AppState>,
    Query(params): Query<TransferSlotParams>,
) -> Result<Json<Vec<AvailableSlot>>, AppError> {
    let slots = state
        .engine
        .queries
        .list_available_slots(params.ticket_id, params.date_from, params.date_to, params.school_id)
        .await?;
    Ok(Json(slots))
}

async fn register_slot(
    State(state): State<AppState>,
    Json(definition): Json<SlotDefinition>,
) -> Result<Json<TimeSlot>, AppError> {
    Ok(Json(state.engine.coordinator.register_slot(definition).await?))
}
