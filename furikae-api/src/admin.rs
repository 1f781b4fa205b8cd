use axum::{extract::State, routing::{get, post}, Json, Router};
use furikae_ticket::SweepReport;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/sweep", post(sweep))
        .route("/health", get(health))
}

/// Runs one sweep immediately instead of waiting for the next tick.
async fn sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.engine.sweeper.run_once().await?))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
