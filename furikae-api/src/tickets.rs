use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use furikae_core::{Ticket, TicketStatus};
use furikae_ticket::{IssueRequest, TicketHistory};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{Json, Path, Query};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTicketsParams {
    pub student_id: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/issue-ticket", post(issue_ticket))
        .route("/v1/tickets", get(list_tickets))
        .route("/v1/tickets/{id}", get(get_ticket))
        .route("/v1/tickets/{id}/history", get(ticket_history))
        .route("/v1/tickets/{id}/cancel", post(cancel_ticket))
}

async fn issue_ticket(
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.engine.issuer.issue(req).await?;
    Ok(Json(ticket))
}

async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TicketStatus>)
        .transpose()?;

    let tickets = state.engine.queries.list_my_tickets(&params.student_id, status).await?;
    Ok(Json(tickets))
}

async fn get_ticket(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.queries.get_ticket(id).await?))
}

async fn ticket_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketHistory>, AppError> {
    Ok(Json(state.engine.queries.history(id).await?))
}

async fn cancel_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.engine.coordinator.cancel_ticket(id, &req.reason).await?;
    Ok(Json(ticket))
}
