use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::trip::TripRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips/pending", get(list_pending))
        .route("/trips/active", get(active_trip))
        .route("/trips/:id/accept", post(accept_trip))
        .route("/trips/:id/decline", post(decline_trip))
        .route("/trips/:id/cancel", post(cancel_trip))
        .route("/trips/:id/end", post(end_trip))
}

#[derive(Deserialize)]
pub struct CancelTripRequest {
    pub reason: String,
}

async fn list_pending(State(state): State<Arc<AppState>>) -> Json<Vec<TripRequest>> {
    Json(state.coordinator.pending_trips().await)
}

async fn active_trip(State(state): State<Arc<AppState>>) -> Json<Option<TripRequest>> {
    Json(state.coordinator.active_trip().await)
}

async fn accept_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripRequest>, AppError> {
    Ok(Json(state.coordinator.accept_trip(id).await?))
}

async fn decline_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripRequest>, AppError> {
    Ok(Json(state.coordinator.decline_trip(id).await?))
}

async fn cancel_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelTripRequest>,
) -> Result<Json<TripRequest>, AppError> {
    Ok(Json(state.coordinator.cancel_trip(id, payload.reason).await?))
}

async fn end_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripRequest>, AppError> {
    Ok(Json(state.coordinator.end_trip(id).await?))
}
