use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::driver::{DriverStateView, DriverStats};
use crate::models::trip::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver/online", post(go_online))
        .route("/driver/offline", post(go_offline))
        .route("/driver/state", get(driver_state))
        .route("/driver/stats", get(driver_stats))
        .route("/driver/location", patch(update_location))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn go_online(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DriverStateView>, AppError> {
    Ok(Json(state.coordinator.go_online().await?))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DriverStateView>, AppError> {
    Ok(Json(state.coordinator.go_offline().await?))
}

async fn driver_state(State(state): State<Arc<AppState>>) -> Json<DriverStateView> {
    Json(state.coordinator.view().await)
}

async fn driver_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DriverStats>, AppError> {
    Ok(Json(state.coordinator.fetch_stats().await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DriverStateView>, AppError> {
    Ok(Json(
        state.coordinator.position_update(payload.location).await?,
    ))
}
