//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use homebound_core::HealthResponse;

use crate::state::SharedState;

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
///
/// Reads only the component snapshot, never the coordinator lock, so it
/// answers while an upload is in flight.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check agent health",
    description = "Returns the agent version and the lifecycle of each \
        pipeline component. `proximity` is false while no radio role is \
        live, e.g. without a Bluetooth adapter.",
    responses(
        (status = 200, description = "Agent is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let components = state.components().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        proximity: components.proximity_active(),
        components,
    })
}
