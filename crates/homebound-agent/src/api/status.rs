//! Pipeline status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use homebound_core::StatusResponse;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the status router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_status))
}

/// Current component lifecycles, quarantine state and outbox depth.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get pipeline status",
    description = "Returns the sampler, scanner and advertiser states together \
        with the quarantine zone, the number of records waiting in each \
        outbox and the timestamps of the last decision and uploads.",
    responses(
        (status = 200, description = "Status retrieved", body = StatusResponse),
        (status = 500, description = "State could not be read", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let components = state.components().await;
    let reporting = state.coordinator.lock().await.status()?;
    Ok(Json(StatusResponse {
        components,
        reporting,
    }))
}
