//! Quarantine lifecycle endpoints.
//!
//! Starting a quarantine fixes the zone centre and radius and registers the
//! region; ending it makes a last attempt to upload pending locations before
//! the zone is forgotten.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use homebound_core::coordinator::FlushOutcome;
use homebound_core::location::{Coordinate, QuarantineZone};
use homebound_core::remote::RemoteConfigKey;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the quarantine router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(start_quarantine).delete(end_quarantine))
}

/// Request body for starting a quarantine.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 48.145842,
    "longitude": 17.126651,
    "radius": 100.0
}))]
pub struct StartQuarantineRequest {
    /// Latitude of the quarantine address.
    #[schema(example = 48.145_842, minimum = -90, maximum = 90)]
    pub latitude: f64,

    /// Longitude of the quarantine address.
    #[schema(example = 17.126_651, minimum = -180, maximum = 180)]
    pub longitude: f64,

    /// Zone radius in metres. Defaults to the `desiredPositionAccuracy` flag.
    #[schema(example = 100.0)]
    pub radius: Option<f64>,
}

/// Response after starting a quarantine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartQuarantineResponse {
    /// Always `true`.
    pub active: bool,
    /// The zone now in force.
    pub zone: QuarantineZone,
}

/// Response after ending a quarantine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndQuarantineResponse {
    /// Always `false`.
    pub active: bool,
    /// Result of the final location upload. On `failed` the records stay
    /// queued for the periodic flush.
    pub flush: FlushOutcome,
}

/// Start (or replace) the quarantine.
#[utoipa::path(
    post,
    path = "/api/quarantine",
    tag = "quarantine",
    operation_id = "startQuarantine",
    summary = "Start a quarantine",
    description = "Persists the quarantine zone, marks the quarantine active \
        and registers the zone for region monitoring. A running quarantine is \
        replaced.",
    request_body = StartQuarantineRequest,
    responses(
        (status = 200, description = "Quarantine started", body = StartQuarantineResponse),
        (status = 400, description = "Invalid centre or radius", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_quarantine(
    State(state): State<SharedState>,
    Json(request): Json<StartQuarantineRequest>,
) -> ApiResult<Json<StartQuarantineResponse>> {
    let radius = request
        .radius
        .unwrap_or_else(|| state.remote.double(RemoteConfigKey::DesiredPositionAccuracy));
    let zone = QuarantineZone::new(Coordinate::new(request.latitude, request.longitude), radius)?;

    state.coordinator.lock().await.start_quarantine(zone)?;
    info!(radius, "quarantine started via API");

    Ok(Json(StartQuarantineResponse { active: true, zone }))
}

/// End the quarantine.
#[utoipa::path(
    delete,
    path = "/api/quarantine",
    tag = "quarantine",
    operation_id = "endQuarantine",
    summary = "End the quarantine",
    description = "Attempts a final upload of pending in-zone locations, then \
        clears the zone and stops region monitoring. A failed upload leaves \
        the records in the outbox, and the periodic flush retries them once \
        the batch window has elapsed.",
    responses(
        (status = 200, description = "Quarantine ended", body = EndQuarantineResponse),
        (status = 409, description = "No quarantine is active", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn end_quarantine(
    State(state): State<SharedState>,
) -> ApiResult<Json<EndQuarantineResponse>> {
    let flush = state
        .coordinator
        .lock()
        .await
        .end_quarantine()
        .await
        .map_err(ApiError::from)?;

    Ok(Json(EndQuarantineResponse {
        active: false,
        flush,
    }))
}
