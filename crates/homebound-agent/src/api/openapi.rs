//! OpenAPI specification generation for the homebound agent API.

use axum::Json;
use homebound_core::coordinator::{CoordinatorStatus, FlushOutcome};
use homebound_core::location::{Coordinate, LocationSample, QuarantineZone};
use homebound_core::{
    AdvertiserState, ComponentStates, HealthResponse, SamplerPhase, ScannerState, StatusResponse,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::quarantine::{EndQuarantineResponse, StartQuarantineRequest, StartQuarantineResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON. Used by the
/// gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for the homebound agent.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "homebound agent API",
        version = "0.1.0",
        description = r#"
# homebound agent API

Local control surface of the homebound agent, which monitors a home
quarantine zone and reports proximity contacts.

## Overview

1. **Quarantine**: start a quarantine at an address, or end it
2. **Status**: inspect the location sampler, proximity radio components,
   the quarantine zone and the upload queues

Exit alerts and backend uploads happen automatically; this API never
triggers them directly.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local homebound agent")
    ),
    tags(
        (name = "system", description = "Health checks and pipeline status"),
        (name = "quarantine", description = "Quarantine zone lifecycle")
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::quarantine::start_quarantine,
        super::quarantine::end_quarantine,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StatusResponse,
            ComponentStates,
            SamplerPhase,
            ScannerState,
            AdvertiserState,
            CoordinatorStatus,
            FlushOutcome,
            Coordinate,
            LocationSample,
            QuarantineZone,
            StartQuarantineRequest,
            StartQuarantineResponse,
            EndQuarantineResponse,
        )
    )
)]
pub struct ApiDoc;
