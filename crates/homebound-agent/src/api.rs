//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks
//! - `status` - Pipeline and quarantine status
//! - `quarantine` - Start and end the quarantine
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod quarantine;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /status            - Pipeline status
/// ├── /quarantine        - POST start, DELETE end
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/status", status::router())
                .nest("/quarantine", quarantine::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
