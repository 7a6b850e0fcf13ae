//! Shared types and OpenAPI schemas.
//!
//! Most API types live next to the component that produces them (sampler,
//! scanner, coordinator). This module holds the ones that span components.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::advertiser::AdvertiserState;
use crate::coordinator::CoordinatorStatus;
use crate::sampler::SamplerPhase;
use crate::scanner::ScannerState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether a radio role is live, i.e. scanning or advertising.
    #[schema(example = false)]
    pub proximity: bool,

    /// Component lifecycles at the time of the check.
    pub components: ComponentStates,
}

/// Lifecycle of each pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ComponentStates {
    /// Location sampler phase.
    pub sampler: SamplerPhase,
    /// Proximity scanner state, absent when scanning is disabled.
    pub scanner: Option<ScannerState>,
    /// Advertiser state, absent when advertising is disabled.
    pub advertiser: Option<AdvertiserState>,
}

impl ComponentStates {
    /// Returns `true` while the scanner scans or the advertiser advertises.
    #[must_use]
    pub fn proximity_active(&self) -> bool {
        self.scanner == Some(ScannerState::Scanning)
            || self.advertiser == Some(AdvertiserState::Advertising)
    }
}

/// Full status report served by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Component lifecycles.
    pub components: ComponentStates,
    /// Quarantine and outbox state.
    pub reporting: CoordinatorStatus,
}
