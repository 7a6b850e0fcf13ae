//! Backend request shapes and the transport seam.
//!
//! The coordinator only needs to know whether a request succeeded; no
//! response payload is consumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contacts::Connection;
use crate::location::LocationSample;

/// Area-exit endpoint path, relative to the API root.
pub const AREA_EXIT_PATH: &str = "profile/areaexit";
/// Location batch endpoint path.
pub const LOCATIONS_PATH: &str = "profile/location";
/// Contact batch endpoint path.
pub const CONTACTS_PATH: &str = "profile/contacts";

/// Transport failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be completed (DNS, connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    Rejected {
        /// Endpoint path.
        endpoint: String,
        /// HTTP status.
        status: u16,
    },
}

/// Result type for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Immediate report that the device left its quarantine zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaExitReport {
    /// Device identity string.
    pub device_id: String,
    /// Profile identifier (0 when unregistered).
    pub profile_id: u32,
    /// How far outside the zone the device was, in whole metres.
    pub severity: i64,
    /// Epoch seconds of the decision.
    pub record_timestamp: i64,
}

/// A batch of in-zone location samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBatch {
    /// Device identity string.
    pub device_id: String,
    /// Profile identifier.
    pub profile_id: u32,
    /// Samples in append order.
    pub locations: Vec<LocationSample>,
}

/// A batch of peer sightings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBatch {
    /// Device identity string of the reporter.
    pub source_device_id: String,
    /// Profile identifier of the reporter.
    pub source_profile_id: u32,
    /// Deduplicated sightings.
    pub connections: Vec<Connection>,
}

/// Network collaborator used by the reporting coordinator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// Sends an area-exit report.
    async fn send_area_exit(&self, report: &AreaExitReport) -> TransportResult<()>;

    /// Uploads a location batch.
    async fn upload_locations(&self, batch: &LocationBatch) -> TransportResult<()>;

    /// Uploads a contact batch.
    async fn upload_contacts(&self, batch: &ContactBatch) -> TransportResult<()>;
}
