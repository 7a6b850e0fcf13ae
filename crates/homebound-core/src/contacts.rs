//! Contact records built from peer sightings.
//!
//! Every identity read by the scanner becomes one [`Connection`]. Positions
//! are rounded to four decimal places before they are stored. Records are
//! appended to their own outbox and deduplicated per seen profile just before
//! upload.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::beacon::DeviceIdentifier;
use crate::location::{Coordinate, LocationSample};
use crate::scanner::Sighting;

/// Accuracy reported for a contact recorded without any known position.
pub const UNKNOWN_POSITION_ACCURACY: f64 = 100.0;

/// A sighting of another profile, as uploaded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Profile identifier of the peer.
    pub seen_profile_id: u32,
    /// Epoch seconds of the identity read.
    pub timestamp: i64,
    /// Seconds between first discovery and the identity read.
    pub duration: String,
    /// Latitude rounded to four decimal places, 0 when unknown.
    pub latitude: f64,
    /// Longitude rounded to four decimal places, 0 when unknown.
    pub longitude: f64,
    /// Accuracy of the position in metres.
    pub accuracy: f64,
}

impl Connection {
    /// Builds a contact record for a sighting that carried a profile id.
    ///
    /// `position` is the most recent accepted fix. A non-negative
    /// `accuracy_override` replaces the fix accuracy (remote
    /// `iBeaconLocationAccuracy`).
    #[must_use]
    pub fn from_sighting(
        sighting: &Sighting,
        profile: DeviceIdentifier,
        position: Option<&LocationSample>,
        accuracy_override: f64,
    ) -> Self {
        let coordinate = position
            .map(|sample| sample.coordinate().approximate())
            .unwrap_or(Coordinate::new(0.0, 0.0));
        let accuracy = if accuracy_override >= 0.0 {
            accuracy_override
        } else {
            position.map_or(UNKNOWN_POSITION_ACCURACY, |sample| sample.accuracy)
        };
        let duration = (sighting.seen_at - sighting.first_seen).num_seconds().max(0);

        Self {
            seen_profile_id: profile.0,
            timestamp: sighting.seen_at.timestamp(),
            duration: duration.to_string(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            accuracy,
        }
    }
}

/// Keeps one record per seen profile, preferring records with a position.
///
/// Records are ordered by absolute latitude, largest first, so a record taken
/// without a fix (latitude 0) only survives when no other record for the
/// same profile exists.
#[must_use]
pub fn dedup(mut connections: Vec<Connection>) -> Vec<Connection> {
    connections.sort_by(|a, b| b.latitude.abs().total_cmp(&a.latitude.abs()));
    let mut seen = HashSet::new();
    connections.retain(|c| seen.insert(c.seen_profile_id));
    connections
}
