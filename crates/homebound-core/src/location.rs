//! Location primitives: coordinates, samples and the quarantine zone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{HomeboundError, Result};

/// Mean Earth radius in metres (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS-84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    #[schema(example = 48.145_842)]
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    #[schema(example = 17.126_651)]
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let d_phi = (other.latitude - self.latitude).to_radians();
        let d_lambda = (other.longitude - self.longitude).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// The point reached by travelling `distance_m` metres from here along
    /// the initial bearing `bearing_deg` (clockwise from north).
    #[must_use]
    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> Self {
        let delta = distance_m / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let phi1 = self.latitude.to_radians();
        let lambda1 = self.longitude.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

        Self::new(phi2.to_degrees(), lambda2.to_degrees())
    }

    /// Rounds both components to four decimal places (about 11 m).
    #[must_use]
    pub fn approximate(&self) -> Self {
        Self::new(
            (self.latitude * 10_000.0).round() / 10_000.0,
            (self.longitude * 10_000.0).round() / 10_000.0,
        )
    }
}

/// An accepted location fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// Seconds since the Unix epoch at which the fix was recorded.
    #[schema(example = 1_584_403_200)]
    pub record_timestamp: i64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    #[schema(example = 10.0)]
    pub accuracy: f64,
}

impl LocationSample {
    /// Creates a sample stamped with `recorded_at`.
    #[must_use]
    pub fn new(recorded_at: DateTime<Utc>, coordinate: Coordinate, accuracy: f64) -> Self {
        Self {
            record_timestamp: recorded_at.timestamp(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            accuracy,
        }
    }

    /// The sample's position.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// The permitted-movement circle of an active quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuarantineZone {
    /// Centre of the zone (the quarantine address).
    pub center: Coordinate,
    /// Radius in metres.
    #[schema(example = 100.0)]
    pub radius: f64,
}

impl QuarantineZone {
    /// Creates a validated zone.
    ///
    /// # Errors
    ///
    /// Returns [`HomeboundError::InvalidZone`] if the centre is out of range or
    /// the radius is not a positive finite number.
    pub fn new(center: Coordinate, radius: f64) -> Result<Self> {
        if !center.is_valid() {
            return Err(HomeboundError::InvalidZone(format!(
                "center ({}, {}) is out of range",
                center.latitude, center.longitude
            )));
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(HomeboundError::InvalidZone(format!(
                "radius must be a positive number of metres (got {radius})"
            )));
        }
        Ok(Self { center, radius })
    }

    /// Distance from the zone centre to `point` in metres.
    #[must_use]
    pub fn distance_from_center(&self, point: &Coordinate) -> f64 {
        self.center.distance_to(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRATISLAVA: Coordinate = Coordinate::new(48.145_842, 17.126_651);

    #[test]
    fn test_distance_to_self_is_zero() {
        assert!(BRATISLAVA.distance_to(&BRATISLAVA).abs() < 1e-9);
    }

    #[test]
    fn test_destination_matches_distance() {
        for (bearing, meters) in [(0.0, 50.0), (90.0, 250.0), (200.0, 1_000.0)] {
            let moved = BRATISLAVA.destination(bearing, meters);
            let measured = BRATISLAVA.distance_to(&moved);
            assert!(
                (measured - meters).abs() < 0.01,
                "bearing {bearing}: expected {meters}, got {measured}"
            );
        }
    }

    #[test]
    fn test_known_distance() {
        // Bratislava to Vienna, roughly 55 km.
        let vienna = Coordinate::new(48.208_174, 16.373_819);
        let km = BRATISLAVA.distance_to(&vienna) / 1_000.0;
        assert!((50.0..60.0).contains(&km), "got {km} km");
    }

    #[test]
    fn test_approximate_rounds_to_four_places() {
        let approx = BRATISLAVA.approximate();
        assert!((approx.latitude - 48.1458).abs() < 1e-12);
        assert!((approx.longitude - 17.1267).abs() < 1e-12);
    }

    #[test]
    fn test_zone_validation() {
        assert!(QuarantineZone::new(BRATISLAVA, 100.0).is_ok());
        assert!(QuarantineZone::new(BRATISLAVA, 0.0).is_err());
        assert!(QuarantineZone::new(BRATISLAVA, f64::NAN).is_err());
        assert!(QuarantineZone::new(Coordinate::new(91.0, 0.0), 10.0).is_err());
    }

    #[test]
    fn test_sample_serializes_camel_case() {
        let sample = LocationSample {
            record_timestamp: 10,
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 3.0,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"recordTimestamp\":10"));
        assert!(json.contains("\"accuracy\":3.0"));
    }
}
