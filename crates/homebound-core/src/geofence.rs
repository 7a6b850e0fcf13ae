//! Geofence monitor for the single quarantine region.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::location::{Coordinate, LocationSample};

/// Identifier of the monitored quarantine region.
pub const QUARANTINE_REGION_ID: &str = "region.quarantine";

/// A circular region registered with the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CircularRegion {
    /// Region identifier.
    pub identifier: String,
    /// Centre.
    pub center: Coordinate,
    /// Radius in metres, already clamped to the platform maximum.
    pub radius: f64,
    /// Deliver an event when the device enters.
    pub notify_on_entry: bool,
    /// Deliver an event when the device leaves.
    pub notify_on_exit: bool,
}

/// Platform region monitoring.
#[cfg_attr(test, mockall::automock)]
pub trait RegionMonitor: Send + Sync {
    /// Returns `true` if circular region monitoring is available.
    fn is_available(&self) -> bool;

    /// Largest radius the platform will monitor, in metres.
    fn maximum_region_radius(&self) -> f64;

    /// Identifiers of regions currently registered.
    fn monitored_regions(&self) -> Vec<String>;

    /// Registers `region`.
    fn start_monitoring(&self, region: &CircularRegion);

    /// Unregisters the region with `identifier`.
    fn stop_monitoring(&self, identifier: &str);
}

/// Region callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionEvent {
    /// The device entered a region.
    Entered(String),
    /// The device left a region.
    Exited(String),
    /// The platform could not monitor a region.
    MonitoringFailed {
        /// Region identifier, if known.
        identifier: Option<String>,
        /// Platform error text.
        error: String,
    },
}

/// Tracks the quarantine region and the last known position.
pub struct GeofenceMonitor {
    monitor: Arc<dyn RegionMonitor>,
    region: Option<CircularRegion>,
    last_location: Option<LocationSample>,
}

impl std::fmt::Debug for GeofenceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceMonitor")
            .field("region", &self.region)
            .field("last_location", &self.last_location)
            .finish_non_exhaustive()
    }
}

impl GeofenceMonitor {
    /// Creates a monitor with no region.
    pub fn new(monitor: Arc<dyn RegionMonitor>) -> Self {
        Self {
            monitor,
            region: None,
            last_location: None,
        }
    }

    /// The configured region, registered or not.
    #[must_use]
    pub const fn region(&self) -> Option<&CircularRegion> {
        self.region.as_ref()
    }

    /// Most recent position seen.
    #[must_use]
    pub const fn last_location(&self) -> Option<&LocationSample> {
        self.last_location.as_ref()
    }

    /// Replaces the monitored region.
    ///
    /// When monitoring is unavailable only the bookkeeping changes.
    pub fn set_zone(&mut self, center: Coordinate, radius: f64) -> &CircularRegion {
        let available = self.monitor.is_available();
        let radius = if available {
            radius.min(self.monitor.maximum_region_radius())
        } else {
            radius
        };
        let region = CircularRegion {
            identifier: QUARANTINE_REGION_ID.to_string(),
            center,
            radius,
            notify_on_entry: true,
            notify_on_exit: true,
        };

        if available {
            self.unregister();
            self.monitor.start_monitoring(&region);
            info!(
                lat = center.latitude,
                lon = center.longitude,
                radius,
                "monitoring quarantine region"
            );
        } else {
            warn!("region monitoring unavailable; quarantine region not registered");
        }
        self.region.insert(region)
    }

    /// Stops monitoring and forgets the region.
    pub fn clear_zone(&mut self) {
        if self.monitor.is_available() {
            self.unregister();
        }
        if self.region.take().is_some() {
            info!("quarantine region cleared");
        }
    }

    /// Records the latest position.
    pub fn update_location(&mut self, sample: LocationSample) {
        self.last_location = Some(sample);
    }

    /// Records `sample` and returns its distance from the region centre when
    /// that exceeds `threshold`.
    pub fn verify_presence(&mut self, sample: LocationSample, threshold: f64) -> Option<f64> {
        self.update_location(sample);
        let region = self.region.as_ref()?;
        let distance = region.center.distance_to(&sample.coordinate());
        (distance > threshold).then_some(distance)
    }

    /// Applies a region callback. Returns the distance to forward when the
    /// device left the quarantine region.
    pub fn handle(&mut self, event: RegionEvent) -> Option<f64> {
        match event {
            RegionEvent::Entered(identifier) => {
                self.on_enter(&identifier);
                None
            }
            RegionEvent::Exited(identifier) => self.on_exit(&identifier),
            RegionEvent::MonitoringFailed { identifier, error } => {
                warn!(region = identifier.as_deref().unwrap_or("unknown"), %error, "region monitoring failed");
                None
            }
        }
    }

    /// Distance from the last known position to the region centre, or 0
    /// without a position.
    pub fn on_exit(&self, identifier: &str) -> Option<f64> {
        let region = self.region.as_ref().filter(|r| r.identifier == identifier)?;
        let distance = self
            .last_location
            .map_or(0.0, |sample| region.center.distance_to(&sample.coordinate()));
        info!(region = identifier, distance, "left region");
        Some(distance)
    }

    /// Entering the region is acknowledged only.
    pub fn on_enter(&self, identifier: &str) {
        debug!(region = identifier, "entered region");
    }

    fn unregister(&self) {
        if self
            .monitor
            .monitored_regions()
            .iter()
            .any(|id| id == QUARANTINE_REGION_ID)
        {
            self.monitor.stop_monitoring(QUARANTINE_REGION_ID);
        }
    }
}
