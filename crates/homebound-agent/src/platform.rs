//! Software implementations of the platform seams for a headless Linux host.
//!
//! - [`ReplayLocationProvider`] replays fixes from a JSON Lines feed, one per
//!   sampling cycle
//! - [`SoftwareRegionMonitor`] evaluates circular regions against the fixes
//!   it is shown and reports crossings
//! - [`LogAlertPresenter`] writes alerts to the log
//! - [`ProcessBackground`] grants background tokens that never expire
//! - [`NullRadio`] reports that no BLE radio is available

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use homebound_core::alert::{Alert, AlertPresenter};
use homebound_core::clock::Clock;
use homebound_core::geofence::{CircularRegion, RegionEvent, RegionMonitor};
use homebound_core::location::{Coordinate, LocationSample};
use homebound_core::radio::{
    AdvertisementData, CentralRadio, GattService, PeerHandle, PeripheralRadio, RadioState,
};
use homebound_core::sampler::{AccuracyMode, BackgroundExecution, BackgroundToken, SamplerEvent};
use homebound_core::HomeboundError;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One line of a location feed.
#[derive(Debug, Clone, Copy, Deserialize)]
struct FeedEntry {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_feed_accuracy")]
    accuracy: f64,
}

const fn default_feed_accuracy() -> f64 {
    10.0
}

/// Replays recorded positions as fresh fixes.
///
/// Every `start_updates` call delivers the next position, stamped with the
/// current time. The feed wraps around.
pub struct ReplayLocationProvider {
    fixes: Vec<FeedEntry>,
    cursor: AtomicUsize,
    updating: AtomicBool,
    clock: Arc<dyn Clock>,
    events: UnboundedSender<SamplerEvent>,
}

impl std::fmt::Debug for ReplayLocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayLocationProvider")
            .field("fixes", &self.fixes.len())
            .field("cursor", &self.cursor)
            .field("updating", &self.updating)
            .finish_non_exhaustive()
    }
}

impl ReplayLocationProvider {
    /// A provider that never produces a fix.
    pub fn empty(clock: Arc<dyn Clock>, events: UnboundedSender<SamplerEvent>) -> Self {
        Self {
            fixes: Vec::new(),
            cursor: AtomicUsize::new(0),
            updating: AtomicBool::new(false),
            clock,
            events,
        }
    }

    /// Loads a feed of `{"latitude", "longitude", "accuracy"}` lines.
    /// Unparseable or out-of-range lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(
        path: &Path,
        clock: Arc<dyn Clock>,
        events: UnboundedSender<SamplerEvent>,
    ) -> Result<Self, HomeboundError> {
        let content = std::fs::read_to_string(path)?;
        let mut provider = Self::empty(clock, events);
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedEntry>(line) {
                Ok(entry) if Coordinate::new(entry.latitude, entry.longitude).is_valid() => {
                    provider.fixes.push(entry);
                }
                Ok(_) => warn!(line = index + 1, "feed position out of range"),
                Err(error) => warn!(line = index + 1, %error, "skipping unreadable feed line"),
            }
        }
        info!(path = %path.display(), fixes = provider.fixes.len(), "location feed loaded");
        Ok(provider)
    }

    /// Number of positions in the feed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// Returns `true` if the feed has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    fn deliver_next(&self) {
        if self.fixes.is_empty() {
            return;
        }
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.fixes.len();
        let entry = self.fixes[index];
        let sample = LocationSample::new(
            self.clock.now(),
            Coordinate::new(entry.latitude, entry.longitude),
            entry.accuracy,
        );
        if self.events.send(SamplerEvent::Fixes(vec![sample])).is_err() {
            debug!("sampler event channel closed");
        }
    }
}

impl homebound_core::LocationProvider for ReplayLocationProvider {
    fn set_accuracy(&self, mode: AccuracyMode) {
        debug!(
            desired = mode.desired_accuracy(),
            distance_filter = mode.distance_filter(),
            "location accuracy profile"
        );
    }

    fn start_updates(&self) {
        self.updating.store(true, Ordering::Release);
        self.deliver_next();
    }

    fn stop_updates(&self) {
        self.updating.store(false, Ordering::Release);
    }

    fn start_significant_changes(&self) {}

    fn stop_significant_changes(&self) {}

    fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }
}

/// Region monitoring done in software against observed fixes.
///
/// A region reports a crossing only after its first observation established
/// which side of the boundary the device is on.
#[derive(Debug)]
pub struct SoftwareRegionMonitor {
    max_radius: f64,
    regions: Mutex<HashMap<String, (CircularRegion, Option<bool>)>>,
}

impl SoftwareRegionMonitor {
    /// Creates a monitor accepting regions up to `max_radius` metres.
    #[must_use]
    pub fn new(max_radius: f64) -> Self {
        Self {
            max_radius,
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates `sample` against every region and returns the crossings.
    pub fn observe(&self, sample: &LocationSample) -> Vec<RegionEvent> {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events = Vec::new();
        for (identifier, (region, inside)) in regions.iter_mut() {
            let now_inside = region.center.distance_to(&sample.coordinate()) <= region.radius;
            match (*inside, now_inside) {
                (Some(true), false) if region.notify_on_exit => {
                    events.push(RegionEvent::Exited(identifier.clone()));
                }
                (Some(false), true) if region.notify_on_entry => {
                    events.push(RegionEvent::Entered(identifier.clone()));
                }
                _ => {}
            }
            *inside = Some(now_inside);
        }
        events
    }
}

impl RegionMonitor for SoftwareRegionMonitor {
    fn is_available(&self) -> bool {
        true
    }

    fn maximum_region_radius(&self) -> f64 {
        self.max_radius
    }

    fn monitored_regions(&self) -> Vec<String> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn start_monitoring(&self, region: &CircularRegion) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.identifier.clone(), (region.clone(), None));
    }

    fn stop_monitoring(&self, identifier: &str) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogAlertPresenter {
    presented: AtomicU64,
}

impl LogAlertPresenter {
    /// Alerts presented so far.
    #[must_use]
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }
}

impl AlertPresenter for LogAlertPresenter {
    fn present(&self, alert: &Alert) {
        self.presented.fetch_add(1, Ordering::AcqRel);
        warn!(
            category = alert.category,
            presence = ?alert.presence,
            message = %alert.message,
            "quarantine alert"
        );
    }
}

/// Background execution for a daemon: always granted, never revoked.
#[derive(Debug, Default)]
pub struct ProcessBackground {
    next: AtomicU64,
}

impl BackgroundExecution for ProcessBackground {
    fn begin(&self) -> Option<BackgroundToken> {
        Some(BackgroundToken(self.next.fetch_add(1, Ordering::AcqRel)))
    }

    fn end(&self, token: BackgroundToken) {
        debug!(token = token.0, "background token released");
    }
}

/// A host without a usable BLE radio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRadio;

impl PeripheralRadio for NullRadio {
    fn state(&self) -> RadioState {
        RadioState::Unsupported
    }

    fn publish_service(&self, service: &GattService) {
        debug!(service = %service.uuid, "no radio, service not published");
    }

    fn start_advertising(&self, _data: &AdvertisementData) {}

    fn stop_advertising(&self) {}
}

impl CentralRadio for NullRadio {
    fn state(&self) -> RadioState {
        RadioState::Unsupported
    }

    fn start_scan(&self, _services: &[Uuid]) {}

    fn stop_scan(&self) {}

    fn is_scanning(&self) -> bool {
        false
    }

    fn connect(&self, _peer: PeerHandle) {}

    fn discover_services(&self, _peer: PeerHandle, _services: &[Uuid]) {}

    fn discover_characteristics(&self, _peer: PeerHandle, _service: Uuid, _characteristics: &[Uuid]) {}

    fn read_value(&self, _peer: PeerHandle, _service: Uuid, _characteristic: Uuid) {}

    fn disconnect(&self, _peer: PeerHandle) {}
}
