//! Reporting coordinator: turns positions, region events and sightings into
//! alerts, outbox appends and backend uploads.
//!
//! # Location decisions
//!
//! For every accepted fix, [`ReportingCoordinator::report_location`]:
//!
//! 1. does nothing unless a quarantine with a zone is active;
//! 2. does nothing if the previous decision was less than
//!    `quarantineLocationPeriodMinutes` ago (the decision time is recorded
//!    before the distance is computed);
//! 3. compares the distance from the zone centre against
//!    `max(accuracy * 2, desiredPositionAccuracy)`;
//! 4. outside: alerts the user and, if `reportQuarantineExit`, sends one
//!    area-exit report. The sample is not logged;
//! 5. inside: if `reportQuarantineLocation`, appends the sample to the
//!    location outbox and flushes it when `batchSendingFrequency` minutes
//!    have passed since the last successful flush.
//!
//! A failed flush keeps the outbox intact; the next due flush retries it.
//! Area-exit reports are sent once and never retried.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::alert::{Alert, AlertPresenter, PresenceSource, QUARANTINE_CATEGORY};
use crate::clock::{epoch_seconds, Clock};
use crate::contacts::{self, Connection};
use crate::error::{HomeboundError, Result};
use crate::geofence::{GeofenceMonitor, RegionEvent};
use crate::location::{LocationSample, QuarantineZone};
use crate::outbox::Outbox;
use crate::remote::{RemoteConfig, RemoteConfigKey};
use crate::scanner::Sighting;
use crate::settings::{PersistedState, SettingsStore};
use crate::transport::{AreaExitReport, ContactBatch, LocationBatch, ReportTransport};

/// Outcome of an outbox flush attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum FlushOutcome {
    /// The batch window has not elapsed.
    NotDue,
    /// Nothing was pending.
    Empty,
    /// The backend acknowledged the batch.
    Uploaded {
        /// Records removed from the outbox.
        records: usize,
    },
    /// The upload failed; the outbox is unchanged.
    Failed,
}

/// What [`ReportingCoordinator::report_location`] decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ReportDecision {
    /// No active quarantine.
    Inactive,
    /// Too soon after the previous decision.
    RateLimited,
    /// The device is outside the zone.
    Exited {
        /// Distance from the zone centre in metres.
        distance: f64,
        /// Whether an area-exit report was accepted by the backend.
        reported: bool,
    },
    /// The sample was appended to the location outbox.
    Logged {
        /// Flush attempted after the append.
        flush: FlushOutcome,
    },
    /// Inside the zone with location reporting disabled.
    NotLogged,
}

/// Snapshot of the coordinator for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CoordinatorStatus {
    /// Whether a quarantine is in force.
    pub quarantine_active: bool,
    /// The configured zone.
    pub zone: Option<QuarantineZone>,
    /// Location samples awaiting upload.
    pub pending_locations: usize,
    /// Contact records awaiting upload.
    pub pending_connections: usize,
    /// Epoch seconds of the last report decision.
    pub last_quarantine_update: Option<f64>,
    /// Epoch seconds of the last acknowledged location batch.
    pub last_location_update: Option<f64>,
    /// Epoch seconds of the last acknowledged contact batch.
    pub last_connections_update: Option<f64>,
    /// Most recent accepted fix.
    pub last_position: Option<LocationSample>,
}

/// Everything the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Persistent state.
    pub settings: Arc<dyn SettingsStore>,
    /// Remote flags with defaults.
    pub remote: RemoteConfig,
    /// Backend.
    pub transport: Arc<dyn ReportTransport>,
    /// User-visible alerts.
    pub alerts: Arc<dyn AlertPresenter>,
    /// Foreground/background state.
    pub presence: Arc<dyn PresenceSource>,
}

/// The central decision point of the pipeline.
pub struct ReportingCoordinator {
    deps: Collaborators,
    geofence: GeofenceMonitor,
    locations: Outbox<LocationSample>,
    connections: Outbox<Connection>,
    last_position: Option<LocationSample>,
}

impl std::fmt::Debug for ReportingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingCoordinator")
            .field("geofence", &self.geofence)
            .field("locations", &self.locations)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ReportingCoordinator {
    /// Creates a coordinator over the given outboxes.
    pub fn new(
        deps: Collaborators,
        geofence: GeofenceMonitor,
        locations: Outbox<LocationSample>,
        connections: Outbox<Connection>,
    ) -> Self {
        Self {
            deps,
            geofence,
            locations,
            connections,
            last_position: None,
        }
    }

    /// Re-registers the persisted zone after a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub fn resume(&mut self) -> Result<()> {
        let state = self.deps.settings.load()?;
        if let Some(zone) = state.active_zone() {
            info!(radius = zone.radius, "resuming quarantine monitoring");
            self.geofence.set_zone(zone.center, zone.radius);
        }
        Ok(())
    }

    /// Starts (or replaces) a quarantine.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    pub fn start_quarantine(&mut self, zone: QuarantineZone) -> Result<()> {
        let mut state = self.deps.settings.load()?;
        state.quarantine_zone = Some(zone);
        state.quarantine_active = true;
        self.deps.settings.save(&state)?;
        self.geofence.set_zone(zone.center, zone.radius);
        info!(
            lat = zone.center.latitude,
            lon = zone.center.longitude,
            radius = zone.radius,
            "quarantine started"
        );
        Ok(())
    }

    /// Ends the quarantine and makes a final attempt to upload pending
    /// locations. Records that fail to upload stay queued for
    /// [`flush_pending_locations`](Self::flush_pending_locations).
    ///
    /// # Errors
    ///
    /// Returns [`HomeboundError::QuarantineInactive`] if none is active, or an
    /// error if the state cannot be persisted.
    pub async fn end_quarantine(&mut self) -> Result<FlushOutcome> {
        let mut state = self.deps.settings.load()?;
        if state.active_zone().is_none() {
            return Err(HomeboundError::QuarantineInactive);
        }
        let flush = self.flush_locations(&mut state, true).await?;

        state.quarantine_active = false;
        state.quarantine_zone = None;
        self.deps.settings.save(&state)?;
        self.geofence.clear_zone();
        info!(?flush, "quarantine ended");
        Ok(flush)
    }

    /// Decides what to do with an accepted fix.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store or the outbox fails.
    pub async fn report_location(&mut self, sample: LocationSample) -> Result<ReportDecision> {
        self.last_position = Some(sample);
        self.geofence.update_location(sample);

        let mut state = self.deps.settings.load()?;
        let Some(zone) = state.active_zone() else {
            return Ok(ReportDecision::Inactive);
        };
        if !self.claim_decision(&mut state)? {
            return Ok(ReportDecision::RateLimited);
        }

        let remote = &self.deps.remote;
        let distance = zone.distance_from_center(&sample.coordinate());
        let threshold =
            (sample.accuracy * 2.0).max(remote.double(RemoteConfigKey::DesiredPositionAccuracy));

        if distance > threshold {
            info!(distance, threshold, "sample outside quarantine zone");
            let reported = self.alert_exit(&state, distance).await;
            return Ok(ReportDecision::Exited { distance, reported });
        }

        debug!(distance, threshold, "sample inside quarantine zone");
        if !remote.bool(RemoteConfigKey::ReportQuarantineLocation) {
            return Ok(ReportDecision::NotLogged);
        }
        self.locations.append(&sample)?;
        let flush = self.flush_locations(&mut state, false).await?;
        Ok(ReportDecision::Logged { flush })
    }

    /// Handles an exit detected by region monitoring or presence
    /// verification. Returns `true` if the user was alerted.
    ///
    /// Requires an active quarantine and `distance > desiredPositionAccuracy`,
    /// and shares the decision rate limit with
    /// [`report_location`](Self::report_location).
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store fails.
    pub async fn report_exit(&mut self, distance: f64) -> Result<bool> {
        let mut state = self.deps.settings.load()?;
        let desired = self
            .deps
            .remote
            .double(RemoteConfigKey::DesiredPositionAccuracy);
        if state.active_zone().is_none() || distance <= desired {
            return Ok(false);
        }
        if !self.claim_decision(&mut state)? {
            debug!(distance, "exit within rate limit window");
            return Ok(false);
        }
        info!(distance, "quarantine region exit");
        self.alert_exit(&state, distance).await;
        Ok(true)
    }

    /// Checks `sample` against the zone and routes a detected exit through
    /// [`report_exit`](Self::report_exit).
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store fails.
    pub async fn verify_presence(&mut self, sample: LocationSample) -> Result<bool> {
        let desired = self
            .deps
            .remote
            .double(RemoteConfigKey::DesiredPositionAccuracy);
        match self.geofence.verify_presence(sample, desired) {
            Some(distance) => self.report_exit(distance).await,
            None => Ok(false),
        }
    }

    /// Applies a region callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store fails.
    pub async fn handle_region_event(&mut self, event: RegionEvent) -> Result<bool> {
        match self.geofence.handle(event) {
            Some(distance) => self.report_exit(distance).await,
            None => Ok(false),
        }
    }

    /// Appends contact records for `sightings` and flushes them when due.
    ///
    /// Sightings without a profile identifier are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store or the outbox fails.
    pub async fn record_sightings(&mut self, sightings: &[Sighting]) -> Result<FlushOutcome> {
        let accuracy_override = self
            .deps
            .remote
            .double(RemoteConfigKey::IBeaconLocationAccuracy);
        let records: Vec<Connection> = sightings
            .iter()
            .filter_map(|sighting| {
                let profile = sighting.profile_id();
                if profile.is_none() {
                    debug!(peer = %sighting.peer, "sighting without profile id");
                }
                profile.map(|profile| {
                    Connection::from_sighting(
                        sighting,
                        profile,
                        self.last_position.as_ref(),
                        accuracy_override,
                    )
                })
            })
            .collect();

        if !records.is_empty() {
            self.connections.append_all(&records)?;
            debug!(count = records.len(), "recorded contacts");
        }
        self.flush_contacts(false).await
    }

    /// Uploads pending contacts, deduplicated per profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store or the outbox fails.
    pub async fn flush_contacts(&mut self, force: bool) -> Result<FlushOutcome> {
        let mut state = self.deps.settings.load()?;
        let now = epoch_seconds(self.deps.clock.now());
        let window = self.batch_window_secs();
        let due = state
            .last_connections_update
            .map_or(true, |last| now - last > window);
        if !force && !due {
            return Ok(FlushOutcome::NotDue);
        }

        let batch = self.connections.read_batch()?;
        if batch.is_empty() {
            if batch.skipped > 0 {
                self.connections.acknowledge(&batch)?;
            }
            return Ok(FlushOutcome::Empty);
        }

        let upload = ContactBatch {
            source_device_id: state.device_id.clone(),
            source_profile_id: profile_number(&state),
            connections: contacts::dedup(batch.records.clone()),
        };
        match self.deps.transport.upload_contacts(&upload).await {
            Ok(()) => {
                self.connections.acknowledge(&batch)?;
                state.last_connections_update = Some(now);
                self.deps.settings.save(&state)?;
                info!(
                    records = batch.len(),
                    uploaded = upload.connections.len(),
                    "contact batch uploaded"
                );
                Ok(FlushOutcome::Uploaded {
                    records: batch.len(),
                })
            }
            Err(error) => {
                let error = HomeboundError::from(error);
                warn!(
                    %error,
                    transient = error.is_transient(),
                    pending = batch.len(),
                    "contact batch failed, keeping outbox"
                );
                Ok(FlushOutcome::Failed)
            }
        }
    }

    /// Uploads queued locations once the batch window has elapsed, whether
    /// or not a quarantine is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store or the outbox fails.
    pub async fn flush_pending_locations(&mut self) -> Result<FlushOutcome> {
        let mut state = self.deps.settings.load()?;
        self.flush_locations(&mut state, false).await
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store or the outboxes cannot be read.
    pub fn status(&self) -> Result<CoordinatorStatus> {
        let state = self.deps.settings.load()?;
        Ok(CoordinatorStatus {
            quarantine_active: state.quarantine_active,
            zone: state.quarantine_zone,
            pending_locations: self.locations.pending()?,
            pending_connections: self.connections.pending()?,
            last_quarantine_update: state.last_quarantine_update,
            last_location_update: state.last_location_update,
            last_connections_update: state.last_connections_update,
            last_position: self.last_position,
        })
    }

    /// Records a report decision unless one happened within
    /// `quarantineLocationPeriodMinutes`.
    fn claim_decision(&self, state: &mut PersistedState) -> Result<bool> {
        let now = epoch_seconds(self.deps.clock.now());
        let period = self
            .deps
            .remote
            .double(RemoteConfigKey::QuarantineLocationPeriodMinutes)
            * 60.0;
        let last = state.last_quarantine_update.unwrap_or(0.0);
        if now - last <= period {
            return Ok(false);
        }
        state.last_quarantine_update = Some(now);
        self.deps.settings.save(state)?;
        Ok(true)
    }

    /// Alerts the user and sends the area-exit report if enabled. Returns
    /// whether the report was accepted.
    async fn alert_exit(&self, state: &PersistedState, distance: f64) -> bool {
        let remote = &self.deps.remote;
        self.deps.alerts.present(&Alert {
            message: remote.string(RemoteConfigKey::QuarantineLeftMessage),
            category: QUARANTINE_CATEGORY,
            presence: self.deps.presence.presence(),
        });

        if !remote.bool(RemoteConfigKey::ReportQuarantineExit) {
            return false;
        }
        #[allow(clippy::cast_possible_truncation)]
        let report = AreaExitReport {
            device_id: state.device_id.clone(),
            profile_id: profile_number(state),
            severity: distance as i64,
            record_timestamp: self.deps.clock.now().timestamp(),
        };
        match self.deps.transport.send_area_exit(&report).await {
            Ok(()) => true,
            Err(error) => {
                let error = HomeboundError::from(error);
                warn!(
                    %error,
                    transient = error.is_transient(),
                    severity = report.severity,
                    "area exit report dropped"
                );
                false
            }
        }
    }

    async fn flush_locations(&self, state: &mut PersistedState, force: bool) -> Result<FlushOutcome> {
        let now = epoch_seconds(self.deps.clock.now());
        let last = state.last_location_update.unwrap_or(0.0);
        if !force && now - last <= self.batch_window_secs() {
            return Ok(FlushOutcome::NotDue);
        }

        let batch = self.locations.read_batch()?;
        if batch.is_empty() {
            if batch.skipped > 0 {
                self.locations.acknowledge(&batch)?;
            }
            return Ok(FlushOutcome::Empty);
        }

        let upload = LocationBatch {
            device_id: state.device_id.clone(),
            profile_id: profile_number(state),
            locations: batch.records.clone(),
        };
        match self.deps.transport.upload_locations(&upload).await {
            Ok(()) => {
                self.locations.acknowledge(&batch)?;
                state.last_location_update = Some(now);
                self.deps.settings.save(state)?;
                info!(records = batch.len(), "location batch uploaded");
                Ok(FlushOutcome::Uploaded {
                    records: batch.len(),
                })
            }
            Err(error) => {
                let error = HomeboundError::from(error);
                warn!(
                    %error,
                    transient = error.is_transient(),
                    pending = batch.len(),
                    "location batch failed, keeping outbox"
                );
                Ok(FlushOutcome::Failed)
            }
        }
    }

    fn batch_window_secs(&self) -> f64 {
        self.deps
            .remote
            .double(RemoteConfigKey::BatchSendingFrequency)
            * 60.0
    }
}

fn profile_number(state: &PersistedState) -> u32 {
    state.profile_id.map_or(0, |id| id.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AppPresence, MockAlertPresenter, SharedPresence};
    use crate::beacon::DeviceIdentifier;
    use crate::clock::ManualClock;
    use crate::geofence::MockRegionMonitor;
    use crate::location::Coordinate;
    use crate::radio::PeerHandle;
    use crate::remote::RemoteSnapshot;
    use crate::settings::MemorySettingsStore;
    use crate::transport::{MockReportTransport, TransportError};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    const CENTER: Coordinate = Coordinate::new(48.145_842, 17.126_651);

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        settings: Arc<MemorySettingsStore>,
        coordinator: ReportingCoordinator,
        locations: Outbox<LocationSample>,
    }

    fn region_monitor() -> MockRegionMonitor {
        let mut monitor = MockRegionMonitor::new();
        monitor.expect_is_available().return_const(true);
        monitor.expect_maximum_region_radius().return_const(10_000.0);
        monitor.expect_monitored_regions().return_const(Vec::<String>::new());
        monitor.expect_start_monitoring().return_const(());
        monitor.expect_stop_monitoring().return_const(());
        monitor
    }

    fn fixture(
        transport: MockReportTransport,
        alerts: MockAlertPresenter,
        remote: serde_json::Value,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_584_403_200, 0).unwrap()));
        let zone = QuarantineZone::new(CENTER, 100.0).unwrap();
        let settings = Arc::new(MemorySettingsStore::with_state(PersistedState {
            device_id: "device-1".into(),
            profile_id: Some(DeviceIdentifier(42)),
            quarantine_zone: Some(zone),
            quarantine_active: true,
            ..PersistedState::default()
        }));
        let serde_json::Value::Object(values) = remote else {
            panic!("remote flags must be an object")
        };
        let locations = Outbox::new(dir.path().join("locations.jsonl"));
        let deps = Collaborators {
            clock: clock.clone(),
            settings: settings.clone(),
            remote: RemoteConfig::new(Arc::new(RemoteSnapshot::new(values))),
            transport: Arc::new(transport),
            alerts: Arc::new(alerts),
            presence: Arc::new(SharedPresence::new(AppPresence::Background)),
        };
        let coordinator = ReportingCoordinator::new(
            deps,
            GeofenceMonitor::new(Arc::new(region_monitor())),
            locations.clone(),
            Outbox::new(dir.path().join("connections.jsonl")),
        );
        Fixture {
            _dir: dir,
            clock,
            settings,
            coordinator,
            locations,
        }
    }

    fn sample(distance: f64, accuracy: f64, clock: &ManualClock) -> LocationSample {
        LocationSample::new(clock.now(), CENTER.destination(45.0, distance), accuracy)
    }

    fn no_alerts() -> MockAlertPresenter {
        let mut alerts = MockAlertPresenter::new();
        alerts.expect_present().never();
        alerts
    }

    #[tokio::test]
    async fn test_exit_alerts_reports_and_skips_log() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_send_area_exit()
            .withf(|r| r.severity == 250 && r.profile_id == 42 && r.device_id == "device-1")
            .times(1)
            .returning(|_| Ok(()));
        transport.expect_upload_locations().never();
        let mut alerts = MockAlertPresenter::new();
        alerts
            .expect_present()
            .withf(|a| a.category == QUARANTINE_CATEGORY && a.presence == AppPresence::Background)
            .times(1)
            .return_const(());

        let mut f = fixture(transport, alerts, json!({}));
        let s = sample(250.0, 10.0, &f.clock);
        let decision = f.coordinator.report_location(s).await.unwrap();

        assert!(matches!(decision, ReportDecision::Exited { reported: true, .. }));
        assert_eq!(f.locations.pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inside_appends_without_alert() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_upload_locations()
            .times(1)
            .returning(|_| Ok(()));
        let mut f = fixture(transport, no_alerts(), json!({}));

        // First decision flushes immediately (no previous flush).
        let s = sample(50.0, 10.0, &f.clock);
        let decision = f.coordinator.report_location(s).await.unwrap();
        assert_eq!(
            decision,
            ReportDecision::Logged {
                flush: FlushOutcome::Uploaded { records: 1 }
            }
        );

        // Next one is logged but the batch window has not elapsed.
        f.clock.advance(Duration::minutes(6));
        let s = sample(50.0, 10.0, &f.clock);
        let decision = f.coordinator.report_location(s).await.unwrap();
        assert_eq!(
            decision,
            ReportDecision::Logged {
                flush: FlushOutcome::NotDue
            }
        );
        assert_eq!(f.locations.pending().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_skips_distance_check() {
        let mut transport = MockReportTransport::new();
        transport.expect_upload_locations().returning(|_| Ok(()));
        transport.expect_send_area_exit().never();
        let mut f = fixture(transport, no_alerts(), json!({}));

        f.coordinator
            .report_location(sample(10.0, 10.0, &f.clock))
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(4));
        let decision = f
            .coordinator
            .report_location(sample(5_000.0, 10.0, &f.clock))
            .await
            .unwrap();
        assert_eq!(decision, ReportDecision::RateLimited);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_outbox() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_upload_locations()
            .times(1)
            .returning(|_| Err(TransportError::Request("offline".into())));
        let mut f = fixture(transport, no_alerts(), json!({}));

        let decision = f
            .coordinator
            .report_location(sample(20.0, 10.0, &f.clock))
            .await
            .unwrap();
        assert_eq!(
            decision,
            ReportDecision::Logged {
                flush: FlushOutcome::Failed
            }
        );
        assert_eq!(f.locations.pending().unwrap(), 1);
        assert!(f.settings.load().unwrap().last_location_update.is_none());
    }

    #[tokio::test]
    async fn test_inactive_quarantine_is_noop() {
        let transport = MockReportTransport::new();
        let mut f = fixture(transport, no_alerts(), json!({}));
        let mut state = f.settings.load().unwrap();
        state.quarantine_active = false;
        f.settings.save(&state).unwrap();

        let decision = f
            .coordinator
            .report_location(sample(5_000.0, 10.0, &f.clock))
            .await
            .unwrap();
        assert_eq!(decision, ReportDecision::Inactive);
        assert!(f.settings.load().unwrap().last_quarantine_update.is_none());
    }

    #[tokio::test]
    async fn test_remote_flags_disable_reports() {
        let mut transport = MockReportTransport::new();
        transport.expect_send_area_exit().never();
        transport.expect_upload_locations().never();
        let mut alerts = MockAlertPresenter::new();
        alerts.expect_present().times(1).return_const(());
        let mut f = fixture(
            transport,
            alerts,
            json!({"reportQuarantineExit": false, "reportQuarantineLocation": false}),
        );

        let exit = f
            .coordinator
            .report_location(sample(300.0, 10.0, &f.clock))
            .await
            .unwrap();
        assert!(matches!(exit, ReportDecision::Exited { reported: false, .. }));

        f.clock.advance(Duration::minutes(6));
        let inside = f
            .coordinator
            .report_location(sample(10.0, 10.0, &f.clock))
            .await
            .unwrap();
        assert_eq!(inside, ReportDecision::NotLogged);
    }

    #[tokio::test]
    async fn test_poor_accuracy_widens_threshold() {
        let mut transport = MockReportTransport::new();
        transport.expect_upload_locations().returning(|_| Ok(()));
        let mut f = fixture(transport, no_alerts(), json!({}));

        // 150 m away but accuracy 80 m: threshold is 160 m.
        let decision = f
            .coordinator
            .report_location(sample(150.0, 80.0, &f.clock))
            .await
            .unwrap();
        assert!(matches!(decision, ReportDecision::Logged { .. }));
    }

    #[tokio::test]
    async fn test_report_exit_guards() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_send_area_exit()
            .times(1)
            .returning(|_| Err(TransportError::Rejected {
                endpoint: "profile/areaexit".into(),
                status: 500,
            }));
        let mut alerts = MockAlertPresenter::new();
        alerts.expect_present().times(1).return_const(());
        let mut f = fixture(transport, alerts, json!({}));

        assert!(!f.coordinator.report_exit(80.0).await.unwrap());
        assert!(f.coordinator.report_exit(180.0).await.unwrap());
        // Shares the decision rate limit.
        assert!(!f.coordinator.report_exit(500.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_presence_routes_exit() {
        let mut transport = MockReportTransport::new();
        transport.expect_send_area_exit().times(1).returning(|_| Ok(()));
        let mut alerts = MockAlertPresenter::new();
        alerts.expect_present().times(1).return_const(());
        let mut f = fixture(transport, alerts, json!({}));
        f.coordinator.resume().unwrap();

        assert!(!f
            .coordinator
            .verify_presence(sample(40.0, 5.0, &f.clock))
            .await
            .unwrap());
        assert!(f
            .coordinator
            .verify_presence(sample(400.0, 5.0, &f.clock))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_region_exit_uses_last_position() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_send_area_exit()
            .withf(|r| (299..=301).contains(&r.severity))
            .times(1)
            .returning(|_| Ok(()));
        let mut alerts = MockAlertPresenter::new();
        alerts.expect_present().times(1).return_const(());
        let mut f = fixture(transport, alerts, json!({"reportQuarantineLocation": false}));
        f.coordinator.resume().unwrap();

        // Inside decision consumes the rate limit window.
        f.coordinator
            .report_location(sample(10.0, 5.0, &f.clock))
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(10));
        f.coordinator.geofence.update_location(sample(300.0, 5.0, &f.clock));

        let alerted = f
            .coordinator
            .handle_region_event(RegionEvent::Exited(
                crate::geofence::QUARANTINE_REGION_ID.into(),
            ))
            .await
            .unwrap();
        assert!(alerted);
    }

    #[tokio::test]
    async fn test_start_and_end_quarantine() {
        let mut transport = MockReportTransport::new();
        transport.expect_upload_locations().times(1).returning(|_| Ok(()));
        let mut f = fixture(transport, no_alerts(), json!({}));
        let mut state = f.settings.load().unwrap();
        state.quarantine_active = false;
        state.quarantine_zone = None;
        f.settings.save(&state).unwrap();

        assert!(matches!(
            f.coordinator.end_quarantine().await,
            Err(HomeboundError::QuarantineInactive)
        ));

        let zone = QuarantineZone::new(CENTER, 120.0).unwrap();
        f.coordinator.start_quarantine(zone).unwrap();
        assert_eq!(f.settings.load().unwrap().active_zone(), Some(zone));
        assert!(f.coordinator.geofence.region().is_some());

        f.locations.append(&sample(5.0, 5.0, &f.clock)).unwrap();
        let flush = f.coordinator.end_quarantine().await.unwrap();
        assert_eq!(flush, FlushOutcome::Uploaded { records: 1 });

        let status = f.coordinator.status().unwrap();
        assert!(!status.quarantine_active);
        assert!(status.zone.is_none());
        assert_eq!(status.pending_locations, 0);
        assert!(f.coordinator.geofence.region().is_none());
    }

    fn sighting(profile: &str, at: chrono::DateTime<Utc>) -> Sighting {
        Sighting {
            peer: PeerHandle(uuid::Uuid::new_v4()),
            data: profile.as_bytes().to_vec(),
            beacon: None,
            rssi: -50,
            first_seen: at,
            seen_at: at,
        }
    }

    #[tokio::test]
    async fn test_contacts_are_deduplicated_on_upload() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_upload_contacts()
            .withf(|b| b.source_profile_id == 42 && b.connections.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let mut f = fixture(transport, no_alerts(), json!({}));
        let now = f.clock.now();

        let outcome = f
            .coordinator
            .record_sightings(&[
                sighting("7", now),
                sighting("7", now),
                sighting("8", now),
                sighting("opaque", now),
            ])
            .await
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Uploaded { records: 3 });
        assert_eq!(f.coordinator.status().unwrap().pending_connections, 0);

        // Inside the batch window nothing is sent.
        f.clock.advance(Duration::minutes(10));
        let later = f.clock.now();
        let outcome = f
            .coordinator
            .record_sightings(&[sighting("9", later)])
            .await
            .unwrap();
        assert_eq!(outcome, FlushOutcome::NotDue);
        assert_eq!(f.coordinator.status().unwrap().pending_connections, 1);
    }

    #[tokio::test]
    async fn test_contact_upload_failure_keeps_records() {
        let mut transport = MockReportTransport::new();
        transport
            .expect_upload_contacts()
            .times(2)
            .returning(|_| Err(TransportError::Request("offline".into())));
        let mut f = fixture(transport, no_alerts(), json!({}));
        let now = f.clock.now();

        f.coordinator
            .record_sightings(&[sighting("7", now)])
            .await
            .unwrap();
        let outcome = f.coordinator.flush_contacts(true).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Failed);
        assert_eq!(f.coordinator.status().unwrap().pending_connections, 1);
    }

    #[tokio::test]
    async fn test_failed_contact_batch_is_resent_on_next_flush() {
        let sent = Arc::new(std::sync::Mutex::new(Vec::<ContactBatch>::new()));
        let mut seq = mockall::Sequence::new();
        let mut transport = MockReportTransport::new();
        let rejected = sent.clone();
        transport
            .expect_upload_contacts()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |batch| {
                rejected.lock().unwrap().push(batch.clone());
                Err(TransportError::Rejected {
                    endpoint: "profile/contacts".into(),
                    status: 503,
                })
            });
        let accepted = sent.clone();
        transport
            .expect_upload_contacts()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |batch| {
                accepted.lock().unwrap().push(batch.clone());
                Ok(())
            });
        let mut f = fixture(transport, no_alerts(), json!({}));
        let now = f.clock.now();

        let outcome = f
            .coordinator
            .record_sightings(&[sighting("7", now), sighting("7", now), sighting("8", now)])
            .await
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Failed);
        assert_eq!(f.coordinator.status().unwrap().pending_connections, 3);
        assert!(f.settings.load().unwrap().last_connections_update.is_none());

        f.clock.advance(Duration::minutes(1));
        let outcome = f.coordinator.flush_contacts(false).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Uploaded { records: 3 });
        assert_eq!(f.coordinator.status().unwrap().pending_connections, 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].connections.len(), 2);
        assert_eq!(sent[0].connections, sent[1].connections);
    }

    #[tokio::test]
    async fn test_locations_left_by_end_quarantine_are_retried() {
        let mut seq = mockall::Sequence::new();
        let mut transport = MockReportTransport::new();
        transport
            .expect_upload_locations()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransportError::Request("offline".into())));
        transport
            .expect_upload_locations()
            .withf(|batch| batch.locations.len() == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut f = fixture(transport, no_alerts(), json!({}));

        f.locations.append(&sample(5.0, 5.0, &f.clock)).unwrap();
        let flush = f.coordinator.end_quarantine().await.unwrap();
        assert_eq!(flush, FlushOutcome::Failed);

        let status = f.coordinator.status().unwrap();
        assert!(!status.quarantine_active);
        assert_eq!(status.pending_locations, 1);

        let flush = f.coordinator.flush_pending_locations().await.unwrap();
        assert_eq!(flush, FlushOutcome::Uploaded { records: 1 });
        assert_eq!(f.coordinator.status().unwrap().pending_locations, 0);

        // The next retry waits for the batch window.
        f.locations.append(&sample(5.0, 5.0, &f.clock)).unwrap();
        let flush = f.coordinator.flush_pending_locations().await.unwrap();
        assert_eq!(flush, FlushOutcome::NotDue);
    }
}
