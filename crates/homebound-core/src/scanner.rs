//! Proximity scanner: finds peers advertising the transfer service and reads
//! their identity.
//!
//! Per peer the scanner walks a one-shot pipeline:
//!
//! ```text
//! Discovered ─► connect ─► discover service ─► discover characteristic
//!            ─► read identity ─► notify observers ─► disconnect
//! ```
//!
//! Any failure along the way is logged, the connection is cancelled and the
//! peer handle is forgotten so it can be rediscovered. A peer that completed
//! the pipeline is remembered for the dedup window; discoveries within that
//! window only produce an RSSI update.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::beacon::{BeaconId, DeviceIdentifier, IDENTITY_CHARACTERISTIC_UUID, TRANSFER_SERVICE_UUID};
use crate::clock::Clock;
use crate::error::HomeboundError;
use crate::radio::{Authorization, CentralEvent, CentralRadio, PeerHandle, RadioState};

/// Default signal-strength window, in dBm.
pub const DEFAULT_RSSI_WINDOW: RangeInclusive<i16> = -90..=0;

/// Default dedup window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Scanner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScannerState {
    /// Not scanning.
    Stopped,
    /// Scanning was requested; waiting for the radio.
    Starting,
    /// Scanning.
    Scanning,
}

/// Scanner tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Only connect to peers whose RSSI falls in this closed range.
    /// `None` disables the filter.
    pub rssi_window: Option<RangeInclusive<i16>>,
    /// How long a read peer is remembered.
    pub dedup_window: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rssi_window: Some(DEFAULT_RSSI_WINDOW),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// A peer whose identity characteristic was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Platform handle.
    pub peer: PeerHandle,
    /// Raw identity characteristic value.
    pub data: Vec<u8>,
    /// Beacon pair from the advertisement, if any.
    pub beacon: Option<BeaconId>,
    /// Signal strength at discovery.
    pub rssi: i16,
    /// When the peer was first discovered.
    pub first_seen: DateTime<Utc>,
    /// When the identity was read.
    pub seen_at: DateTime<Utc>,
}

impl Sighting {
    /// Profile of the peer: the advertised beacon pair, else the identity
    /// value when it is a decimal number.
    #[must_use]
    pub fn profile_id(&self) -> Option<DeviceIdentifier> {
        if let Some(beacon) = self.beacon {
            return Some(DeviceIdentifier(beacon.id()));
        }
        std::str::from_utf8(&self.data)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(DeviceIdentifier)
    }
}

/// Receives scanner results.
#[cfg_attr(test, mockall::automock)]
pub trait ScannerObserver: Send + Sync {
    /// A peer identity was read.
    fn on_sighting(&self, sighting: &Sighting);

    /// A remembered peer was seen again.
    fn on_update(&self, peer: PeerHandle, rssi: i16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Reading,
    Read,
}

#[derive(Debug, Clone)]
struct PeerEntry {
    phase: Phase,
    rssi: i16,
    beacon: Option<BeaconId>,
    first_seen: DateTime<Utc>,
}

/// Scans for peers and reads their identity.
pub struct ProximityScanner {
    radio: Arc<dyn CentralRadio>,
    clock: Arc<dyn Clock>,
    config: ScannerConfig,
    observers: Vec<Arc<dyn ScannerObserver>>,
    state: ScannerState,
    desired: bool,
    authorization: Authorization,
    peers: HashMap<PeerHandle, PeerEntry>,
}

impl std::fmt::Debug for ProximityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityScanner")
            .field("state", &self.state)
            .field("desired", &self.desired)
            .field("authorization", &self.authorization)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl ProximityScanner {
    /// Creates a stopped scanner.
    pub fn new(radio: Arc<dyn CentralRadio>, clock: Arc<dyn Clock>, config: ScannerConfig) -> Self {
        Self {
            radio,
            clock,
            config,
            observers: Vec::new(),
            state: ScannerState::Stopped,
            desired: false,
            authorization: Authorization::NotDetermined,
            peers: HashMap::new(),
        }
    }

    /// Registers an observer. Observers are called in registration order.
    pub fn add_observer(&mut self, observer: Arc<dyn ScannerObserver>) {
        self.observers.push(observer);
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ScannerState {
        self.state
    }

    /// Number of peers currently tracked.
    #[must_use]
    pub fn tracked_peers(&self) -> usize {
        self.peers.len()
    }

    /// Requests scanning.
    pub fn start(&mut self) {
        self.desired = true;
        self.advance(self.radio.state());
    }

    /// Stops scanning and cancels every pending peer connection.
    pub fn stop(&mut self) {
        self.desired = false;
        self.halt();
    }

    /// Applies a platform event.
    pub fn handle(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::StateChanged(state) => self.on_radio_state(state),
            CentralEvent::AuthorizationChanged(authorization) => {
                self.on_authorization(authorization);
            }
            CentralEvent::Discovered {
                peer,
                rssi,
                local_name,
                beacon,
            } => self.on_discovered(peer, rssi, local_name.as_deref(), beacon),
            CentralEvent::Connected(peer) => self.on_connected(peer),
            CentralEvent::ConnectFailed { peer, error } => {
                let error = HomeboundError::RadioOperationFailed(error);
                warn!(%peer, %error, "peer connection failed");
                self.peers.remove(&peer);
            }
            CentralEvent::Disconnected { peer, error } => self.on_disconnected(peer, error),
            CentralEvent::ServicesDiscovered { peer, result } => {
                self.on_services(peer, result);
            }
            CentralEvent::CharacteristicsDiscovered {
                peer,
                service,
                result,
            } => self.on_characteristics(peer, service, result),
            CentralEvent::ValueRead {
                peer,
                characteristic,
                result,
            } => self.on_value(peer, characteristic, result),
        }
    }

    fn advance(&mut self, radio_state: RadioState) {
        if !self.desired || self.state == ScannerState::Scanning {
            return;
        }
        if matches!(
            self.authorization,
            Authorization::Denied | Authorization::Restricted
        ) {
            self.state = ScannerState::Stopped;
            return;
        }

        match radio_state {
            RadioState::PoweredOn => {
                self.radio.start_scan(&[TRANSFER_SERVICE_UUID]);
                self.state = ScannerState::Scanning;
                info!("scanning for peers");
            }
            RadioState::Unauthorized | RadioState::Unsupported => {
                if let Some(error) = radio_state.blocking_error() {
                    warn!(%error, code = error.error_code(), "cannot scan");
                }
                self.state = ScannerState::Stopped;
            }
            RadioState::PoweredOff | RadioState::Resetting | RadioState::Unknown => {
                self.state = ScannerState::Starting;
            }
        }
    }

    fn halt(&mut self) {
        if self.state == ScannerState::Scanning {
            self.radio.stop_scan();
            info!("scanning stopped");
        }
        for (peer, entry) in self.peers.drain() {
            if entry.phase != Phase::Read {
                self.radio.disconnect(peer);
            }
        }
        self.state = ScannerState::Stopped;
    }

    fn on_radio_state(&mut self, state: RadioState) {
        match state {
            RadioState::PoweredOn => {
                debug!("central radio powered on");
                self.advance(state);
            }
            RadioState::Unauthorized | RadioState::Unsupported => {
                if let Some(error) = state.blocking_error() {
                    warn!(%error, code = error.error_code(), "scanner halted");
                }
                self.peers.clear();
                self.state = ScannerState::Stopped;
            }
            RadioState::PoweredOff | RadioState::Resetting | RadioState::Unknown => {
                // Connections do not survive the radio going down.
                self.peers.clear();
                self.state = if self.desired {
                    ScannerState::Starting
                } else {
                    ScannerState::Stopped
                };
            }
        }
    }

    fn on_authorization(&mut self, authorization: Authorization) {
        self.authorization = authorization;
        match authorization {
            Authorization::Denied | Authorization::Restricted => {
                if let Some(error) = authorization.radio_error() {
                    warn!(%error, ?authorization, "scanner halted");
                }
                self.halt();
            }
            Authorization::Allowed | Authorization::NotDetermined => {
                self.advance(self.radio.state());
            }
        }
    }

    fn on_discovered(
        &mut self,
        peer: PeerHandle,
        rssi: i16,
        local_name: Option<&str>,
        beacon: Option<BeaconId>,
    ) {
        if self.state != ScannerState::Scanning {
            return;
        }
        let now = self.clock.now();
        self.prune(now);

        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.rssi = rssi;
            for observer in &self.observers {
                observer.on_update(peer, rssi);
            }
            return;
        }

        if let Some(window) = &self.config.rssi_window {
            if !window.contains(&rssi) {
                debug!(%peer, rssi, "peer outside RSSI window");
                return;
            }
        }

        debug!(%peer, rssi, name = local_name.unwrap_or_default(), "connecting to peer");
        self.peers.insert(
            peer,
            PeerEntry {
                phase: Phase::Connecting,
                rssi,
                beacon,
                first_seen: now,
            },
        );
        self.radio.connect(peer);
    }

    /// Forgets peers whose entry is older than the dedup window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.config.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let radio = &self.radio;
        self.peers.retain(|peer, entry| {
            let fresh = now - entry.first_seen < window;
            if !fresh && entry.phase != Phase::Read {
                radio.disconnect(*peer);
            }
            fresh
        });
    }

    fn on_connected(&mut self, peer: PeerHandle) {
        let Some(entry) = self.peers.get_mut(&peer) else {
            debug!(%peer, "connected to untracked peer");
            self.radio.disconnect(peer);
            return;
        };
        entry.phase = Phase::DiscoveringServices;
        self.radio.discover_services(peer, &[TRANSFER_SERVICE_UUID]);
    }

    fn on_disconnected(&mut self, peer: PeerHandle, error: Option<String>) {
        match self.peers.get(&peer).map(|entry| entry.phase) {
            // We hung up after reading; keep it for dedup.
            Some(Phase::Read) => {}
            Some(_) => {
                if let Some(error) = error {
                    warn!(%peer, %error, "peer disconnected");
                } else {
                    debug!(%peer, "peer disconnected");
                }
                self.peers.remove(&peer);
            }
            None => {}
        }
    }

    fn on_services(&mut self, peer: PeerHandle, result: Result<Vec<uuid::Uuid>, String>) {
        if !self.in_phase(peer, Phase::DiscoveringServices) {
            return;
        }
        match result {
            Ok(services) if services.contains(&TRANSFER_SERVICE_UUID) => {
                self.set_phase(peer, Phase::DiscoveringCharacteristics);
                self.radio.discover_characteristics(
                    peer,
                    TRANSFER_SERVICE_UUID,
                    &[IDENTITY_CHARACTERISTIC_UUID],
                );
            }
            Ok(_) => self.drop_peer(peer, "transfer service missing"),
            Err(error) => self.drop_peer(peer, &error),
        }
    }

    fn on_characteristics(
        &mut self,
        peer: PeerHandle,
        service: uuid::Uuid,
        result: Result<Vec<uuid::Uuid>, String>,
    ) {
        if !self.in_phase(peer, Phase::DiscoveringCharacteristics) || service != TRANSFER_SERVICE_UUID {
            return;
        }
        match result {
            Ok(characteristics) if characteristics.contains(&IDENTITY_CHARACTERISTIC_UUID) => {
                self.set_phase(peer, Phase::Reading);
                self.radio
                    .read_value(peer, TRANSFER_SERVICE_UUID, IDENTITY_CHARACTERISTIC_UUID);
            }
            Ok(_) => self.drop_peer(peer, "identity characteristic missing"),
            Err(error) => self.drop_peer(peer, &error),
        }
    }

    fn on_value(
        &mut self,
        peer: PeerHandle,
        characteristic: uuid::Uuid,
        result: Result<Vec<u8>, String>,
    ) {
        if !self.in_phase(peer, Phase::Reading) || characteristic != IDENTITY_CHARACTERISTIC_UUID {
            return;
        }
        let data = match result {
            Ok(data) => data,
            Err(error) => {
                self.drop_peer(peer, &error);
                return;
            }
        };

        let now = self.clock.now();
        let Some(entry) = self.peers.get_mut(&peer) else {
            return;
        };
        entry.phase = Phase::Read;

        let sighting = Sighting {
            peer,
            data,
            beacon: entry.beacon,
            rssi: entry.rssi,
            first_seen: entry.first_seen,
            seen_at: now,
        };
        info!(%peer, rssi = sighting.rssi, profile = ?sighting.profile_id(), "peer identified");
        for observer in &self.observers {
            observer.on_sighting(&sighting);
        }
        self.radio.disconnect(peer);
    }

    fn in_phase(&self, peer: PeerHandle, phase: Phase) -> bool {
        self.peers.get(&peer).is_some_and(|entry| entry.phase == phase)
    }

    fn set_phase(&mut self, peer: PeerHandle, phase: Phase) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.phase = phase;
        }
    }

    fn drop_peer(&mut self, peer: PeerHandle, reason: &str) {
        warn!(%peer, reason, "dropping peer");
        self.peers.remove(&peer);
        self.radio.disconnect(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(PeerHandle),
        DiscoverServices(PeerHandle),
        DiscoverCharacteristics(PeerHandle),
        Read(PeerHandle),
        Disconnect(PeerHandle),
    }

    struct FakeCentral {
        state: Mutex<RadioState>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeCentral {
        fn new(state: RadioState) -> Self {
            Self {
                state: Mutex::new(state),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn set_state(&self, state: RadioState) {
            *self.state.lock().unwrap() = state;
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl CentralRadio for FakeCentral {
        fn state(&self) -> RadioState {
            *self.state.lock().unwrap()
        }
        fn start_scan(&self, _services: &[Uuid]) {
            self.record(Call::StartScan);
        }
        fn stop_scan(&self) {
            self.record(Call::StopScan);
        }
        fn is_scanning(&self) -> bool {
            self.calls.lock().unwrap().contains(&Call::StartScan)
        }
        fn connect(&self, peer: PeerHandle) {
            self.record(Call::Connect(peer));
        }
        fn discover_services(&self, peer: PeerHandle, _services: &[Uuid]) {
            self.record(Call::DiscoverServices(peer));
        }
        fn discover_characteristics(&self, peer: PeerHandle, _service: Uuid, _c: &[Uuid]) {
            self.record(Call::DiscoverCharacteristics(peer));
        }
        fn read_value(&self, peer: PeerHandle, _service: Uuid, _characteristic: Uuid) {
            self.record(Call::Read(peer));
        }
        fn disconnect(&self, peer: PeerHandle) {
            self.record(Call::Disconnect(peer));
        }
    }

    #[derive(Default)]
    struct Recorder {
        sightings: Mutex<Vec<Sighting>>,
        updates: Mutex<Vec<(PeerHandle, i16)>>,
    }

    impl ScannerObserver for Recorder {
        fn on_sighting(&self, sighting: &Sighting) {
            self.sightings.lock().unwrap().push(sighting.clone());
        }
        fn on_update(&self, peer: PeerHandle, rssi: i16) {
            self.updates.lock().unwrap().push((peer, rssi));
        }
    }

    struct Harness {
        radio: Arc<FakeCentral>,
        clock: Arc<ManualClock>,
        recorder: Arc<Recorder>,
        scanner: ProximityScanner,
    }

    fn harness(state: RadioState) -> Harness {
        let radio = Arc::new(FakeCentral::new(state));
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_000_000, 0).unwrap()));
        let recorder = Arc::new(Recorder::default());
        let mut scanner = ProximityScanner::new(radio.clone(), clock.clone(), ScannerConfig::default());
        scanner.add_observer(recorder.clone());
        Harness {
            radio,
            clock,
            recorder,
            scanner,
        }
    }

    fn peer(n: u128) -> PeerHandle {
        PeerHandle(Uuid::from_u128(n))
    }

    fn discovered(peer: PeerHandle, rssi: i16) -> CentralEvent {
        CentralEvent::Discovered {
            peer,
            rssi,
            local_name: Some("homebound".into()),
            beacon: None,
        }
    }

    fn read_identity(h: &mut Harness, p: PeerHandle, rssi: i16, data: &[u8]) {
        h.scanner.handle(discovered(p, rssi));
        h.scanner.handle(CentralEvent::Connected(p));
        h.scanner.handle(CentralEvent::ServicesDiscovered {
            peer: p,
            result: Ok(vec![TRANSFER_SERVICE_UUID]),
        });
        h.scanner.handle(CentralEvent::CharacteristicsDiscovered {
            peer: p,
            service: TRANSFER_SERVICE_UUID,
            result: Ok(vec![IDENTITY_CHARACTERISTIC_UUID]),
        });
        h.scanner.handle(CentralEvent::ValueRead {
            peer: p,
            characteristic: IDENTITY_CHARACTERISTIC_UUID,
            result: Ok(data.to_vec()),
        });
    }

    #[test]
    fn test_start_waits_for_power_on() {
        let mut h = harness(RadioState::PoweredOff);
        h.scanner.start();
        assert_eq!(h.scanner.state(), ScannerState::Starting);
        assert!(h.radio.take().is_empty());

        h.radio.set_state(RadioState::PoweredOn);
        h.scanner.handle(CentralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(h.scanner.state(), ScannerState::Scanning);
        assert_eq!(h.radio.take(), vec![Call::StartScan]);
    }

    #[test]
    fn test_full_pipeline_emits_sighting_and_disconnects() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        h.radio.take();

        let p = peer(1);
        read_identity(&mut h, p, -60, b"65534");

        assert_eq!(
            h.radio.take(),
            vec![
                Call::Connect(p),
                Call::DiscoverServices(p),
                Call::DiscoverCharacteristics(p),
                Call::Read(p),
                Call::Disconnect(p),
            ]
        );
        let sightings = h.recorder.sightings.lock().unwrap().clone();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].rssi, -60);
        assert_eq!(sightings[0].profile_id(), Some(DeviceIdentifier(65_534)));
    }

    #[test]
    fn test_repeat_discovery_emits_update() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(2);
        read_identity(&mut h, p, -60, b"1");
        h.scanner.handle(CentralEvent::Disconnected { peer: p, error: None });
        h.radio.take();

        h.clock.advance(chrono::Duration::seconds(30));
        h.scanner.handle(discovered(p, -45));

        assert!(h.radio.take().is_empty());
        assert_eq!(h.recorder.updates.lock().unwrap().as_slice(), &[(p, -45)]);
        assert_eq!(h.recorder.sightings.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_peer_is_rediscovered() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(3);
        read_identity(&mut h, p, -60, b"1");
        h.radio.take();

        h.clock.advance(chrono::Duration::minutes(6));
        h.scanner.handle(discovered(p, -50));
        assert_eq!(h.radio.take(), vec![Call::Connect(p)]);
    }

    #[test]
    fn test_rssi_window_filters_weak_peers() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        h.radio.take();

        h.scanner.handle(discovered(peer(4), -95));
        h.scanner.handle(discovered(peer(5), 3));
        assert!(h.radio.take().is_empty());
        assert_eq!(h.scanner.tracked_peers(), 0);
    }

    #[test]
    fn test_rssi_filter_can_be_disabled() {
        let radio = Arc::new(FakeCentral::new(RadioState::PoweredOn));
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let config = ScannerConfig {
            rssi_window: None,
            ..ScannerConfig::default()
        };
        let mut scanner = ProximityScanner::new(radio.clone(), clock, config);
        scanner.start();
        radio.take();

        scanner.handle(discovered(peer(6), -120));
        assert_eq!(radio.take(), vec![Call::Connect(peer(6))]);
    }

    #[test]
    fn test_connect_failure_evicts_peer() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(7);
        h.scanner.handle(discovered(p, -70));
        h.scanner.handle(CentralEvent::ConnectFailed {
            peer: p,
            error: "timeout".into(),
        });
        assert_eq!(h.scanner.tracked_peers(), 0);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);

        h.radio.take();
        h.scanner.handle(discovered(p, -70));
        assert_eq!(h.radio.take(), vec![Call::Connect(p)]);
    }

    #[test]
    fn test_missing_characteristic_drops_peer() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(8);
        h.scanner.handle(discovered(p, -70));
        h.scanner.handle(CentralEvent::Connected(p));
        h.scanner.handle(CentralEvent::ServicesDiscovered {
            peer: p,
            result: Ok(vec![TRANSFER_SERVICE_UUID]),
        });
        h.scanner.handle(CentralEvent::CharacteristicsDiscovered {
            peer: p,
            service: TRANSFER_SERVICE_UUID,
            result: Ok(vec![]),
        });
        assert_eq!(h.scanner.tracked_peers(), 0);
        assert_eq!(h.radio.take().last(), Some(&Call::Disconnect(p)));
        assert!(h.recorder.sightings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_read_error_drops_peer() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(9);
        h.scanner.handle(discovered(p, -70));
        h.scanner.handle(CentralEvent::Connected(p));
        h.scanner.handle(CentralEvent::ServicesDiscovered {
            peer: p,
            result: Err("gatt error".into()),
        });
        assert_eq!(h.scanner.tracked_peers(), 0);
    }

    #[test]
    fn test_unsolicited_disconnect_evicts() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        let p = peer(10);
        h.scanner.handle(discovered(p, -70));
        h.scanner.handle(CentralEvent::Connected(p));
        h.scanner.handle(CentralEvent::Disconnected {
            peer: p,
            error: Some("link lost".into()),
        });
        assert_eq!(h.scanner.tracked_peers(), 0);
    }

    #[test]
    fn test_authorization_denied_halts_and_allowed_resumes() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        h.scanner.handle(discovered(peer(11), -70));
        h.radio.take();

        h.scanner
            .handle(CentralEvent::AuthorizationChanged(Authorization::Denied));
        assert_eq!(h.scanner.state(), ScannerState::Stopped);
        assert_eq!(
            h.radio.take(),
            vec![Call::StopScan, Call::Disconnect(peer(11))]
        );

        h.scanner.start();
        assert_eq!(h.scanner.state(), ScannerState::Stopped);

        h.scanner
            .handle(CentralEvent::AuthorizationChanged(Authorization::Allowed));
        assert_eq!(h.scanner.state(), ScannerState::Scanning);
        assert_eq!(h.radio.take(), vec![Call::StartScan]);
    }

    #[test]
    fn test_stop_clears_desired() {
        let mut h = harness(RadioState::PoweredOn);
        h.scanner.start();
        h.scanner.stop();
        assert_eq!(h.scanner.state(), ScannerState::Stopped);

        h.scanner.handle(CentralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(h.scanner.state(), ScannerState::Stopped);
    }

    #[test]
    fn test_discoveries_ignored_when_not_scanning() {
        let mut h = harness(RadioState::PoweredOff);
        h.scanner.start();
        h.scanner.handle(discovered(peer(12), -50));
        assert!(h.radio.take().is_empty());
    }

    #[test]
    fn test_observer_mock_receives_sighting() {
        let radio = Arc::new(FakeCentral::new(RadioState::PoweredOn));
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut observer = MockScannerObserver::new();
        observer
            .expect_on_sighting()
            .withf(|s| s.data == b"42")
            .times(1)
            .return_const(());
        let mut scanner = ProximityScanner::new(radio, clock.clone(), ScannerConfig::default());
        scanner.add_observer(Arc::new(observer));
        scanner.start();

        let mut h = Harness {
            radio: Arc::new(FakeCentral::new(RadioState::PoweredOn)),
            clock,
            recorder: Arc::new(Recorder::default()),
            scanner,
        };
        read_identity(&mut h, peer(13), -40, b"42");
    }

    #[test]
    fn test_profile_id_prefers_beacon() {
        let sighting = Sighting {
            peer: peer(1),
            data: b"not-a-number".to_vec(),
            beacon: Some(BeaconId::encode(0x0001_FFFE)),
            rssi: -40,
            first_seen: Utc.timestamp_opt(0, 0).unwrap(),
            seen_at: Utc.timestamp_opt(0, 0).unwrap(),
        };
        assert_eq!(sighting.profile_id(), Some(DeviceIdentifier(0x0001_FFFE)));

        let opaque = Sighting {
            beacon: None,
            ..sighting
        };
        assert_eq!(opaque.profile_id(), None);
    }
}
