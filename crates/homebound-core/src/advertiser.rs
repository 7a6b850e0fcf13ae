//! Proximity advertiser: broadcasts this device so peers can find it.
//!
//! State machine:
//!
//! ```text
//!            start() + radio off            radio on
//!   Idle ─────────────────────────► PoweringOn ─────────► Advertising
//!    ▲  start() + radio on                                   │
//!    ├───────────────────────────────────────────────────────┘ (direct)
//!    └──── stop() from any state / radio unauthorized
//! ```
//!
//! `start()` records the intent to advertise; it is a no-op while already
//! advertising. If the radio is not powered on yet, the advertiser waits in
//! `PoweringOn` and begins advertising when the power-on event arrives.
//! An unauthorized radio keeps the advertiser `Idle`; this is logged and is
//! never fatal to the rest of the pipeline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::beacon::{
    DeviceIdentifier, BEACON_REGION_UUID, BROADCAST_CHARACTERISTIC_UUID,
    IDENTITY_CHARACTERISTIC_UUID, TRANSFER_SERVICE_UUID,
};
use crate::error::HomeboundError;
use crate::radio::{
    AdvertisementData, Authorization, Characteristic, GattService, PeripheralEvent,
    PeripheralRadio, RadioState, ReadResponse,
};

/// Local name placed in every advertisement.
pub const ADVERTISER_NAME: &str = "homebound";

/// Advertiser lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiserState {
    /// Not advertising and not waiting to.
    Idle,
    /// Advertising was requested; waiting for the radio.
    PoweringOn,
    /// Advertising.
    Advertising,
}

/// What this device tells its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiserIdentity {
    /// Opaque identity string exposed through the identity characteristic.
    pub identity: String,
    /// Profile identifier, broadcast as a beacon pair when present.
    pub profile_id: Option<DeviceIdentifier>,
}

impl AdvertiserIdentity {
    /// Name exposed through the broadcast characteristic.
    #[must_use]
    pub fn broadcast_name(&self) -> String {
        match self.profile_id {
            Some(id) => {
                let beacon = id.beacon();
                format!("{ADVERTISER_NAME}-{:04x}{:04x}", beacon.major, beacon.minor)
            }
            None => ADVERTISER_NAME.to_string(),
        }
    }

    fn service(&self) -> GattService {
        GattService {
            uuid: TRANSFER_SERVICE_UUID,
            characteristics: vec![
                Characteristic {
                    uuid: IDENTITY_CHARACTERISTIC_UUID,
                    value: self.identity.as_bytes().to_vec(),
                },
                Characteristic {
                    uuid: BROADCAST_CHARACTERISTIC_UUID,
                    value: self.broadcast_name().into_bytes(),
                },
            ],
        }
    }

    fn advertisement(&self) -> AdvertisementData {
        AdvertisementData {
            local_name: ADVERTISER_NAME.to_string(),
            service_uuids: vec![TRANSFER_SERVICE_UUID],
            beacon: self
                .profile_id
                .map(|id| (BEACON_REGION_UUID, id.beacon())),
        }
    }
}

/// Broadcasts this device's identity over BLE.
pub struct ProximityAdvertiser {
    radio: Arc<dyn PeripheralRadio>,
    service: GattService,
    advertisement: AdvertisementData,
    state: AdvertiserState,
    started: bool,
    authorization: Authorization,
}

impl std::fmt::Debug for ProximityAdvertiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityAdvertiser")
            .field("state", &self.state)
            .field("started", &self.started)
            .field("authorization", &self.authorization)
            .finish_non_exhaustive()
    }
}

impl ProximityAdvertiser {
    /// Creates an idle advertiser for `identity`.
    pub fn new(radio: Arc<dyn PeripheralRadio>, identity: &AdvertiserIdentity) -> Self {
        Self {
            radio,
            service: identity.service(),
            advertisement: identity.advertisement(),
            state: AdvertiserState::Idle,
            started: false,
            authorization: Authorization::NotDetermined,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AdvertiserState {
        self.state
    }

    /// Returns `true` while advertising.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == AdvertiserState::Advertising
    }

    /// Requests advertising. Idempotent.
    pub fn start(&mut self) {
        self.started = true;
        self.advance(self.radio.state());
    }

    /// Stops advertising and forgets the request.
    pub fn stop(&mut self) {
        self.started = false;
        if self.state == AdvertiserState::Advertising {
            self.radio.stop_advertising();
            info!("advertising stopped");
        }
        self.state = AdvertiserState::Idle;
    }

    /// Applies a platform event. Read requests produce a response for the
    /// platform to send back.
    pub fn handle(&mut self, event: PeripheralEvent) -> Option<ReadResponse> {
        match event {
            PeripheralEvent::StateChanged(state) => {
                self.on_radio_state(state);
                None
            }
            PeripheralEvent::AuthorizationChanged(authorization) => {
                self.on_authorization(authorization);
                None
            }
            PeripheralEvent::AdvertisingStarted(result) => {
                match result {
                    Ok(()) => debug!("platform confirmed advertising"),
                    Err(reason) => {
                        let error = HomeboundError::RadioOperationFailed(reason);
                        warn!(%error, "platform failed to start advertising");
                        // The next power-on retries.
                        if self.state == AdvertiserState::Advertising {
                            self.state = AdvertiserState::PoweringOn;
                        }
                    }
                }
                None
            }
            PeripheralEvent::ReadRequest {
                characteristic,
                offset,
            } => Some(self.respond_to_read(characteristic, offset)),
        }
    }

    /// Answers a read of one of the published characteristics.
    #[must_use]
    pub fn respond_to_read(&self, characteristic: uuid::Uuid, offset: usize) -> ReadResponse {
        let Some(found) = self
            .service
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
        else {
            debug!(%characteristic, "read of unknown characteristic");
            return ReadResponse::AttributeNotFound;
        };

        match found.value.get(offset..) {
            Some(bytes) => ReadResponse::Value(bytes.to_vec()),
            None => ReadResponse::InvalidOffset,
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        match state {
            RadioState::PoweredOn => {
                info!("peripheral radio powered on");
                // Services do not survive a radio reset.
                self.radio.publish_service(&self.service);
                self.advance(state);
            }
            RadioState::Unauthorized | RadioState::Unsupported => {
                if let Some(error) = state.blocking_error() {
                    warn!(%error, code = error.error_code(), "advertising unavailable, staying idle");
                }
                self.state = AdvertiserState::Idle;
            }
            RadioState::PoweredOff | RadioState::Resetting | RadioState::Unknown => {
                debug!(?state, "peripheral radio not ready");
                if self.started {
                    self.state = AdvertiserState::PoweringOn;
                }
            }
        }
    }

    fn on_authorization(&mut self, authorization: Authorization) {
        self.authorization = authorization;
        match authorization {
            Authorization::Denied | Authorization::Restricted => {
                if self.state == AdvertiserState::Advertising {
                    self.radio.stop_advertising();
                }
                if let Some(error) = authorization.radio_error() {
                    warn!(%error, ?authorization, "advertiser idle");
                }
                self.state = AdvertiserState::Idle;
            }
            Authorization::Allowed | Authorization::NotDetermined => {
                self.advance(self.radio.state());
            }
        }
    }

    fn advance(&mut self, radio_state: RadioState) {
        if !self.started || self.state == AdvertiserState::Advertising {
            return;
        }
        if matches!(
            self.authorization,
            Authorization::Denied | Authorization::Restricted
        ) {
            return;
        }

        match radio_state {
            RadioState::PoweredOn => {
                self.radio.start_advertising(&self.advertisement);
                self.state = AdvertiserState::Advertising;
                info!(name = %self.advertisement.local_name, "advertising started");
            }
            RadioState::Unauthorized | RadioState::Unsupported => {
                if let Some(error) = radio_state.blocking_error() {
                    warn!(%error, code = error.error_code(), "cannot advertise");
                }
                self.state = AdvertiserState::Idle;
            }
            RadioState::PoweredOff | RadioState::Resetting | RadioState::Unknown => {
                self.state = AdvertiserState::PoweringOn;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRadio {
        state: Mutex<Option<RadioState>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeRadio {
        fn set_state(&self, state: RadioState) {
            *self.state.lock().unwrap() = Some(state);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PeripheralRadio for FakeRadio {
        fn state(&self) -> RadioState {
            self.state.lock().unwrap().unwrap_or(RadioState::Unknown)
        }

        fn publish_service(&self, _service: &GattService) {
            self.calls.lock().unwrap().push("publish");
        }

        fn start_advertising(&self, _data: &AdvertisementData) {
            self.calls.lock().unwrap().push("start");
        }

        fn stop_advertising(&self) {
            self.calls.lock().unwrap().push("stop");
        }
    }

    fn identity() -> AdvertiserIdentity {
        AdvertiserIdentity {
            identity: "device-abc".into(),
            profile_id: Some(DeviceIdentifier(0x0001_FFFE)),
        }
    }

    fn advertiser(radio: &Arc<FakeRadio>) -> ProximityAdvertiser {
        ProximityAdvertiser::new(radio.clone(), &identity())
    }

    #[test]
    fn test_start_with_radio_on_advertises() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);

        adv.start();
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        assert_eq!(radio.calls(), vec!["start"]);
    }

    #[test]
    fn test_start_is_idempotent() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);

        adv.start();
        adv.start();
        assert_eq!(radio.calls(), vec!["start"]);
    }

    #[test]
    fn test_start_while_powering_on_waits_for_radio() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOff);
        let mut adv = advertiser(&radio);

        adv.start();
        assert_eq!(adv.state(), AdvertiserState::PoweringOn);
        assert!(radio.calls().is_empty());

        radio.set_state(RadioState::PoweredOn);
        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        assert_eq!(radio.calls(), vec!["publish", "start"]);
    }

    #[test]
    fn test_power_on_without_start_only_publishes() {
        let radio = Arc::new(FakeRadio::default());
        let mut adv = advertiser(&radio);

        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(adv.state(), AdvertiserState::Idle);
        assert_eq!(radio.calls(), vec!["publish"]);
    }

    #[test]
    fn test_stop_from_any_state_is_idle() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOff);
        let mut adv = advertiser(&radio);
        adv.start();
        adv.stop();
        assert_eq!(adv.state(), AdvertiserState::Idle);

        radio.set_state(RadioState::PoweredOn);
        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(adv.state(), AdvertiserState::Idle);

        adv.start();
        adv.stop();
        assert_eq!(radio.calls(), vec!["publish", "start", "stop"]);
    }

    #[test]
    fn test_radio_off_while_advertising_waits_again() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);
        adv.start();

        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOff));
        assert_eq!(adv.state(), AdvertiserState::PoweringOn);

        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
    }

    #[test]
    fn test_failed_advertising_retries_on_next_power_on() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);
        adv.start();
        assert_eq!(adv.state(), AdvertiserState::Advertising);

        adv.handle(PeripheralEvent::AdvertisingStarted(Err("busy".into())));
        assert_eq!(adv.state(), AdvertiserState::PoweringOn);

        adv.handle(PeripheralEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        assert_eq!(radio.calls(), vec!["start", "publish", "start"]);
    }

    #[test]
    fn test_confirmed_advertising_keeps_state() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);
        adv.start();

        adv.handle(PeripheralEvent::AdvertisingStarted(Ok(())));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        assert_eq!(radio.calls(), vec!["start"]);
    }

    #[test]
    fn test_unauthorized_radio_stays_idle() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::Unauthorized);
        let mut adv = advertiser(&radio);

        adv.start();
        assert_eq!(adv.state(), AdvertiserState::Idle);
        adv.handle(PeripheralEvent::StateChanged(RadioState::Unauthorized));
        assert_eq!(adv.state(), AdvertiserState::Idle);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_authorization_granted_resumes() {
        let radio = Arc::new(FakeRadio::default());
        radio.set_state(RadioState::PoweredOn);
        let mut adv = advertiser(&radio);

        adv.handle(PeripheralEvent::AuthorizationChanged(Authorization::Denied));
        adv.start();
        assert_eq!(adv.state(), AdvertiserState::Idle);

        adv.handle(PeripheralEvent::AuthorizationChanged(Authorization::Allowed));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
    }

    #[test]
    fn test_read_requests() {
        let radio = Arc::new(FakeRadio::default());
        let mut adv = advertiser(&radio);

        let full = adv.handle(PeripheralEvent::ReadRequest {
            characteristic: IDENTITY_CHARACTERISTIC_UUID,
            offset: 0,
        });
        assert_eq!(full, Some(ReadResponse::Value(b"device-abc".to_vec())));

        let tail = adv.respond_to_read(IDENTITY_CHARACTERISTIC_UUID, 7);
        assert_eq!(tail, ReadResponse::Value(b"abc".to_vec()));

        let end = adv.respond_to_read(IDENTITY_CHARACTERISTIC_UUID, 10);
        assert_eq!(end, ReadResponse::Value(Vec::new()));

        let past = adv.respond_to_read(IDENTITY_CHARACTERISTIC_UUID, 11);
        assert_eq!(past, ReadResponse::InvalidOffset);

        let unknown = adv.respond_to_read(uuid::Uuid::nil(), 0);
        assert_eq!(unknown, ReadResponse::AttributeNotFound);
    }

    #[test]
    fn test_broadcast_name_derives_from_profile() {
        assert_eq!(identity().broadcast_name(), "homebound-0001fffe");
        let anonymous = AdvertiserIdentity {
            identity: String::new(),
            profile_id: None,
        };
        assert_eq!(anonymous.broadcast_name(), "homebound");
        assert!(anonymous.advertisement().beacon.is_none());
    }
}
