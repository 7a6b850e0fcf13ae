//! Bluetooth LE radio seams shared by the advertiser and the scanner.
//!
//! Platform radios are command/callback APIs: a command returns immediately
//! and its outcome arrives later as an event. The traits here are the
//! command half; the event half is the [`PeripheralEvent`] and
//! [`CentralEvent`] enums, which a platform backend posts into the owning
//! component's channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::beacon::BeaconId;
use crate::error::HomeboundError;

/// Power/availability state reported by the platform radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    /// Not yet reported.
    Unknown,
    /// The radio stack is restarting.
    Resetting,
    /// No BLE radio on this device.
    Unsupported,
    /// The process may not use the radio.
    Unauthorized,
    /// The radio is off.
    PoweredOff,
    /// Ready for use.
    PoweredOn,
}

impl RadioState {
    /// The error that keeps a component off the radio in this state.
    /// `Unknown` and `Resetting` are transitional and carry none.
    #[must_use]
    pub const fn blocking_error(self) -> Option<HomeboundError> {
        match self {
            Self::Unsupported => Some(HomeboundError::RadioUnsupported),
            Self::Unauthorized => Some(HomeboundError::RadioUnauthorized),
            Self::PoweredOff => Some(HomeboundError::RadioPoweredOff),
            Self::Unknown | Self::Resetting | Self::PoweredOn => None,
        }
    }
}

/// Permission to use a platform service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// The user has not been asked yet.
    NotDetermined,
    /// Blocked by policy.
    Restricted,
    /// Refused by the user.
    Denied,
    /// Granted.
    Allowed,
}

impl Authorization {
    /// Returns `true` if the service may be used.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns `true` once the user or policy has refused access.
    #[must_use]
    pub const fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }

    /// The error reported when Bluetooth access is refused.
    #[must_use]
    pub const fn radio_error(self) -> Option<HomeboundError> {
        if self.is_refused() {
            Some(HomeboundError::RadioUnauthorized)
        } else {
            None
        }
    }

    /// The error reported when location access is refused.
    #[must_use]
    pub const fn location_error(self) -> Option<HomeboundError> {
        if self.is_refused() {
            Some(HomeboundError::LocationDenied)
        } else {
            None
        }
    }
}

/// Transient handle the platform assigns to a discovered peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerHandle(pub Uuid);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the advertiser broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    /// Local name included in the advertisement.
    pub local_name: String,
    /// Service UUIDs peers can filter on.
    pub service_uuids: Vec<Uuid>,
    /// Beacon region UUID and pair, when beacon advertising is enabled.
    pub beacon: Option<(Uuid, BeaconId)>,
}

/// A read-only characteristic published by the advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Static value returned to readers.
    pub value: Vec<u8>,
}

/// A primary GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Read-only characteristics.
    pub characteristics: Vec<Characteristic>,
}

/// Outcome of a characteristic read request against the advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResponse {
    /// The requested bytes.
    Value(Vec<u8>),
    /// The characteristic is not published by this device.
    AttributeNotFound,
    /// The offset lies past the end of the value.
    InvalidOffset,
}

/// Command half of the peripheral (advertising) role.
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralRadio: Send + Sync {
    /// Current radio state.
    fn state(&self) -> RadioState;

    /// Publishes a GATT service, replacing any previous one with the same UUID.
    fn publish_service(&self, service: &GattService);

    /// Begins advertising.
    fn start_advertising(&self, data: &AdvertisementData);

    /// Stops advertising.
    fn stop_advertising(&self);
}

/// Events delivered to the advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// The radio state changed.
    StateChanged(RadioState),
    /// Bluetooth authorization changed.
    AuthorizationChanged(Authorization),
    /// Advertising started (or failed to).
    AdvertisingStarted(Result<(), String>),
    /// A central asked to read a characteristic.
    ReadRequest {
        /// Characteristic being read.
        characteristic: Uuid,
        /// Byte offset into the value.
        offset: usize,
    },
}

/// Command half of the central (scanning) role.
#[cfg_attr(test, mockall::automock)]
pub trait CentralRadio: Send + Sync {
    /// Current radio state.
    fn state(&self) -> RadioState;

    /// Starts scanning for peripherals advertising any of `services`,
    /// reporting duplicates.
    fn start_scan(&self, services: &[Uuid]);

    /// Stops scanning.
    fn stop_scan(&self);

    /// Returns `true` while a scan is running.
    fn is_scanning(&self) -> bool;

    /// Connects to a discovered peripheral.
    fn connect(&self, peer: PeerHandle);

    /// Discovers `services` on a connected peripheral.
    fn discover_services(&self, peer: PeerHandle, services: &[Uuid]);

    /// Discovers `characteristics` within `service`.
    fn discover_characteristics(&self, peer: PeerHandle, service: Uuid, characteristics: &[Uuid]);

    /// Reads a characteristic value once.
    fn read_value(&self, peer: PeerHandle, service: Uuid, characteristic: Uuid);

    /// Cancels the connection (or pending connection) to `peer`.
    fn disconnect(&self, peer: PeerHandle);
}

/// Events delivered to the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    /// The radio state changed.
    StateChanged(RadioState),
    /// Bluetooth authorization changed.
    AuthorizationChanged(Authorization),
    /// A peripheral advertising a scanned service was seen.
    Discovered {
        /// Platform handle.
        peer: PeerHandle,
        /// Signal strength in dBm.
        rssi: i16,
        /// Advertised local name, if any.
        local_name: Option<String>,
        /// Beacon pair carried by the advertisement, if any.
        beacon: Option<BeaconId>,
    },
    /// A connection attempt succeeded.
    Connected(PeerHandle),
    /// A connection attempt failed.
    ConnectFailed {
        /// Platform handle.
        peer: PeerHandle,
        /// Platform error text.
        error: String,
    },
    /// A peripheral disconnected.
    Disconnected {
        /// Platform handle.
        peer: PeerHandle,
        /// Platform error text, if the disconnect was not requested.
        error: Option<String>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Platform handle.
        peer: PeerHandle,
        /// Discovered service UUIDs, or the platform error.
        result: Result<Vec<Uuid>, String>,
    },
    /// Characteristic discovery finished.
    CharacteristicsDiscovered {
        /// Platform handle.
        peer: PeerHandle,
        /// Service searched.
        service: Uuid,
        /// Discovered characteristic UUIDs, or the platform error.
        result: Result<Vec<Uuid>, String>,
    },
    /// A characteristic read finished.
    ValueRead {
        /// Platform handle.
        peer: PeerHandle,
        /// Characteristic read.
        characteristic: Uuid,
        /// Value, or the platform error.
        result: Result<Vec<u8>, String>,
    },
}
