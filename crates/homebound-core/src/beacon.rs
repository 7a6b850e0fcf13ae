//! Beacon identity encoding.
//!
//! A device's 32-bit profile identifier is split across the two 16-bit
//! fields of a beacon advertisement (`major` carries the high half, `minor`
//! the low half) so that peers can recover the identifier from a sighting.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::{uuid, Uuid};

/// Beacon region shared by every device running homebound.
pub const BEACON_REGION_UUID: Uuid = uuid!("fb4f89f2-4b6c-48c5-9cc1-e70a6ef5cfdb");

/// GATT service advertised by the proximity advertiser and scanned for by
/// the proximity scanner.
pub const TRANSFER_SERVICE_UUID: Uuid = uuid!("fb4f89f2-4b6c-48c5-9cc1-e70a6ef5cfdc");

/// Read-only characteristic holding this device's opaque identity string.
pub const IDENTITY_CHARACTERISTIC_UUID: Uuid = uuid!("fb4f89f2-4b6c-48c5-9cc1-e70a6ef5cfdd");

/// Read-only characteristic holding the derived broadcast name.
pub const BROADCAST_CHARACTERISTIC_UUID: Uuid = uuid!("fb4f89f2-4b6c-48c5-9cc1-e70a6ef5cfde");

/// Identifier assigned to a device/profile at registration.
///
/// Immutable once assigned and freely shared between the advertiser and the
/// scanner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct DeviceIdentifier(pub u32);

impl DeviceIdentifier {
    /// Returns the beacon pair that carries this identifier.
    #[must_use]
    pub const fn beacon(self) -> BeaconId {
        BeaconId::encode(self.0)
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceIdentifier {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A `(major, minor)` beacon pair derived from a [`DeviceIdentifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct BeaconId {
    /// High 16 bits of the identifier.
    pub major: u16,
    /// Low 16 bits of the identifier.
    pub minor: u16,
}

impl BeaconId {
    /// Splits a 32-bit identifier into its beacon pair.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn encode(id: u32) -> Self {
        Self {
            major: ((id >> 16) & 0xFFFF) as u16,
            minor: (id & 0xFFFF) as u16,
        }
    }

    /// Recomposes the identifier carried by a beacon pair.
    #[must_use]
    pub const fn decode(major: u16, minor: u16) -> u32 {
        ((major as u32) << 16) | minor as u32
    }

    /// The identifier carried by this pair.
    #[must_use]
    pub const fn id(self) -> u32 {
        Self::decode(self.major, self.minor)
    }

    /// Region identifier used when advertising this beacon.
    #[must_use]
    pub fn region_identifier(self) -> String {
        format!("beacon-{}-{}", self.major, self.minor)
    }
}

impl From<DeviceIdentifier> for BeaconId {
    fn from(id: DeviceIdentifier) -> Self {
        id.beacon()
    }
}

impl From<BeaconId> for DeviceIdentifier {
    fn from(beacon: BeaconId) -> Self {
        Self(beacon.id())
    }
}
