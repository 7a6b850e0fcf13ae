//! Radio backend selection.
//!
//! The advertiser and the scanner only see the core radio traits. This module
//! picks what sits behind them: [`NullRadio`] by default, or the BlueZ
//! adapter when the agent is built with the `bluetooth` feature and the
//! configuration asks for it.

use std::sync::Arc;

use homebound_core::radio::{CentralEvent, CentralRadio, PeerHandle, PeripheralEvent, PeripheralRadio};
use homebound_core::{BeaconId, RadioBackend, RadioSettings};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;
#[cfg(not(feature = "bluetooth"))]
use tracing::warn;
use uuid::Uuid;

use crate::platform::NullRadio;

/// Bluetooth SIG company identifier carried by iBeacon manufacturer data.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Measured power at one metre advertised in beacon frames, in dBm.
pub const BEACON_MEASURED_POWER: i8 = -59;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;

/// Event channels of both radio roles.
///
/// They exist before the radios so a backend can post into them from its
/// own tasks. The pipeline takes the receivers when it starts.
#[derive(Debug)]
pub struct RadioChannels {
    central_tx: UnboundedSender<CentralEvent>,
    central_rx: UnboundedReceiver<CentralEvent>,
    peripheral_tx: UnboundedSender<PeripheralEvent>,
    peripheral_rx: UnboundedReceiver<PeripheralEvent>,
}

impl Default for RadioChannels {
    fn default() -> Self {
        let (central_tx, central_rx) = mpsc::unbounded_channel();
        let (peripheral_tx, peripheral_rx) = mpsc::unbounded_channel();
        Self {
            central_tx,
            central_rx,
            peripheral_tx,
            peripheral_rx,
        }
    }
}

impl RadioChannels {
    /// Sender feeding the scanner.
    #[must_use]
    pub fn central_sender(&self) -> UnboundedSender<CentralEvent> {
        self.central_tx.clone()
    }

    /// Sender feeding the advertiser.
    #[must_use]
    pub fn peripheral_sender(&self) -> UnboundedSender<PeripheralEvent> {
        self.peripheral_tx.clone()
    }

    /// Splits into senders and receivers.
    #[must_use]
    pub fn split(self) -> (RadioSenders, RadioReceivers) {
        (
            RadioSenders {
                central: self.central_tx,
                peripheral: self.peripheral_tx,
            },
            RadioReceivers {
                central: self.central_rx,
                peripheral: self.peripheral_rx,
            },
        )
    }
}

/// Sending halves of [`RadioChannels`].
#[derive(Debug, Clone)]
pub struct RadioSenders {
    /// Scanner input.
    pub central: UnboundedSender<CentralEvent>,
    /// Advertiser input.
    pub peripheral: UnboundedSender<PeripheralEvent>,
}

/// Receiving halves of [`RadioChannels`].
#[derive(Debug)]
pub struct RadioReceivers {
    /// Scanner input.
    pub central: UnboundedReceiver<CentralEvent>,
    /// Advertiser input.
    pub peripheral: UnboundedReceiver<PeripheralEvent>,
}

/// The two radio roles handed to the pipeline.
pub struct Radios {
    /// Advertising role.
    pub peripheral: Arc<dyn PeripheralRadio>,
    /// Scanning role.
    pub central: Arc<dyn CentralRadio>,
}

impl std::fmt::Debug for Radios {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radios")
            .field("peripheral", &self.peripheral.state())
            .field("central", &self.central.state())
            .finish()
    }
}

impl Radios {
    /// Both roles on [`NullRadio`].
    #[must_use]
    pub fn none() -> Self {
        Self {
            peripheral: Arc::new(NullRadio),
            central: Arc::new(NullRadio),
        }
    }
}

/// Opens the configured backend. A backend that cannot be opened is logged
/// and replaced by [`NullRadio`], so the rest of the pipeline still runs.
pub async fn open(settings: &RadioSettings, channels: &RadioChannels) -> Radios {
    match settings.backend {
        RadioBackend::None => {
            info!("radio disabled, proximity roles report unsupported");
            Radios::none()
        }
        RadioBackend::Bluez => open_bluez(settings, channels).await,
    }
}

#[cfg(feature = "bluetooth")]
async fn open_bluez(settings: &RadioSettings, channels: &RadioChannels) -> Radios {
    match crate::bluez::BluezRadio::open(
        settings.adapter.as_deref(),
        channels.central_sender(),
        channels.peripheral_sender(),
    )
    .await
    {
        Ok(radio) => {
            let radio = Arc::new(radio);
            Radios {
                peripheral: radio.clone(),
                central: radio,
            }
        }
        Err(error) => {
            tracing::error!(%error, code = error.error_code(), "bluez adapter unavailable");
            Radios::none()
        }
    }
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn open_bluez(settings: &RadioSettings, _channels: &RadioChannels) -> Radios {
    warn!(
        adapter = ?settings.adapter,
        "bluez radio requested but the agent was built without the bluetooth feature"
    );
    Radios::none()
}

/// Peer handle for a 48-bit device address. The address sits in the low
/// bytes, so the mapping needs no table.
#[must_use]
pub fn peer_for_address(address: [u8; 6]) -> PeerHandle {
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&address);
    PeerHandle(Uuid::from_u64_pair(0, u64::from_be_bytes(bytes)))
}

/// Inverse of [`peer_for_address`]. `None` for handles it did not produce.
#[must_use]
pub fn address_for_peer(peer: PeerHandle) -> Option<[u8; 6]> {
    let (high, low) = peer.0.as_u64_pair();
    if high != 0 || low >> 48 != 0 {
        return None;
    }
    let bytes = low.to_be_bytes();
    let mut address = [0u8; 6];
    address.copy_from_slice(&bytes[2..]);
    Some(address)
}

/// iBeacon manufacturer payload (without the company id).
#[must_use]
pub fn beacon_payload(region: Uuid, beacon: BeaconId, measured_power: i8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(23);
    payload.push(IBEACON_TYPE);
    payload.push(IBEACON_LENGTH);
    payload.extend_from_slice(region.as_bytes());
    payload.extend_from_slice(&beacon.major.to_be_bytes());
    payload.extend_from_slice(&beacon.minor.to_be_bytes());
    payload.extend_from_slice(&measured_power.to_be_bytes());
    payload
}

/// Region UUID and pair from an iBeacon payload.
#[must_use]
pub fn parse_beacon(payload: &[u8]) -> Option<(Uuid, BeaconId)> {
    let [IBEACON_TYPE, IBEACON_LENGTH, rest @ ..] = payload else {
        return None;
    };
    if rest.len() != usize::from(IBEACON_LENGTH) {
        return None;
    }
    let region = Uuid::from_slice(&rest[..16]).ok()?;
    let beacon = BeaconId {
        major: u16::from_be_bytes([rest[16], rest[17]]),
        minor: u16::from_be_bytes([rest[18], rest[19]]),
    };
    Some((region, beacon))
}
