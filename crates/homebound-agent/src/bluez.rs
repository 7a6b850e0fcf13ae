//! BlueZ radio over D-Bus.
//!
//! [`BluezRadio`] backs both radio roles with one adapter. Trait commands
//! return at once; each spawns a task on the runtime that opened the radio
//! and posts the outcome into the role's event channel, the same way the
//! platform stacks deliver callbacks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic as LocalCharacteristic, CharacteristicRead,
    ReqError, Service as LocalService,
};
use bluer::gatt::remote::Characteristic as RemoteCharacteristic;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
    ErrorKind,
};
use futures::{FutureExt, StreamExt};
use homebound_core::radio::{
    AdvertisementData, CentralEvent, CentralRadio, GattService, PeerHandle, PeripheralEvent,
    PeripheralRadio, RadioState,
};
use homebound_core::HomeboundError;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::radio::{
    address_for_peer, beacon_payload, parse_beacon, peer_for_address, APPLE_COMPANY_ID,
    BEACON_MEASURED_POWER,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const fn power_state(powered: bool) -> RadioState {
    if powered {
        RadioState::PoweredOn
    } else {
        RadioState::PoweredOff
    }
}

/// Maps a BlueZ failure onto the radio error it stands for.
pub fn radio_error(error: &bluer::Error) -> HomeboundError {
    match error.kind {
        ErrorKind::NotPermitted | ErrorKind::NotAuthorized => HomeboundError::RadioUnauthorized,
        ErrorKind::NotAvailable | ErrorKind::NotSupported => HomeboundError::RadioUnsupported,
        ErrorKind::NotReady => HomeboundError::RadioPoweredOff,
        _ => HomeboundError::RadioOperationFailed(error.to_string()),
    }
}

/// Both radio roles on one BlueZ adapter.
pub struct BluezRadio {
    adapter: Adapter,
    runtime: Handle,
    state: Arc<Mutex<RadioState>>,
    scanning: Arc<AtomicBool>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    power_task: JoinHandle<()>,
    advertisement: Arc<Mutex<Option<AdvertisementHandle>>>,
    applications: Arc<Mutex<HashMap<Uuid, ApplicationHandle>>>,
    central: UnboundedSender<CentralEvent>,
    peripheral: UnboundedSender<PeripheralEvent>,
}

impl std::fmt::Debug for BluezRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezRadio")
            .field("adapter", &self.adapter.name())
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl BluezRadio {
    /// Connects to `bluetoothd` and opens `adapter`, or the default adapter.
    ///
    /// Must be called inside a tokio runtime; later commands spawn onto it.
    ///
    /// # Errors
    ///
    /// Returns the radio error matching the D-Bus failure.
    pub async fn open(
        adapter: Option<&str>,
        central: UnboundedSender<CentralEvent>,
        peripheral: UnboundedSender<PeripheralEvent>,
    ) -> Result<Self, HomeboundError> {
        let session = bluer::Session::new().await.map_err(|e| radio_error(&e))?;
        let adapter = match adapter {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| radio_error(&e))?;
        let powered = adapter.is_powered().await.map_err(|e| radio_error(&e))?;
        info!(adapter = adapter.name(), powered, "bluez adapter opened");

        let runtime = Handle::current();
        let state = Arc::new(Mutex::new(power_state(powered)));
        let power_task = runtime.spawn(watch_power(
            adapter.clone(),
            state.clone(),
            central.clone(),
            peripheral.clone(),
        ));

        Ok(Self {
            adapter,
            runtime,
            state,
            scanning: Arc::new(AtomicBool::new(false)),
            scan_task: Mutex::new(None),
            power_task,
            advertisement: Arc::new(Mutex::new(None)),
            applications: Arc::new(Mutex::new(HashMap::new())),
            central,
            peripheral,
        })
    }

    fn current_state(&self) -> RadioState {
        *lock(&self.state)
    }

    /// Runs `command` against the device behind `peer` and posts its event.
    fn on_device<F, Fut>(&self, peer: PeerHandle, command: F)
    where
        F: FnOnce(bluer::Device) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CentralEvent> + Send + 'static,
    {
        let central = self.central.clone();
        let device = address_for_peer(peer)
            .map(|address| self.adapter.device(Address::new(address)))
            .transpose();
        self.runtime.spawn(async move {
            let event = match device {
                Ok(Some(device)) => command(device).await,
                Ok(None) => CentralEvent::ConnectFailed {
                    peer,
                    error: "unknown peer handle".to_string(),
                },
                Err(error) => CentralEvent::ConnectFailed {
                    peer,
                    error: error.to_string(),
                },
            };
            let _ = central.send(event);
        });
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        self.power_task.abort();
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
    }
}

async fn watch_power(
    adapter: Adapter,
    state: Arc<Mutex<RadioState>>,
    central: UnboundedSender<CentralEvent>,
    peripheral: UnboundedSender<PeripheralEvent>,
) {
    let events = match adapter.events().await {
        Ok(events) => events,
        Err(error) => {
            warn!(%error, "cannot watch adapter power, state stays fixed");
            return;
        }
    };
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            let next = power_state(powered);
            *lock(&state) = next;
            info!(powered, "adapter power changed");
            let _ = central.send(CentralEvent::StateChanged(next));
            let _ = peripheral.send(PeripheralEvent::StateChanged(next));
        }
    }
}

async fn scan(
    adapter: Adapter,
    services: HashSet<Uuid>,
    central: UnboundedSender<CentralEvent>,
) -> bluer::Result<()> {
    adapter
        .set_discovery_filter(DiscoveryFilter {
            uuids: services,
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;
    let events = adapter.discover_devices_with_changes().await?;
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        match discovered(&adapter, address).await {
            Ok(Some(event)) => {
                if central.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(error) => debug!(%address, %error, "discovered device vanished"),
        }
    }
    Ok(())
}

async fn discovered(adapter: &Adapter, address: Address) -> bluer::Result<Option<CentralEvent>> {
    let device = adapter.device(address)?;
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let local_name = device.name().await?;
    let beacon = device
        .manufacturer_data()
        .await?
        .and_then(|data| data.get(&APPLE_COMPANY_ID).and_then(|payload| parse_beacon(payload)))
        .map(|(_, beacon)| beacon);
    Ok(Some(CentralEvent::Discovered {
        peer: peer_for_address(address.0),
        rssi,
        local_name,
        beacon,
    }))
}

async fn remote_services(
    device: &bluer::Device,
    wanted: &[Uuid],
) -> bluer::Result<Vec<(Uuid, bluer::gatt::remote::Service)>> {
    let mut found = Vec::new();
    for service in device.services().await? {
        let uuid = service.uuid().await?;
        if wanted.is_empty() || wanted.contains(&uuid) {
            found.push((uuid, service));
        }
    }
    Ok(found)
}

async fn remote_characteristics(
    device: &bluer::Device,
    service: Uuid,
    wanted: &[Uuid],
) -> bluer::Result<Vec<(Uuid, RemoteCharacteristic)>> {
    let mut found = Vec::new();
    for (_, remote) in remote_services(device, &[service]).await? {
        for characteristic in remote.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if wanted.is_empty() || wanted.contains(&uuid) {
                found.push((uuid, characteristic));
            }
        }
    }
    Ok(found)
}

/// Bytes served for a read at `offset`.
fn read_at(value: &[u8], offset: u16) -> Result<Vec<u8>, ReqError> {
    value
        .get(usize::from(offset)..)
        .map(<[u8]>::to_vec)
        .ok_or(ReqError::InvalidOffset)
}

fn application(service: &GattService) -> Application {
    let characteristics = service
        .characteristics
        .iter()
        .map(|characteristic| {
            let value = Arc::new(characteristic.value.clone());
            LocalCharacteristic {
                uuid: characteristic.uuid,
                read: Some(CharacteristicRead {
                    read: true,
                    fun: Box::new(move |request| {
                        let value = value.clone();
                        async move { read_at(&value, request.offset) }.boxed()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect();
    Application {
        services: vec![LocalService {
            uuid: service.uuid,
            primary: true,
            characteristics,
            ..Default::default()
        }],
        ..Default::default()
    }
}

impl PeripheralRadio for BluezRadio {
    fn state(&self) -> RadioState {
        self.current_state()
    }

    fn publish_service(&self, service: &GattService) {
        let adapter = self.adapter.clone();
        let applications = self.applications.clone();
        let uuid = service.uuid;
        let app = application(service);
        self.runtime.spawn(async move {
            match adapter.serve_gatt_application(app).await {
                Ok(handle) => {
                    // Dropping the previous handle unregisters it.
                    lock(&applications).insert(uuid, handle);
                    info!(service = %uuid, "gatt service published");
                }
                Err(error) => {
                    let error = radio_error(&error);
                    warn!(service = %uuid, %error, code = error.error_code(), "gatt service not published");
                }
            }
        });
    }

    fn start_advertising(&self, data: &AdvertisementData) {
        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: data.service_uuids.iter().copied().collect(),
            manufacturer_data: data
                .beacon
                .map(|(region, beacon)| {
                    BTreeMap::from([(
                        APPLE_COMPANY_ID,
                        beacon_payload(region, beacon, BEACON_MEASURED_POWER),
                    )])
                })
                .unwrap_or_default(),
            local_name: Some(data.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };
        let adapter = self.adapter.clone();
        let slot = self.advertisement.clone();
        let peripheral = self.peripheral.clone();
        self.runtime.spawn(async move {
            let outcome = match adapter.advertise(advertisement).await {
                Ok(handle) => {
                    *lock(&slot) = Some(handle);
                    Ok(())
                }
                Err(error) => Err(error.to_string()),
            };
            let _ = peripheral.send(PeripheralEvent::AdvertisingStarted(outcome));
        });
    }

    fn stop_advertising(&self) {
        if lock(&self.advertisement).take().is_some() {
            debug!("advertising stopped");
        }
    }
}

impl CentralRadio for BluezRadio {
    fn state(&self) -> RadioState {
        self.current_state()
    }

    fn start_scan(&self, services: &[Uuid]) {
        let mut task = lock(&self.scan_task);
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let adapter = self.adapter.clone();
        let central = self.central.clone();
        let scanning = self.scanning.clone();
        let services: HashSet<Uuid> = services.iter().copied().collect();
        scanning.store(true, Ordering::SeqCst);
        *task = Some(self.runtime.spawn(async move {
            if let Err(error) = scan(adapter, services, central).await {
                let error = radio_error(&error);
                warn!(%error, code = error.error_code(), "scan stopped");
            }
            scanning.store(false, Ordering::SeqCst);
        }));
    }

    fn stop_scan(&self) {
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
        self.scanning.store(false, Ordering::SeqCst);
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn connect(&self, peer: PeerHandle) {
        self.on_device(peer, move |device| async move {
            match device.connect().await {
                Ok(()) => CentralEvent::Connected(peer),
                Err(error) => CentralEvent::ConnectFailed {
                    peer,
                    error: error.to_string(),
                },
            }
        });
    }

    fn discover_services(&self, peer: PeerHandle, services: &[Uuid]) {
        let wanted = services.to_vec();
        self.on_device(peer, move |device| async move {
            let result = remote_services(&device, &wanted)
                .await
                .map(|found| found.into_iter().map(|(uuid, _)| uuid).collect())
                .map_err(|e| e.to_string());
            CentralEvent::ServicesDiscovered { peer, result }
        });
    }

    fn discover_characteristics(&self, peer: PeerHandle, service: Uuid, characteristics: &[Uuid]) {
        let wanted = characteristics.to_vec();
        self.on_device(peer, move |device| async move {
            let result = remote_characteristics(&device, service, &wanted)
                .await
                .map(|found| found.into_iter().map(|(uuid, _)| uuid).collect())
                .map_err(|e| e.to_string());
            CentralEvent::CharacteristicsDiscovered {
                peer,
                service,
                result,
            }
        });
    }

    fn read_value(&self, peer: PeerHandle, service: Uuid, characteristic: Uuid) {
        self.on_device(peer, move |device| async move {
            let result = match remote_characteristics(&device, service, &[characteristic]).await {
                Ok(found) => match found.into_iter().next() {
                    Some((_, remote)) => remote.read().await.map_err(|e| e.to_string()),
                    None => Err(format!("characteristic {characteristic} not found")),
                },
                Err(error) => Err(error.to_string()),
            };
            CentralEvent::ValueRead {
                peer,
                characteristic,
                result,
            }
        });
    }

    fn disconnect(&self, peer: PeerHandle) {
        self.on_device(peer, move |device| async move {
            if let Err(error) = device.disconnect().await {
                debug!(%peer, %error, "disconnect failed");
            }
            CentralEvent::Disconnected { peer, error: None }
        });
    }
}
