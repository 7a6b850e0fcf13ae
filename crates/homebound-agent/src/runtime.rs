//! Pipeline wiring.
//!
//! The agent owns one instance of every core component. Each component is
//! driven by its own task that drains the component's event channel; results
//! flow to the coordinator, which sits behind the shared state's mutex.
//!
//! ```text
//! location feed ──> sampler ──fixes──> coordinator <──sightings── scanner
//!                                         ^
//!                    region monitor ──────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use homebound_core::advertiser::{AdvertiserIdentity, ProximityAdvertiser};
use homebound_core::alert::{AlertPresenter, SharedPresence};
use homebound_core::clock::{Clock, SystemClock};
use homebound_core::coordinator::{Collaborators, ReportingCoordinator};
use homebound_core::geofence::GeofenceMonitor;
use homebound_core::location::LocationSample;
use homebound_core::outbox::Outbox;
use homebound_core::radio::{CentralEvent, CentralRadio, PeerHandle, PeripheralEvent, PeripheralRadio};
use homebound_core::remote::{RemoteConfig, RemoteSnapshot};
use homebound_core::sampler::{
    BackgroundExecution, LocationProvider, LocationSampler, SamplerEvent, SamplerOutput,
};
use homebound_core::scanner::{ProximityScanner, ScannerObserver, Sighting};
use homebound_core::settings::{FileSettingsStore, SettingsStore};
use homebound_core::transport::ReportTransport;
use homebound_core::{AgentConfig, DeviceIdentifier, HomeboundError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::http::HttpTransport;
use crate::platform::{
    LogAlertPresenter, ProcessBackground, ReplayLocationProvider, SoftwareRegionMonitor,
};
use crate::radio::{self, RadioChannels, RadioSenders};
use crate::state::{AppState, SharedState};

/// How often both outboxes are offered to the coordinator's flush window.
const FLUSH_PERIOD: Duration = Duration::from_secs(60);

/// Platform services the pipeline runs on.
pub struct Platform {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Persistent state.
    pub settings: Arc<dyn SettingsStore>,
    /// Remote flags.
    pub remote: RemoteConfig,
    /// Backend.
    pub transport: Arc<dyn ReportTransport>,
    /// Alert sink.
    pub alerts: Arc<dyn AlertPresenter>,
    /// Foreground/background flag.
    pub presence: Arc<SharedPresence>,
    /// Region monitoring evaluated against sampled fixes.
    pub regions: Arc<SoftwareRegionMonitor>,
    /// Advertising role.
    pub peripheral: Arc<dyn PeripheralRadio>,
    /// Scanning role.
    pub central: Arc<dyn CentralRadio>,
    /// Channels the radio roles report into.
    pub radio_events: RadioChannels,
    /// Background execution grants.
    pub background: Arc<dyn BackgroundExecution>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// The headless Linux platform: file-backed settings, HTTP backend,
    /// software region monitoring and the radio chosen in `[radio]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote snapshot cannot be read or the HTTP
    /// client cannot be built.
    pub async fn software(config: &AgentConfig) -> anyhow::Result<Self> {
        let remote = match &config.storage.remote_config {
            Some(path) => RemoteConfig::new(Arc::new(RemoteSnapshot::load(path)?)),
            None => RemoteConfig::default(),
        };
        let transport = HttpTransport::new(
            config.backend.api_host.clone(),
            Duration::from_secs(config.backend.timeout_secs),
            remote.clone(),
        )?;
        let radio_events = RadioChannels::default();
        let radios = radio::open(&config.radio, &radio_events).await;

        Ok(Self {
            clock: Arc::new(SystemClock),
            settings: Arc::new(FileSettingsStore::new(config.storage.settings_path())),
            remote,
            transport: Arc::new(transport),
            alerts: Arc::new(LogAlertPresenter::default()),
            presence: Arc::new(SharedPresence::default()),
            regions: Arc::new(SoftwareRegionMonitor::new(config.location.max_region_radius)),
            peripheral: radios.peripheral,
            central: radios.central,
            radio_events,
            background: Arc::new(ProcessBackground::default()),
        })
    }
}

/// Running pipeline.
#[derive(Debug)]
pub struct Pipeline {
    state: SharedState,
    sampler_events: UnboundedSender<SamplerEvent>,
    radio_events: RadioSenders,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Builds every component and spawns its task.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store, the data directory or the
    /// location feed cannot be used.
    pub fn start(config: AgentConfig, platform: Platform) -> Result<Self, HomeboundError> {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let identity = seed_identity(&config, platform.settings.as_ref())?;

        let deps = Collaborators {
            clock: platform.clock.clone(),
            settings: platform.settings.clone(),
            remote: platform.remote.clone(),
            transport: platform.transport.clone(),
            alerts: platform.alerts.clone(),
            presence: platform.presence.clone(),
        };
        let mut coordinator = ReportingCoordinator::new(
            deps,
            GeofenceMonitor::new(platform.regions.clone()),
            Outbox::new(config.storage.locations_path()),
            Outbox::new(config.storage.connections_path()),
        );
        coordinator.resume()?;

        let (sampler_tx, sampler_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (radio_tx, radio_rx) = platform.radio_events.split();

        let provider: Arc<dyn LocationProvider> = match &config.location.feed {
            Some(feed) => Arc::new(ReplayLocationProvider::from_file(
                feed,
                platform.clock.clone(),
                sampler_tx.clone(),
            )?),
            None => {
                warn!("no location feed configured, sampler will not receive fixes");
                Arc::new(ReplayLocationProvider::empty(
                    platform.clock.clone(),
                    sampler_tx.clone(),
                ))
            }
        };

        let sampler_config = config.sampler.to_sampler_config();
        let scanner_config = config.scanner.to_scanner_config();
        let scanner_enabled = config.scanner.enabled;
        let advertiser_enabled = config.advertiser.enabled;
        let state = AppState::new(config, platform.remote.clone(), coordinator);

        let mut sampler = LocationSampler::new(
            provider,
            platform.background.clone(),
            sampler_tx.clone(),
            output_tx,
        );
        sampler.start(sampler_config);

        let mut tasks = vec![
            tokio::spawn(run_sampler(sampler, sampler_rx, state.clone())),
            tokio::spawn(run_reports(output_rx, platform.regions.clone(), state.clone())),
            tokio::spawn(run_periodic_flush(state.clone())),
        ];

        if scanner_enabled {
            let (sightings_tx, sightings_rx) = mpsc::unbounded_channel();
            let mut scanner =
                ProximityScanner::new(platform.central.clone(), platform.clock.clone(), scanner_config);
            scanner.add_observer(Arc::new(SightingForwarder { tx: sightings_tx }));
            scanner.start();
            tasks.push(tokio::spawn(run_scanner(scanner, radio_rx.central, state.clone())));
            tasks.push(tokio::spawn(run_contacts(sightings_rx, state.clone())));
        }

        if advertiser_enabled {
            let mut advertiser = ProximityAdvertiser::new(platform.peripheral.clone(), &identity);
            advertiser.start();
            tasks.push(tokio::spawn(run_advertiser(
                advertiser,
                radio_rx.peripheral,
                state.clone(),
            )));
        }

        info!(
            scanner = scanner_enabled,
            advertiser = advertiser_enabled,
            "pipeline started"
        );
        Ok(Self {
            state,
            sampler_events: sampler_tx,
            radio_events: radio_tx,
            tasks,
        })
    }

    /// Shared state for the API.
    #[must_use]
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Feeds platform callbacks (fixes, lifecycle changes) to the sampler.
    #[must_use]
    pub fn sampler_events(&self) -> UnboundedSender<SamplerEvent> {
        self.sampler_events.clone()
    }

    /// Feeds radio callbacks to the scanner.
    #[must_use]
    pub fn central_events(&self) -> UnboundedSender<CentralEvent> {
        self.radio_events.central.clone()
    }

    /// Feeds radio callbacks to the advertiser.
    #[must_use]
    pub fn peripheral_events(&self) -> UnboundedSender<PeripheralEvent> {
        self.radio_events.peripheral.clone()
    }

    /// Stops every task. Uploads in flight are dropped with their task and
    /// retried from the outbox on the next start.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "pipeline task failed");
                }
            }
        }
        info!("pipeline stopped");
    }
}

/// Fills in the device identity on first start and returns what the
/// advertiser should broadcast.
fn seed_identity(
    config: &AgentConfig,
    settings: &dyn SettingsStore,
) -> Result<AdvertiserIdentity, HomeboundError> {
    let mut state = settings.load()?;
    let mut changed = false;
    if state.device_id.is_empty() {
        state.device_id = config
            .identity
            .device_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        changed = true;
    }
    if let Some(profile) = config.identity.profile_id {
        if state.profile_id != Some(DeviceIdentifier(profile)) {
            state.profile_id = Some(DeviceIdentifier(profile));
            changed = true;
        }
    }
    if changed {
        settings.save(&state)?;
        info!(device_id = %state.device_id, profile_id = ?state.profile_id, "device identity stored");
    }

    Ok(AdvertiserIdentity {
        identity: state
            .profile_id
            .map_or_else(|| state.device_id.clone(), |id| id.0.to_string()),
        profile_id: state.profile_id,
    })
}

/// Forwards scanner results to the contacts task.
struct SightingForwarder {
    tx: UnboundedSender<Sighting>,
}

impl ScannerObserver for SightingForwarder {
    fn on_sighting(&self, sighting: &Sighting) {
        if self.tx.send(sighting.clone()).is_err() {
            debug!("contacts task gone, sighting dropped");
        }
    }

    fn on_update(&self, peer: PeerHandle, rssi: i16) {
        debug!(%peer, rssi, "known peer seen again");
    }
}

async fn run_sampler(
    mut sampler: LocationSampler,
    mut events: UnboundedReceiver<SamplerEvent>,
    state: SharedState,
) {
    state.components.write().await.sampler = sampler.phase();
    while let Some(event) = events.recv().await {
        sampler.handle(event);
        state.components.write().await.sampler = sampler.phase();
    }
}

async fn run_reports(
    mut outputs: UnboundedReceiver<SamplerOutput>,
    regions: Arc<SoftwareRegionMonitor>,
    state: SharedState,
) {
    while let Some(output) = outputs.recv().await {
        match output {
            SamplerOutput::Fixes(fixes) => {
                if let Some(sample) = fixes.last().copied() {
                    process_fix(sample, &regions, &state).await;
                }
            }
            other => match other.error() {
                Some(error) => warn!(%error, code = error.error_code(), "location input unavailable"),
                None => info!(output = ?other, "location authorization changed"),
            },
        }
    }
}

/// Runs one accepted fix through every decision path. The coordinator's
/// shared rate limit keeps a single exit from alerting twice.
async fn process_fix(sample: LocationSample, regions: &SoftwareRegionMonitor, state: &SharedState) {
    let mut coordinator = state.coordinator.lock().await;

    match coordinator.report_location(sample).await {
        Ok(decision) => debug!(?decision, "location reported"),
        Err(e) => warn!(error = %e, "location report failed"),
    }

    for event in regions.observe(&sample) {
        if let Err(e) = coordinator.handle_region_event(event).await {
            warn!(error = %e, "region event failed");
        }
    }

    if let Err(e) = coordinator.verify_presence(sample).await {
        warn!(error = %e, "presence verification failed");
    }
}

async fn run_scanner(
    mut scanner: ProximityScanner,
    mut events: UnboundedReceiver<CentralEvent>,
    state: SharedState,
) {
    state.components.write().await.scanner = Some(scanner.state());
    while let Some(event) = events.recv().await {
        scanner.handle(event);
        state.components.write().await.scanner = Some(scanner.state());
    }
}

async fn run_advertiser(
    mut advertiser: ProximityAdvertiser,
    mut events: UnboundedReceiver<PeripheralEvent>,
    state: SharedState,
) {
    state.components.write().await.advertiser = Some(advertiser.state());
    while let Some(event) = events.recv().await {
        if let Some(response) = advertiser.handle(event) {
            debug!(?response, "answered characteristic read");
        }
        state.components.write().await.advertiser = Some(advertiser.state());
    }
}

async fn run_contacts(mut sightings: UnboundedReceiver<Sighting>, state: SharedState) {
    while let Some(first) = sightings.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = sightings.try_recv() {
            batch.push(next);
        }
        let mut coordinator = state.coordinator.lock().await;
        match coordinator.record_sightings(&batch).await {
            Ok(outcome) => debug!(count = batch.len(), ?outcome, "sightings recorded"),
            Err(e) => warn!(error = %e, "recording sightings failed"),
        }
    }
}

/// Offers both outboxes to their batch windows. Locations left behind by a
/// failed final flush go out here once the quarantine has ended.
async fn run_periodic_flush(state: SharedState) {
    let mut ticker = tokio::time::interval(FLUSH_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let mut coordinator = state.coordinator.lock().await;
        match coordinator.flush_contacts(false).await {
            Ok(outcome) => debug!(?outcome, "periodic contact flush"),
            Err(e) => warn!(error = %e, "periodic contact flush failed"),
        }
        match coordinator.flush_pending_locations().await {
            Ok(outcome) => debug!(?outcome, "periodic location flush"),
            Err(e) => warn!(error = %e, "periodic location flush failed"),
        }
    }
}
