//! Shared fixtures for agent integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use homebound_agent::platform::{
    LogAlertPresenter, NullRadio, ProcessBackground, SoftwareRegionMonitor,
};
use homebound_agent::radio::RadioChannels;
use homebound_agent::runtime::{Pipeline, Platform};
use homebound_core::transport::{
    AreaExitReport, ContactBatch, LocationBatch, ReportTransport, TransportResult,
};
use homebound_core::{
    AgentConfig, AppPresence, ManualClock, MemorySettingsStore, PersistedState, RemoteConfig, SharedPresence,
};

/// Records every request instead of sending it.
#[derive(Default)]
pub struct RecordingBackend {
    pub exits: Mutex<Vec<AreaExitReport>>,
    pub locations: Mutex<Vec<LocationBatch>>,
    pub contacts: Mutex<Vec<ContactBatch>>,
}

#[async_trait]
impl ReportTransport for RecordingBackend {
    async fn send_area_exit(&self, report: &AreaExitReport) -> TransportResult<()> {
        self.exits.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn upload_locations(&self, batch: &LocationBatch) -> TransportResult<()> {
        self.locations.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn upload_contacts(&self, batch: &ContactBatch) -> TransportResult<()> {
        self.contacts.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub backend: Arc<RecordingBackend>,
    pub alerts: Arc<LogAlertPresenter>,
    pub settings: Arc<MemorySettingsStore>,
}

/// Starts a pipeline on software adapters with `state` pre-loaded.
pub fn start(data_dir: &Path, feed: Option<&Path>, state: PersistedState) -> Harness {
    let mut config = AgentConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.location.feed = feed.map(Path::to_path_buf);
    config.identity.profile_id = Some(7);

    let backend = Arc::new(RecordingBackend::default());
    let alerts = Arc::new(LogAlertPresenter::default());
    let settings = Arc::new(MemorySettingsStore::with_state(state));
    let platform = Platform {
        clock: Arc::new(ManualClock::new(Utc.timestamp_opt(1_584_403_200, 0).unwrap())),
        settings: settings.clone(),
        remote: RemoteConfig::default(),
        transport: backend.clone(),
        alerts: alerts.clone(),
        presence: Arc::new(SharedPresence::new(AppPresence::Foreground)),
        regions: Arc::new(SoftwareRegionMonitor::new(10_000.0)),
        peripheral: Arc::new(NullRadio),
        central: Arc::new(NullRadio),
        radio_events: RadioChannels::default(),
        background: Arc::new(ProcessBackground::default()),
    };

    let pipeline = Pipeline::start(config, platform).unwrap();
    Harness {
        pipeline,
        backend,
        alerts,
        settings,
    }
}
