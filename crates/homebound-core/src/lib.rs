//! # homebound-core
//!
//! Core pipeline for homebound: home-quarantine boundary monitoring and
//! anonymous proximity reporting.
//!
//! This crate provides:
//! - Adaptive, battery-aware location sampling
//! - A geofence around the quarantine zone with presence verification
//! - Short-range radio advertising and scanning of nearby devices
//! - A reporting coordinator that alerts on zone exits and batches location
//!   and contact records to the backend through durable outboxes
//!
//! ## Architecture
//!
//! Components are synchronous state machines. Platform services are reached
//! through command traits ([`LocationProvider`], [`RegionMonitor`],
//! [`PeripheralRadio`], [`CentralRadio`]) and platform callbacks come back as
//! events fed to each component's `handle` method. The backend is reached
//! through the async [`ReportTransport`].
//!
//! - [`sampler`] - Location sampling cycle with accuracy settling
//! - [`geofence`] - Quarantine region registration and exit distances
//! - [`advertiser`] - Identity service and beacon advertisement
//! - [`scanner`] - Peer discovery, identity reads and deduplication
//! - [`coordinator`] - Report decisions, alerts and uploads
//! - [`outbox`] - Append-only JSON Lines record queues
//! - [`config`] - Agent configuration loading, saving and validation
//! - [`remote`] - Remotely tunable flags with built-in defaults
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertiser;
pub mod alert;
pub mod beacon;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod coordinator;
pub mod error;
pub mod geofence;
pub mod location;
pub mod outbox;
pub mod radio;
pub mod remote;
pub mod sampler;
pub mod scanner;
pub mod settings;
pub mod timer;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use advertiser::{AdvertiserIdentity, AdvertiserState, ProximityAdvertiser};
pub use alert::{Alert, AlertPresenter, AppPresence, PresenceSource, SharedPresence};
pub use beacon::{BeaconId, DeviceIdentifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    default_config_path, default_data_dir, AgentConfig, ConfigError, ConfigResult, LoggingSettings,
    RadioBackend, RadioSettings,
};
pub use contacts::Connection;
pub use coordinator::{
    Collaborators, CoordinatorStatus, FlushOutcome, ReportDecision, ReportingCoordinator,
};
pub use error::{HomeboundError, Result};
pub use geofence::{CircularRegion, GeofenceMonitor, RegionEvent, RegionMonitor};
pub use location::{Coordinate, LocationSample, QuarantineZone};
pub use outbox::{Batch, Outbox, OutboxError};
pub use radio::{
    Authorization, CentralEvent, CentralRadio, PeerHandle, PeripheralEvent, PeripheralRadio,
    RadioState,
};
pub use remote::{RemoteConfig, RemoteConfigKey, RemoteSnapshot};
pub use sampler::{
    BackgroundExecution, BackgroundToken, LocationProvider, LocationSampler, SamplerConfig,
    SamplerEvent, SamplerOutput, SamplerPhase,
};
pub use scanner::{ProximityScanner, ScannerConfig, ScannerObserver, ScannerState, Sighting};
pub use settings::{FileSettingsStore, MemorySettingsStore, PersistedState, SettingsStore};
pub use transport::{ReportTransport, TransportError};
pub use types::{ComponentStates, HealthResponse, StatusResponse};
