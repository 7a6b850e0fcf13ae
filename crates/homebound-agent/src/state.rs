//! Application state shared across handlers and pipeline tasks.

use std::sync::Arc;

use homebound_core::{AgentConfig, ComponentStates, RemoteConfig, ReportingCoordinator, SamplerPhase};
use tokio::sync::{Mutex, RwLock};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// State owned by the running agent.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: AgentConfig,
    /// Remote flags, for request defaults.
    pub remote: RemoteConfig,
    /// The single consumer of report decisions.
    pub coordinator: Mutex<ReportingCoordinator>,
    /// Latest lifecycle of each pipeline component.
    pub components: RwLock<ComponentStates>,
}

impl AppState {
    /// Wraps a coordinator. Components start stopped.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        remote: RemoteConfig,
        coordinator: ReportingCoordinator,
    ) -> SharedState {
        Arc::new(Self {
            config,
            remote,
            coordinator: Mutex::new(coordinator),
            components: RwLock::new(ComponentStates {
                sampler: SamplerPhase::Stopped,
                scanner: None,
                advertiser: None,
            }),
        })
    }

    /// Snapshot of the component lifecycles.
    pub async fn components(&self) -> ComponentStates {
        *self.components.read().await
    }
}
