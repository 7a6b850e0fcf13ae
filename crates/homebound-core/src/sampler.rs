//! Duty-cycled location sampler.
//!
//! The sampler alternates between a short high-accuracy burst and a long
//! low-power pause:
//!
//! ```text
//! Stopped ─start─► Active ─first fix─► WaitingForFix ─settle, accurate─► Paused
//!                    ▲                     │  ▲                              │
//!                    │                     └──┘ settle, not accurate         │
//!                    └───────────────────── next cycle ◄──────────────────────┘
//! ```
//!
//! Timers are [`TimerSlot`]s that post [`SamplerEvent`]s into the sampler's
//! own channel; the owning task feeds those events back into
//! [`LocationSampler::handle`]. Accepted fixes and provider failures leave
//! through the output channel as [`SamplerOutput`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::HomeboundError;
use crate::location::LocationSample;
use crate::radio::Authorization;
use crate::timer::{TimerFired, TimerSlot};

/// Shortest allowed check interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(2);
/// Longest allowed check interval.
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(170);
/// Tightest accuracy target a caller may ask for, in metres.
pub const MIN_ACCEPTABLE_ACCURACY: f64 = 5.0;
/// How long fixes are collected before the best one is judged.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);
/// Delay between a new cycle starting and the background token check.
pub const RECONCILE_DELAY: Duration = Duration::from_secs(1);
/// Settle attempts per cycle before the cycle is abandoned.
pub const DEFAULT_MAX_SETTLE_RETRIES: u32 = 20;

/// Provider accuracy profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyMode {
    /// Nearest ten metres.
    High,
    /// Three kilometres; effectively idle.
    Low,
}

impl AccuracyMode {
    /// Desired accuracy in metres.
    #[must_use]
    pub const fn desired_accuracy(self) -> f64 {
        match self {
            Self::High => 10.0,
            Self::Low => 3_000.0,
        }
    }

    /// Minimum movement in metres before a new fix is delivered.
    #[must_use]
    pub const fn distance_filter(self) -> f64 {
        match self {
            Self::High => 10.0,
            Self::Low => 99_999.0,
        }
    }
}

/// Command half of the platform location service.
#[cfg_attr(test, mockall::automock)]
pub trait LocationProvider: Send + Sync {
    /// Applies an accuracy profile.
    fn set_accuracy(&self, mode: AccuracyMode);

    /// Starts continuous updates.
    fn start_updates(&self);

    /// Stops continuous updates.
    fn stop_updates(&self);

    /// Starts significant-change monitoring, where available.
    fn start_significant_changes(&self);

    /// Stops significant-change monitoring.
    fn stop_significant_changes(&self);

    /// Returns `true` while continuous updates are running.
    fn is_updating(&self) -> bool;
}

/// Opaque background-execution grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundToken(pub u64);

/// Lets work continue while the process is in the background.
///
/// Expiration of a token is delivered to the sampler as
/// [`SamplerEvent::BackgroundExpired`].
#[cfg_attr(test, mockall::automock)]
pub trait BackgroundExecution: Send + Sync {
    /// Requests a token. Returns `None` when the process is in the
    /// foreground or the platform refuses.
    fn begin(&self) -> Option<BackgroundToken>;

    /// Releases a token.
    fn end(&self, token: BackgroundToken);
}

/// Inputs to the sampler.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerEvent {
    /// Raw fixes from the provider, oldest first.
    Fixes(Vec<LocationSample>),
    /// The provider reported an error.
    ProviderFailed(String),
    /// Location authorization changed.
    AuthorizationChanged(Authorization),
    /// The settle timer fired.
    Settle(TimerFired),
    /// The next-cycle timer fired.
    NextCycle(TimerFired),
    /// The background token check is due.
    Reconcile(TimerFired),
    /// The platform is about to revoke a background token.
    BackgroundExpired(BackgroundToken),
    /// The process moved to the background.
    EnteredBackground,
    /// The process became active.
    BecameActive,
}

/// Outputs of the sampler.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerOutput {
    /// The fixes of a successful cycle, oldest first.
    Fixes(Vec<LocationSample>),
    /// The provider reported an error.
    Failed(String),
    /// Location authorization changed.
    AuthorizationChanged(Authorization),
}

impl SamplerOutput {
    /// The failure this output reports, if any.
    #[must_use]
    pub fn error(&self) -> Option<HomeboundError> {
        match self {
            Self::Fixes(_) => None,
            Self::Failed(reason) => Some(HomeboundError::LocationProviderFailed(reason.clone())),
            Self::AuthorizationChanged(authorization) => authorization.location_error(),
        }
    }
}

/// Where the sampler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplerPhase {
    /// Not running.
    Stopped,
    /// High accuracy, no fix yet this cycle.
    Active,
    /// Collecting fixes until the settle timer fires.
    WaitingForFix,
    /// Low accuracy until the next cycle.
    Paused,
}

/// Clamped sampler parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    check_interval: Duration,
    acceptable_accuracy: f64,
    max_settle_retries: u32,
}

impl SamplerConfig {
    /// Clamps `check_interval` to [2 s, 170 s] and floors
    /// `acceptable_accuracy` at 5 m.
    #[must_use]
    pub fn new(check_interval: Duration, acceptable_accuracy: f64, max_settle_retries: u32) -> Self {
        let acceptable_accuracy = if acceptable_accuracy.is_nan() {
            MIN_ACCEPTABLE_ACCURACY
        } else {
            acceptable_accuracy.max(MIN_ACCEPTABLE_ACCURACY)
        };
        Self {
            check_interval: check_interval.clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL),
            acceptable_accuracy,
            max_settle_retries,
        }
    }

    /// Time between the end of one cycle and the start of the next.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Worst accuracy accepted, in metres.
    #[must_use]
    pub const fn acceptable_accuracy(&self) -> f64 {
        self.acceptable_accuracy
    }

    /// Settle attempts per cycle.
    #[must_use]
    pub const fn max_settle_retries(&self) -> u32 {
        self.max_settle_retries
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 100.0, DEFAULT_MAX_SETTLE_RETRIES)
    }
}

/// Duty-cycled location fix loop.
pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    background: Arc<dyn BackgroundExecution>,
    events: UnboundedSender<SamplerEvent>,
    output: UnboundedSender<SamplerOutput>,
    config: SamplerConfig,
    phase: SamplerPhase,
    buffer: Vec<LocationSample>,
    settle_attempts: u32,
    token: Option<BackgroundToken>,
    settle: TimerSlot,
    cycle: TimerSlot,
    reconcile: TimerSlot,
}

impl std::fmt::Debug for LocationSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationSampler")
            .field("phase", &self.phase)
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl LocationSampler {
    /// Creates a stopped sampler.
    ///
    /// `events` must feed back into [`handle`](Self::handle); `output`
    /// receives accepted fixes.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        background: Arc<dyn BackgroundExecution>,
        events: UnboundedSender<SamplerEvent>,
        output: UnboundedSender<SamplerOutput>,
    ) -> Self {
        Self {
            provider,
            background,
            events,
            output,
            config: SamplerConfig::default(),
            phase: SamplerPhase::Stopped,
            buffer: Vec::new(),
            settle_attempts: 0,
            token: None,
            settle: TimerSlot::new(),
            cycle: TimerSlot::new(),
            reconcile: TimerSlot::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SamplerPhase {
        self.phase
    }

    /// Returns `true` between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase != SamplerPhase::Stopped
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Starts a fresh cycle, stopping a running one first.
    pub fn start(&mut self, config: SamplerConfig) {
        if self.is_running() {
            self.stop();
        }
        self.config = config;
        info!(
            interval_secs = config.check_interval.as_secs(),
            accuracy = config.acceptable_accuracy,
            "location sampling started"
        );
        self.begin_cycle();
    }

    /// Cancels every timer, releases the background token and halts the
    /// provider.
    pub fn stop(&mut self) {
        self.settle.cancel();
        self.cycle.cancel();
        self.reconcile.cancel();
        self.provider.stop_updates();
        self.provider.stop_significant_changes();
        self.release_token();
        self.buffer.clear();
        if self.phase != SamplerPhase::Stopped {
            info!("location sampling stopped");
        }
        self.phase = SamplerPhase::Stopped;
    }

    /// Applies one event.
    pub fn handle(&mut self, event: SamplerEvent) {
        match event {
            SamplerEvent::Fixes(fixes) => self.on_fixes(fixes),
            SamplerEvent::ProviderFailed(error) => {
                warn!(%error, "location provider failed");
                self.emit(SamplerOutput::Failed(error));
            }
            SamplerEvent::AuthorizationChanged(authorization) => {
                debug!(?authorization, "location authorization changed");
                self.emit(SamplerOutput::AuthorizationChanged(authorization));
            }
            SamplerEvent::Settle(fired) => {
                if self.settle.accept(fired) {
                    self.on_settle();
                }
            }
            SamplerEvent::NextCycle(fired) => {
                if self.cycle.accept(fired) {
                    self.on_next_cycle();
                }
            }
            SamplerEvent::Reconcile(fired) => {
                if self.reconcile.accept(fired) {
                    self.on_reconcile();
                }
            }
            SamplerEvent::BackgroundExpired(token) => self.on_background_expired(token),
            SamplerEvent::EnteredBackground => {
                if self.is_running() {
                    self.release_token();
                    self.acquire_token();
                }
            }
            SamplerEvent::BecameActive => self.release_token(),
        }
    }

    fn begin_cycle(&mut self) {
        self.provider.set_accuracy(AccuracyMode::High);
        self.provider.start_updates();
        self.provider.start_significant_changes();
        self.buffer.clear();
        self.settle_attempts = 0;
        self.phase = SamplerPhase::Active;
    }

    fn on_fixes(&mut self, fixes: Vec<LocationSample>) {
        if !matches!(self.phase, SamplerPhase::Active | SamplerPhase::WaitingForFix) {
            return;
        }
        if fixes.is_empty() {
            return;
        }
        self.buffer = fixes;
        if self.phase == SamplerPhase::Active {
            self.phase = SamplerPhase::WaitingForFix;
            self.arm_settle();
        }
    }

    fn on_settle(&mut self) {
        let latest = self.buffer.last().map(|fix| fix.accuracy);
        if latest.is_some_and(|accuracy| accuracy <= self.config.acceptable_accuracy) {
            self.pause();
            let fixes = std::mem::take(&mut self.buffer);
            debug!(count = fixes.len(), "cycle produced fixes");
            self.emit(SamplerOutput::Fixes(fixes));
            return;
        }

        self.settle_attempts += 1;
        if self.settle_attempts >= self.config.max_settle_retries {
            warn!(
                attempts = self.settle_attempts,
                best = ?latest,
                target = self.config.acceptable_accuracy,
                "no acceptable fix this cycle, skipping to next"
            );
            self.buffer.clear();
            self.pause();
            return;
        }
        self.arm_settle();
    }

    /// Switches to low power and schedules the next cycle.
    fn pause(&mut self) {
        self.acquire_token();
        self.cycle.arm(
            self.config.check_interval,
            self.events.clone(),
            SamplerEvent::NextCycle,
        );
        self.provider.set_accuracy(AccuracyMode::Low);
        self.phase = SamplerPhase::Paused;
    }

    fn on_next_cycle(&mut self) {
        self.begin_cycle();
        self.reconcile
            .arm(RECONCILE_DELAY, self.events.clone(), SamplerEvent::Reconcile);
    }

    fn on_reconcile(&mut self) {
        if self.provider.is_updating() {
            self.release_token();
        } else {
            self.release_token();
            self.acquire_token();
        }
    }

    fn on_background_expired(&mut self, token: BackgroundToken) {
        if self.token != Some(token) {
            return;
        }
        self.background.end(token);
        self.token = None;
        if self.is_running() {
            debug!("background time expired, restarting cycle");
            self.settle.cancel();
            self.cycle.cancel();
            self.on_next_cycle();
        }
    }

    fn arm_settle(&mut self) {
        self.settle
            .arm(SETTLE_DELAY, self.events.clone(), SamplerEvent::Settle);
    }

    fn acquire_token(&mut self) {
        if self.token.is_none() {
            self.token = self.background.begin();
        }
    }

    fn release_token(&mut self) {
        if let Some(token) = self.token.take() {
            self.background.end(token);
        }
    }

    fn emit(&self, output: SamplerOutput) {
        if self.output.send(output).is_err() {
            debug!("sampler output receiver closed");
        }
    }
}
