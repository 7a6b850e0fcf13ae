//! User-facing alerts and the foreground/background state they depend on.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Whether the app is in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppPresence {
    /// Visible; alerts are shown as a modal dialog.
    Foreground,
    /// Backgrounded or inactive; alerts become local notifications.
    Background,
}

/// Reports the current [`AppPresence`].
pub trait PresenceSource: Send + Sync {
    /// Current presence.
    fn presence(&self) -> AppPresence;
}

/// Presence flag flipped by lifecycle callbacks.
#[derive(Debug)]
pub struct SharedPresence {
    foreground: AtomicBool,
}

impl SharedPresence {
    /// Creates a presence flag starting at `initial`.
    #[must_use]
    pub const fn new(initial: AppPresence) -> Self {
        Self {
            foreground: AtomicBool::new(matches!(initial, AppPresence::Foreground)),
        }
    }

    /// Records a lifecycle transition.
    pub fn set(&self, presence: AppPresence) {
        self.foreground
            .store(presence == AppPresence::Foreground, Ordering::Release);
    }
}

impl Default for SharedPresence {
    fn default() -> Self {
        Self::new(AppPresence::Background)
    }
}

impl PresenceSource for SharedPresence {
    fn presence(&self) -> AppPresence {
        if self.foreground.load(Ordering::Acquire) {
            AppPresence::Foreground
        } else {
            AppPresence::Background
        }
    }
}

/// Category used for quarantine notifications.
pub const QUARANTINE_CATEGORY: &str = "Quarantine";

/// An alert the coordinator wants the user to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Body text.
    pub message: String,
    /// Notification category/identifier.
    pub category: &'static str,
    /// How the alert should be delivered.
    pub presence: AppPresence,
}

/// Shows alerts: a modal dialog in the foreground, a local notification in
/// the background. Fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait AlertPresenter: Send + Sync {
    /// Presents `alert`.
    fn present(&self, alert: &Alert);
}
