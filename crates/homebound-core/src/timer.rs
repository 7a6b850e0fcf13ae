//! Cancellable one-shot timers that deliver an event into a channel.
//!
//! A [`TimerSlot`] holds at most one pending timer. Arming always cancels the
//! previous one first, and every fire carries the generation it was armed
//! with so a handler can drop a fire that raced with a re-arm or cancel.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A fired timer as seen by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Generation the timer was armed with.
    pub generation: u64,
}

/// Holder for a single pending timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handle: None,
            generation: 0,
        }
    }

    /// Cancels any pending timer, then schedules `make(fired)` to be sent on
    /// `tx` after `after`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<E, F>(&mut self, after: Duration, tx: UnboundedSender<E>, make: F)
    where
        E: Send + 'static,
        F: FnOnce(TimerFired) -> E + Send + 'static,
    {
        self.cancel();
        let fired = TimerFired {
            generation: self.generation,
        };
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The receiver going away means the owner shut down.
            let _ = tx.send(make(fired));
        }));
    }

    /// Cancels the pending timer, if any. Fires already queued become stale.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Returns `true` if a timer is armed and has not been consumed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Accepts a fire if it belongs to the currently armed timer.
    ///
    /// Returns `false` for stale fires. An accepted fire disarms the slot.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if self.handle.is_none() || fired.generation != self.generation {
            return false;
        }
        self.handle = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
