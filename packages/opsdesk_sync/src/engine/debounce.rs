//! Search debouncer
//!
//! Holds the latest value until a quiet period has passed, so rapid
//! keystrokes collapse into a single server-side search request. Pure
//! deadline bookkeeping; the engine loop supplies the wakeups.

use tokio::time::{Duration, Instant};

pub(crate) struct Debouncer<T> {
    quiet: Duration,
    slot: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub(crate) fn new(quiet: Duration) -> Self {
        Self { quiet, slot: None }
    }

    /// Replace any held value and restart the quiet period.
    pub(crate) fn push(&mut self, value: T, now: Instant) {
        self.slot = Some((value, now + self.quiet));
    }

    /// When the engine loop should wake up next, if anything is held.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.slot.as_ref().map(|(_, at)| *at)
    }

    /// Yield the held value once its quiet period has elapsed.
    pub(crate) fn take_ready(&mut self, now: Instant) -> Option<T> {
        match &self.slot {
            Some((_, at)) if *at <= now => self.slot.take().map(|(v, _)| v),
            _ => None,
        }
    }
}
