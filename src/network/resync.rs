//! Resync Tracker
//!
//! Per-client watchdog for optimistic mutations. Arming starts a window; a
//! snapshot disarms it; if the window lapses first the client asks the host
//! for a fresh snapshot once and waits for the next mutation to re-arm.

use std::time::Duration;

use tokio::time::Instant;

/// Default resync window.
pub const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_millis(1000);

/// Deadline-based resync timer.
///
/// Time is passed in explicitly so callers can drive it from a `select!`
/// loop (`sleep_until(deadline)`) or from tests.
#[derive(Debug, Clone)]
pub struct ResyncTracker {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Default for ResyncTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RESYNC_TIMEOUT)
    }
}

impl ResyncTracker {
    /// Create a disarmed tracker.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadline: None }
    }

    /// Start (or restart) the window at `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Cancel the window.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether a window is running.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the window lapses, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check for expiry at `now`.
    ///
    /// Returns `true` exactly once per lapsed window; the tracker is
    /// disarmed afterwards.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
