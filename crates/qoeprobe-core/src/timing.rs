//! Timing windows and one-shot deadlines

use std::time::Duration;
use tokio::time::Instant;

/// An interval that accumulates time while open.
///
/// Opening an open window and closing a closed window are no-ops, so at most
/// one span is ever being measured.
#[derive(Debug, Clone, Default)]
pub struct TimingWindow {
    start: Option<Instant>,
    accumulated: Duration,
}

impl TimingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the window at `now`. Returns false if it was already open.
    pub fn open(&mut self, now: Instant) -> bool {
        if self.start.is_some() {
            return false;
        }
        self.start = Some(now);
        true
    }

    /// Close the window at `now`, returning the span just closed.
    pub fn close(&mut self, now: Instant) -> Option<Duration> {
        let start = self.start.take()?;
        let span = now.saturating_duration_since(start);
        self.accumulated += span;
        Some(span)
    }

    pub fn is_open(&self) -> bool {
        self.start.is_some()
    }

    /// Time accumulated by closed spans
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Accumulated time including the currently open span
    pub fn total(&self, now: Instant) -> Duration {
        match self.start {
            Some(start) => self.accumulated + now.saturating_duration_since(start),
            None => self.accumulated,
        }
    }
}

/// A one-shot deadline that can fire or be cancelled exactly once
#[derive(Debug, Clone, Copy, Default)]
pub struct OneShot {
    armed: Option<Instant>,
}

impl OneShot {
    /// Arm for `after` from `now`. Re-arming a pending deadline is a no-op.
    pub fn arm(&mut self, now: Instant, after: Duration) -> bool {
        if self.armed.is_some() {
            return false;
        }
        self.armed = Some(now + after);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed
    }

    pub fn is_pending(&self) -> bool {
        self.armed.is_some()
    }

    /// Disarm. Returns true only for the call that actually cancelled.
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    /// Disarm if the deadline has passed at `now`
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.armed {
            Some(deadline) if now >= deadline => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

/// Arithmetic mean over every sample pushed so far
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    count: u64,
    sum: f64,
}

impl RunningMean {
    pub fn push(&mut self, sample: f64) -> f64 {
        self.count += 1;
        self.sum += sample;
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
