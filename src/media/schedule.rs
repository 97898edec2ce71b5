//! Timing primitives for the sampler loop
//!
//! The loop ticks on redraw opportunities; a `FrameGate` decides which ticks
//! actually sample. Both read time through `Clock` so tests can drive them
//! without a display or capture device.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source, measured from the clock's origin
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock backed by tokio's `Instant` (follows paused time in tests)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Minimum-interval gate over loop ticks
#[derive(Debug, Clone)]
pub struct FrameGate {
    min_interval: Duration,
    last_accepted: Option<Duration>,
}

impl FrameGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// Accept `now` if at least `min_interval` passed since the last accepted tick
    pub fn try_accept(&mut self, now: Duration) -> bool {
        match self.last_accepted {
            Some(last) if now.saturating_sub(last) < self.min_interval => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
