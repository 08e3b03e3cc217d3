//! Time Source
//!
//! Monotonic clock abstraction, substitutable for deterministic testing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait TimeSource: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Instant;
}

/// System monotonic clock
#[derive(Debug, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create new clock
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    /// Fixed origin captured at creation
    origin: Instant,
    /// Offset from the origin
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock parked at its origin
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock().unwrap() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap()
    }
}
