//! Monotonic time sources for playback
//!
//! The scheduler never reads the system clock directly; it asks a [`Clock`]
//! so tests can simulate irregular or late ticks.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
}

/// Clock following the async runtime's notion of time.
///
/// Outside a runtime, or with time not paused, this is the OS monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
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

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute time; going backwards is ignored
    pub fn set(&self, to: Duration) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Accumulates time only while running
pub struct Stopwatch {
    clock: Arc<dyn Clock>,
    accumulated: Duration,
    started_at: Option<Duration>,
}

impl Stopwatch {
    /// Create a stopped stopwatch reading zero
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            accumulated: Duration::ZERO,
            started_at: None,
        }
    }

    /// Start or resume; no-op if running
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(self.clock.now());
        }
    }

    /// Pause and bank the running interval; no-op if stopped
    pub fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += self.clock.now().saturating_sub(started);
        }
    }

    /// Stop and zero
    pub fn reset(&mut self) {
        self.started_at = None;
        self.accumulated = Duration::ZERO;
    }

    /// Whether the stopwatch is running
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Total running time
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started) => self.accumulated + self.clock.now().saturating_sub(started),
            None => self.accumulated,
        }
    }
}
