// ── Time source ──
//
// Interface ages (the disconnected-P2P grace rule) are measured on a
// monotonic clock injected as a collaborator so tests can drive it.

use std::time::Instant;

/// Monotonic milliseconds-since-origin source.
pub trait Clock: Send + Sync {
    fn elapsed_millis(&self) -> u64;
}

/// Wall implementation: milliseconds since the clock was created.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
