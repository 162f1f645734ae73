// ── Arbiter tuning knobs ──
//
// Built by the embedder and passed into `InterfaceArbiter` -- the core
// never reads config files.

use std::time::Duration;

/// Tunables for one arbiter instance.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// How long a P2P interface must sit disconnected before any
    /// foreground-or-higher request may reclaim it regardless of relative
    /// priority. `None` disables the rule.
    pub disconnected_p2p_grace: Option<Duration>,

    /// How many times `start()` retries a `NotAvailable` answer from the
    /// HAL before giving up.
    pub start_retry_attempts: u32,

    /// Delay between start retries.
    pub start_retry_interval: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            disconnected_p2p_grace: Some(Duration::from_secs(60)),
            start_retry_attempts: 3,
            start_retry_interval: Duration::from_millis(20),
        }
    }
}
