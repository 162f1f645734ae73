// ── HAL status taxonomy ──
//
// Mirrors the status codes vendor services actually report. The only
// variant callers may retry on is `NotAvailable` -- the service is mid
// start/stop and expected to recover shortly. Everything else is treated
// by the arbiter as fatal for the current operation.

use thiserror::Error;

use crate::types::ChipId;

/// Result alias for all HAL operations.
pub type HalResult<T> = Result<T, HalError>;

/// Errors reported by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// The service exists but cannot take requests right now (e.g. still
    /// stopping). Transient: safe to retry after a short delay.
    #[error("hal service not available")]
    NotAvailable,

    /// The operation is not supported by this hardware.
    #[error("operation not supported by the hal")]
    NotSupported,

    /// A chip id that the service does not know about.
    #[error("unknown chip id {0}")]
    InvalidChip(ChipId),

    /// An interface name that the chip does not currently expose.
    #[error("unknown interface '{0}'")]
    InvalidIface(String),

    /// Any other hardware-level failure. Never retried.
    #[error("hal failure: {0}")]
    Failure(String),
}

impl HalError {
    /// Whether a bounded retry is reasonable for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotAvailable)
    }
}
