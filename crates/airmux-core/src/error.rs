// ── Core error types ──
//
// User-facing errors from airmux-core. `NoCapacity` is ordinary control
// flow ("no interface available now"), carries no side effects, and leaves
// hardware and cache untouched. The hardware variants always follow a full
// stop-and-teardown -- the arbiter never patches around a failed HAL call.

use thiserror::Error;

use airmux_hal::{HalError, InterfaceKind};

/// Unified error type for the arbiter.
#[derive(Debug, Error)]
pub enum ArbiterError {
    // ── Feasibility ──────────────────────────────────────────────────
    /// No combination of chip, mode, and permissible victim selection can
    /// satisfy the request. Nothing was changed.
    #[error("no feasible configuration for a {kind} interface")]
    NoCapacity { kind: InterfaceKind },

    // ── Lifecycle errors ─────────────────────────────────────────────
    /// The radio subsystem is not running; call `start()` first.
    #[error("wifi subsystem is not started")]
    NotStarted,

    /// The subsystem stayed unavailable through every bounded start retry.
    #[error("wifi subsystem did not start after {attempts} attempts")]
    StartTimedOut { attempts: u32 },

    // ── Fatal errors ─────────────────────────────────────────────────
    /// A hardware call failed mid-operation. All local state has been torn
    /// down and every destruction listener notified.
    #[error("hardware failure: {0}")]
    Hardware(#[from] HalError),

    /// The interface cache no longer matches live hardware state. Treated
    /// exactly like a hardware failure: full stop and teardown.
    #[error("interface cache diverged from hardware state")]
    CacheMismatch,

    // ── Contract violations ──────────────────────────────────────────
    /// The caller broke an API contract (e.g. a destruction listener with
    /// no executor). Logged loudly, nothing was changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
