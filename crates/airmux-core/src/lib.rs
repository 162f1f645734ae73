//! Priority-based arbitration of shared Wi-Fi chip interfaces.
//!
//! A device's radio chips declare a fixed set of concurrency combinations:
//! which mixes of station, AP, bridged-AP, P2P, and NAN interfaces can
//! exist at the same time. This crate owns the decision of what happens
//! when a new interface request arrives against that matrix:
//!
//! - **[`InterfaceArbiter`]** — central facade. Serializes every mutating
//!   sequence (snapshot, cache validation, proposal search, chip
//!   reconfiguration) behind one lock and delivers lifecycle callbacks
//!   outside it.
//! - **Proposal engine** — expands the declared combinations into
//!   concrete per-kind count vectors, scores every (chip, mode,
//!   combination) triple by how many interfaces it would remove or
//!   downgrade, and picks the least disruptive feasible one.
//! - **Priority policy** ([`priority`]) — six requestor tiers with
//!   special-case tie-breaks: privileged last-caller-wins, P2P versus
//!   AP/primary-STA carve-outs, idle-P2P reclamation, and the legacy
//!   single-radio hotspot exception.
//! - **Interface cache** — the arbiter's mirror of live interfaces and
//!   their owners, validated against every fresh hardware snapshot; any
//!   divergence forces a full subsystem restart.
//! - **Listener registry** ([`listener`]) — generic (listener, executor)
//!   registrations with at-most-once destruction delivery and
//!   executor-affinity-aware dispatch.
//! - **Capability persistence** ([`persist`]) — the confirmed concurrency
//!   matrix survives restarts as JSON via the [`CapabilityStore`]
//!   collaborator.
//!
//! The hardware itself sits behind the traits in [`airmux_hal`]; tests run
//! against its in-memory simulator.

pub mod arbiter;
mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod listener;
pub mod model;
pub mod persist;
pub mod priority;
pub mod proposal;
pub mod snapshot;

// ── Primary re-exports ──────────────────────────────────────────────
pub use arbiter::{ArbiterBuilder, CreateRequest, ImpactedInterface, InterfaceArbiter};
pub use clock::{Clock, MonotonicClock};
pub use config::ArbiterConfig;
pub use error::ArbiterError;
pub use listener::{
    ArbiterEvent, CallbackExecutor, EventListener, ExecutorId, ListenerHandle, WorkerExecutor,
};
pub use model::{IfaceHandle, StaticChipProfile};
pub use persist::{CapabilityStore, JsonFileStore, MemoryStore, StoreError};
pub use priority::{
    ConflictPolicy, NoConflictPolicy, PriorityTier, RequestorContext, WorkSource, WorkTag,
    classify,
};
pub use proposal::ApOwner;
pub use snapshot::{ChipSnapshot, IfaceInfo};

// Re-export the HAL vocabulary types consumers need at the call site.
pub use airmux_hal::{CAPABILITY_ANY, CapabilityMask, ChipId, ChipMode, InterfaceKind};
