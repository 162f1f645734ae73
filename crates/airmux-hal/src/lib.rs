//! Hardware abstraction contract for Wi-Fi chip interface management.
//!
//! This crate defines the boundary between the interface arbiter
//! (`airmux-core`) and whatever actually drives the radio hardware:
//!
//! - **[`WifiHal`]** — entry point to the vendor service: start/stop,
//!   chip enumeration, event callback registration.
//! - **[`Chip`]** — one physical radio unit: mode query/configuration,
//!   per-type interface listing, interface creation and removal, bridged-AP
//!   instance management.
//! - **Capability model** ([`types`]) — chip modes and the concurrency
//!   combinations each mode supports, expressed as slot limits over the
//!   five interface kinds.
//! - **[`SimHal`]** — a scriptable in-memory implementation used by the
//!   arbiter's test suites and by embedders that want a hardware-free
//!   development target.
//!
//! Everything here is synchronous: vendor HALs block, and the arbiter
//! serializes all mutating traffic behind a single lock anyway.

pub mod chip;
pub mod error;
pub mod sim;
pub mod types;

pub use chip::{Chip, HalEventCallback, WifiHal};
pub use error::{HalError, HalResult};
pub use sim::{SimChipSpec, SimHal};
pub use types::{
    CAPABILITY_ANY, CapabilityMask, ChipId, ChipIfaceType, ChipMode, ChipModeId,
    ConcurrencyCombination, ConcurrencyLimit, InterfaceKind, KindCounts, capabilities_satisfy,
};
