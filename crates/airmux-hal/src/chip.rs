// ── Hardware-layer traits ──
//
// The arbiter talks to hardware exclusively through these traits. All
// calls block until the vendor service answers. Implementations must be
// internally thread-safe; the arbiter additionally serializes every
// mutating sequence behind its own lock.

use std::sync::Arc;

use crate::error::HalResult;
use crate::types::{CapabilityMask, ChipId, ChipIfaceType, ChipMode, ChipModeId, InterfaceKind};

/// Entry point to the vendor Wi-Fi service.
pub trait WifiHal: Send + Sync {
    /// Whether the service connection has completed initialization.
    fn is_initialized(&self) -> bool;

    /// Whether the radio subsystem is currently running.
    fn is_started(&self) -> bool;

    /// Start the radio subsystem. May fail with
    /// [`HalError::NotAvailable`](crate::HalError::NotAvailable) while the
    /// service is still winding down a previous stop; callers retry that
    /// case with a bounded backoff.
    fn start(&self) -> HalResult<()>;

    /// Stop the radio subsystem. Destroys every interface on every chip.
    fn stop(&self) -> HalResult<()>;

    /// Drop the current service handle. Called after an unrecoverable
    /// failure; a later [`start`](Self::start) re-binds.
    fn invalidate(&self);

    /// Ids of every chip the service exposes.
    fn chip_ids(&self) -> HalResult<Vec<ChipId>>;

    /// Handle for one chip.
    fn chip(&self, id: ChipId) -> HalResult<Arc<dyn Chip>>;

    /// Register the service-level event callback. Returns `false` if the
    /// service rejected the registration. Callbacks are cleared by a stop
    /// and must be re-registered afterwards.
    fn register_event_callback(&self, callback: Arc<dyn HalEventCallback>) -> bool;
}

/// One physical radio chip.
pub trait Chip: Send + Sync {
    fn id(&self) -> ChipId;

    /// The mode the chip is currently configured to, or `Ok(None)` if no
    /// mode has been configured since start.
    fn current_mode(&self) -> HalResult<Option<ChipModeId>>;

    /// The modes this chip supports, with their concurrency combinations.
    fn available_modes(&self) -> HalResult<Vec<ChipMode>>;

    /// Capability bits for this chip.
    fn capabilities(&self) -> HalResult<CapabilityMask>;

    /// Switch the chip to `mode`. Interfaces from the previous mode are
    /// expected to have been removed by the caller first.
    fn configure_mode(&self, mode: ChipModeId) -> HalResult<()>;

    /// Names of the live interfaces of one wire type, in creation order.
    fn iface_names(&self, ty: ChipIfaceType) -> HalResult<Vec<String>>;

    /// Instance names backing an AP interface. Two or more means the AP is
    /// operating bridged.
    fn bridged_instances(&self, name: &str) -> HalResult<Vec<String>>;

    /// Create a new interface of `kind`; returns its name.
    fn create_iface(&self, kind: InterfaceKind) -> HalResult<String>;

    /// Remove a live interface.
    fn remove_iface(&self, ty: ChipIfaceType, name: &str) -> HalResult<()>;

    /// Remove a single instance from a bridged AP, downgrading it to a
    /// single AP without tearing the interface down.
    fn remove_bridged_instance(&self, name: &str, instance: &str) -> HalResult<()>;
}

/// Service-level events. Default impls are no-ops so implementors only
/// override what they care about.
pub trait HalEventCallback: Send + Sync {
    /// The subsystem finished starting.
    fn on_start(&self) {}

    /// The subsystem stopped (requested or otherwise).
    fn on_stop(&self) {}

    /// The subsystem hit an unrecoverable error and is going down.
    fn on_failure(&self, reason: &str) {
        let _ = reason;
    }

    /// The vendor service restarted underneath us.
    fn on_subsystem_restart(&self, reason: &str) {
        let _ = reason;
    }
}
