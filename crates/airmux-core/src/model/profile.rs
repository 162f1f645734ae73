use serde::{Deserialize, Serialize};

use airmux_hal::{CapabilityMask, ChipId, ChipMode};

/// The persisted capability model for one chip: everything static that a
/// later boot can reuse without waiting for live hardware. Serialized to
/// JSON by the capability store; the round trip must be lossless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticChipProfile {
    pub chip_id: ChipId,
    /// `None` when the capability bits were never successfully read.
    pub capabilities: Option<CapabilityMask>,
    pub modes: Vec<ChipMode>,
}
