use airmux_hal::{ChipId, ChipIfaceType, InterfaceKind};

/// Handle to an interface the arbiter created. Plain data: callers keep it
/// to release the interface later or to swap its attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IfaceHandle {
    pub chip_id: ChipId,
    pub name: String,
    /// The kind that was requested (a bridged AP keeps `ApBridged` here
    /// even though the wire type is `Ap`).
    pub kind: InterfaceKind,
}

impl IfaceHandle {
    /// The wire type the interface is listed under.
    pub fn chip_type(&self) -> ChipIfaceType {
        self.kind.chip_type()
    }
}

impl std::fmt::Display for IfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@chip{} ({})", self.name, self.chip_id, self.kind)
    }
}
