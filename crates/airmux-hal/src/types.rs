// ── Capability model domain types ──
//
// The static description of what a chip can do: its modes, and per mode
// the concurrency combinations it supports. Loaded once from hardware (or
// a persisted profile) and treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter};

/// Identifier of a physical radio chip, as reported by the vendor service.
pub type ChipId = u32;

/// Identifier of a chip-wide concurrency mode.
pub type ChipModeId = u32;

/// Chip capability bits. The semantics of individual bits are vendor
/// defined; the arbiter only ever mask-compares them.
pub type CapabilityMask = u64;

/// Wildcard on the request side: "any chip will do".
pub const CAPABILITY_ANY: CapabilityMask = 0;

/// Whether a chip's capabilities satisfy a request's required bits.
///
/// `None` on the chip side means the capabilities were never read from
/// live hardware; such a chip passes every filter (wildcard-pass) until a
/// real value is known.
pub fn capabilities_satisfy(current: Option<CapabilityMask>, required: CapabilityMask) -> bool {
    if required == CAPABILITY_ANY {
        return true;
    }
    match current {
        None => true,
        Some(mask) => mask & required == required,
    }
}

/// The five interface kinds the arbiter manages.
///
/// A bridged AP is AP-typed on the wire (see [`ChipIfaceType`]) but is
/// tracked as its own kind: it occupies different concurrency slots and
/// can be downgraded to a single AP instead of destroyed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumCount,
)]
pub enum InterfaceKind {
    Sta,
    Ap,
    ApBridged,
    P2p,
    Nan,
}

impl InterfaceKind {
    /// Fixed order used when comparing how disruptive two reconfiguration
    /// proposals are: losing an AP is worse than losing a bridged AP, is
    /// worse than losing a STA, and so on.
    pub const DISRUPTION_ORDER: [Self; Self::COUNT] = [
        Self::Ap,
        Self::ApBridged,
        Self::Sta,
        Self::P2p,
        Self::Nan,
    ];

    /// Dense index for per-kind count vectors.
    pub fn idx(self) -> usize {
        match self {
            Self::Sta => 0,
            Self::Ap => 1,
            Self::ApBridged => 2,
            Self::P2p => 3,
            Self::Nan => 4,
        }
    }

    /// The wire-level type this kind is listed under.
    pub fn chip_type(self) -> ChipIfaceType {
        match self {
            Self::Sta => ChipIfaceType::Sta,
            Self::Ap | Self::ApBridged => ChipIfaceType::Ap,
            Self::P2p => ChipIfaceType::P2p,
            Self::Nan => ChipIfaceType::Nan,
        }
    }
}

/// Per-kind interface counts -- the "expanded" form of a concurrency
/// combination, indexed by [`InterfaceKind::idx`].
pub type KindCounts = [u32; InterfaceKind::COUNT];

/// The four interface types a chip exposes on the wire. Bridged APs are
/// listed as `Ap` and distinguished by their instance count.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumCount,
)]
pub enum ChipIfaceType {
    Sta,
    Ap,
    P2p,
    Nan,
}

/// One slot of a concurrency combination: up to `max_ifaces` interfaces,
/// each drawn from `kinds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimit {
    pub kinds: Vec<InterfaceKind>,
    pub max_ifaces: u32,
}

impl ConcurrencyLimit {
    pub fn new(kinds: Vec<InterfaceKind>, max_ifaces: u32) -> Self {
        Self { kinds, max_ifaces }
    }
}

/// A multiset of slot limits representable simultaneously within one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyCombination {
    pub limits: Vec<ConcurrencyLimit>,
}

impl ConcurrencyCombination {
    pub fn new(limits: Vec<ConcurrencyLimit>) -> Self {
        Self { limits }
    }

    /// Whether the combination is structurally valid: at least one slot,
    /// every slot non-empty with a count of at least one.
    pub fn is_well_formed(&self) -> bool {
        !self.limits.is_empty()
            && self
                .limits
                .iter()
                .all(|limit| !limit.kinds.is_empty() && limit.max_ifaces >= 1)
    }
}

/// A chip-wide configuration: the concurrency combinations available while
/// the chip is in this mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipMode {
    pub id: ChipModeId,
    pub combinations: Vec<ConcurrencyCombination>,
}

impl ChipMode {
    pub fn new(id: ChipModeId, combinations: Vec<ConcurrencyCombination>) -> Self {
        Self { id, combinations }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn capability_wildcards() {
        assert!(capabilities_satisfy(Some(0b0110), CAPABILITY_ANY));
        assert!(capabilities_satisfy(None, 0b1000));
        assert!(capabilities_satisfy(Some(0b1110), 0b0110));
        assert!(!capabilities_satisfy(Some(0b0110), 0b1000));
    }

    #[test]
    fn kind_indices_are_dense_and_stable() {
        let mut seen = [false; InterfaceKind::COUNT];
        for kind in InterfaceKind::DISRUPTION_ORDER {
            assert!(!seen[kind.idx()]);
            seen[kind.idx()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn bridged_ap_is_ap_on_the_wire() {
        assert_eq!(InterfaceKind::ApBridged.chip_type(), ChipIfaceType::Ap);
        assert_eq!(InterfaceKind::Ap.chip_type(), ChipIfaceType::Ap);
        assert_eq!(InterfaceKind::Nan.chip_type(), ChipIfaceType::Nan);
    }

    #[test]
    fn combination_well_formedness() {
        let good = ConcurrencyCombination::new(vec![ConcurrencyLimit::new(
            vec![InterfaceKind::Sta],
            1,
        )]);
        assert!(good.is_well_formed());

        let empty_slot = ConcurrencyCombination::new(vec![ConcurrencyLimit::new(vec![], 1)]);
        assert!(!empty_slot.is_well_formed());

        let zero_count = ConcurrencyCombination::new(vec![ConcurrencyLimit::new(
            vec![InterfaceKind::Ap],
            0,
        )]);
        assert!(!zero_count.is_well_formed());
    }

    #[test]
    fn chip_mode_round_trips_through_json() {
        let mode = ChipMode::new(
            7,
            vec![ConcurrencyCombination::new(vec![
                ConcurrencyLimit::new(vec![InterfaceKind::Sta], 1),
                ConcurrencyLimit::new(vec![InterfaceKind::Ap, InterfaceKind::P2p], 2),
            ])],
        );
        let json = serde_json::to_string(&mode).unwrap();
        let back: ChipMode = serde_json::from_str(&json).unwrap();
        assert_eq!(mode, back);
    }
}
