// ── Chip state snapshot ──
//
// A point-in-time read of everything the proposal engine needs: current
// mode, capabilities, declared mode/combination matrix, and the live
// interfaces per kind. Rebuilt from hardware on every mutating operation;
// never trusted stale. Any read failure yields `None` and the caller must
// treat the hardware as unusable (full stop), not retry in place.

use std::sync::Arc;

use tracing::{debug, error, warn};

use airmux_hal::{
    CapabilityMask, Chip, ChipId, ChipIfaceType, ChipMode, ChipModeId, InterfaceKind, KindCounts,
    WifiHal,
};
use strum::{EnumCount as _, IntoEnumIterator};

use crate::model::StaticChipProfile;
use crate::priority::WorkSource;

/// One live interface as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct IfaceInfo {
    pub name: String,
    pub kind: InterfaceKind,
    /// Attribution, back-filled from the interface cache during
    /// validation. The hardware does not know who asked for an interface.
    pub requestor: Option<WorkSource>,
}

/// Point-in-time state of one chip.
pub struct ChipSnapshot {
    pub chip: Arc<dyn Chip>,
    pub chip_id: ChipId,
    pub modes: Vec<ChipMode>,
    pub current_mode: Option<ChipModeId>,
    pub capabilities: Option<CapabilityMask>,
    ifaces: [Vec<IfaceInfo>; InterfaceKind::COUNT],
}

impl ChipSnapshot {
    pub fn ifaces_of(&self, kind: InterfaceKind) -> &[IfaceInfo] {
        &self.ifaces[kind.idx()]
    }

    pub(crate) fn ifaces_of_mut(&mut self, kind: InterfaceKind) -> &mut Vec<IfaceInfo> {
        &mut self.ifaces[kind.idx()]
    }

    /// Live interface count per kind.
    pub fn counts(&self) -> KindCounts {
        let mut counts = [0u32; InterfaceKind::COUNT];
        for kind in InterfaceKind::iter() {
            counts[kind.idx()] = u32::try_from(self.ifaces[kind.idx()].len()).unwrap_or(u32::MAX);
        }
        counts
    }

    /// All live interfaces, in disruption-comparison order of kind.
    pub fn all_ifaces(&self) -> impl Iterator<Item = &IfaceInfo> {
        InterfaceKind::DISRUPTION_ORDER
            .into_iter()
            .flat_map(|kind| self.ifaces_of(kind).iter())
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.iter().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for ChipSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipSnapshot")
            .field("chip_id", &self.chip_id)
            .field("current_mode", &self.current_mode)
            .field("capabilities", &self.capabilities)
            .field("ifaces", &self.ifaces)
            .finish_non_exhaustive()
    }
}

/// Read every chip, every mode, every live interface.
///
/// Declared modes come from the persisted profile when one exists and
/// `force_from_hardware` is false; forcing always asks the driver. Returns
/// `None` on any hardware read failure.
pub(crate) fn read_all_chips(
    hal: &dyn WifiHal,
    static_profiles: &[StaticChipProfile],
    force_from_hardware: bool,
) -> Option<Vec<ChipSnapshot>> {
    if !hal.is_started() {
        return None;
    }

    let chip_ids = match hal.chip_ids() {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "could not enumerate chips");
            return None;
        }
    };
    if chip_ids.is_empty() {
        error!("hardware reports no chips");
        return None;
    }

    let mut snapshots = Vec::with_capacity(chip_ids.len());
    for chip_id in chip_ids {
        let chip = match hal.chip(chip_id) {
            Ok(chip) => chip,
            Err(e) => {
                warn!(chip_id, error = %e, "could not get chip handle");
                return None;
            }
        };

        let current_mode = match chip.current_mode() {
            Ok(mode) => mode,
            Err(e) => {
                warn!(chip_id, error = %e, "could not read current mode");
                return None;
            }
        };

        // An unreadable capability mask is not fatal; the chip passes
        // capability filters as a wildcard until a real value is known.
        let capabilities = match chip.capabilities() {
            Ok(mask) => Some(mask),
            Err(e) => {
                debug!(chip_id, error = %e, "capabilities unreadable, treating as wildcard");
                None
            }
        };

        let modes = {
            let profile = static_profiles.iter().find(|p| p.chip_id == chip_id);
            match profile {
                Some(profile) if !force_from_hardware => profile.modes.clone(),
                _ => match chip.available_modes() {
                    Ok(modes) => modes,
                    Err(e) => {
                        warn!(chip_id, error = %e, "could not read available modes");
                        return None;
                    }
                },
            }
        };

        let mut ifaces: [Vec<IfaceInfo>; InterfaceKind::COUNT] =
            std::array::from_fn(|_| Vec::new());

        for (ty, kind) in [
            (ChipIfaceType::Sta, InterfaceKind::Sta),
            (ChipIfaceType::P2p, InterfaceKind::P2p),
            (ChipIfaceType::Nan, InterfaceKind::Nan),
        ] {
            let names = match chip.iface_names(ty) {
                Ok(names) => names,
                Err(e) => {
                    warn!(chip_id, %ty, error = %e, "could not list interfaces");
                    return None;
                }
            };
            ifaces[kind.idx()] = names
                .into_iter()
                .map(|name| IfaceInfo {
                    name,
                    kind,
                    requestor: None,
                })
                .collect();
        }

        // APs need a second look: two or more backing instances means the
        // interface is operating bridged.
        let ap_names = match chip.iface_names(ChipIfaceType::Ap) {
            Ok(names) => names,
            Err(e) => {
                warn!(chip_id, error = %e, "could not list AP interfaces");
                return None;
            }
        };
        for name in ap_names {
            let bridged = match chip.bridged_instances(&name) {
                Ok(instances) => instances.len() > 1,
                Err(e) => {
                    debug!(chip_id, %name, error = %e, "no instance info, counting as single AP");
                    false
                }
            };
            let kind = if bridged {
                InterfaceKind::ApBridged
            } else {
                InterfaceKind::Ap
            };
            ifaces[kind.idx()].push(IfaceInfo {
                name,
                kind,
                requestor: None,
            });
        }

        snapshots.push(ChipSnapshot {
            chip,
            chip_id,
            modes,
            current_mode,
            capabilities,
            ifaces,
        });
    }

    Some(snapshots)
}

/// Reduce snapshots to the static per-chip profile worth persisting.
pub(crate) fn to_static_profiles(snapshots: &[ChipSnapshot]) -> Vec<StaticChipProfile> {
    snapshots
        .iter()
        .map(|snap| StaticChipProfile {
            chip_id: snap.chip_id,
            capabilities: snap.capabilities,
            modes: snap.modes.clone(),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use airmux_hal::{ConcurrencyCombination, ConcurrencyLimit, SimChipSpec, SimHal};

    use super::*;

    fn sta_plus_bridged_hal() -> SimHal {
        let mode = ChipMode::new(
            0,
            vec![ConcurrencyCombination::new(vec![
                ConcurrencyLimit::new(vec![InterfaceKind::Sta], 1),
                ConcurrencyLimit::new(vec![InterfaceKind::Ap, InterfaceKind::ApBridged], 1),
            ])],
        );
        SimHal::new(vec![SimChipSpec::new(0, vec![mode]).with_capabilities(0b1)])
    }

    #[test]
    fn not_started_yields_none() {
        let hal = sta_plus_bridged_hal();
        assert!(read_all_chips(&hal, &[], false).is_none());
    }

    #[test]
    fn bridged_ap_is_classified_by_instance_count() {
        let hal = sta_plus_bridged_hal();
        hal.start().unwrap();
        let chip = hal.chip(0).unwrap();
        chip.configure_mode(0).unwrap();
        chip.create_iface(InterfaceKind::Sta).unwrap();
        let bridged = chip.create_iface(InterfaceKind::ApBridged).unwrap();

        let snaps = read_all_chips(&hal, &[], false).unwrap();
        assert_eq!(snaps.len(), 1);
        let snap = &snaps[0];
        assert_eq!(snap.ifaces_of(InterfaceKind::Sta).len(), 1);
        assert_eq!(snap.ifaces_of(InterfaceKind::Ap).len(), 0);
        assert_eq!(snap.ifaces_of(InterfaceKind::ApBridged).len(), 1);
        assert_eq!(snap.ifaces_of(InterfaceKind::ApBridged)[0].name, bridged);

        // Downgrading to one instance reclassifies it as a single AP.
        chip.remove_bridged_instance(&bridged, &format!("{bridged}.0"))
            .unwrap();
        let snaps = read_all_chips(&hal, &[], false).unwrap();
        assert_eq!(snaps[0].ifaces_of(InterfaceKind::ApBridged).len(), 0);
        assert_eq!(snaps[0].ifaces_of(InterfaceKind::Ap).len(), 1);
    }

    #[test]
    fn static_profile_modes_bypass_the_driver() {
        let hal = sta_plus_bridged_hal();
        hal.start().unwrap();

        let fake_mode = ChipMode::new(
            9,
            vec![ConcurrencyCombination::new(vec![ConcurrencyLimit::new(
                vec![InterfaceKind::Nan],
                1,
            )])],
        );
        let profiles = vec![StaticChipProfile {
            chip_id: 0,
            capabilities: Some(0b1),
            modes: vec![fake_mode.clone()],
        }];

        let snaps = read_all_chips(&hal, &profiles, false).unwrap();
        assert_eq!(snaps[0].modes, vec![fake_mode]);

        // Forcing ignores the profile.
        let snaps = read_all_chips(&hal, &profiles, true).unwrap();
        assert_eq!(snaps[0].modes.len(), 1);
        assert_eq!(snaps[0].modes[0].id, 0);
    }
}
