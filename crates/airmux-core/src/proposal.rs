// ── Creation proposal engine ──
//
// Given fresh chip snapshots and a requested interface kind, enumerate
// every (chip, mode, expanded combination) triple, work out what each one
// would cost in removed or downgraded interfaces, and keep the least
// disruptive feasible answer. Enumeration order is deterministic (chip
// order, then mode order, then combination order, then expansion index)
// but carries no semantic meaning: a true tie goes to the first proposal
// found.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use strum::EnumCount as _;
use tracing::{debug, info, warn};

use airmux_hal::{
    CapabilityMask, Chip, ChipId, ChipIfaceType, ChipModeId, ConcurrencyCombination,
    InterfaceKind, KindCounts, capabilities_satisfy,
};

use crate::cache::InterfaceCache;
use crate::clock::Clock;
use crate::config::ArbiterConfig;
use crate::model::StaticChipProfile;
use crate::priority::{ConflictPolicy, PriorityTier, RequestorContext, WorkSource, classify};
use crate::snapshot::{ChipSnapshot, IfaceInfo};

/// Owner of an AP interface, registered when the interface is created.
/// Consulted when the engine would rather downgrade a bridged AP than
/// delete it.
pub trait ApOwner: Send + Sync {
    /// The bridged instance that may be removed right now, or `None` if
    /// the AP cannot spare one.
    fn instance_for_removal(&self) -> Option<String>;
}

/// Everything the victim policy consults besides the snapshot itself.
pub(crate) struct PolicyEnv<'a> {
    pub context: &'a dyn RequestorContext,
    pub conflict_policy: &'a dyn ConflictPolicy,
    pub cache: &'a InterfaceCache,
    pub ap_owners: &'a HashMap<String, Arc<dyn ApOwner>>,
    pub clock: &'a dyn Clock,
    pub config: &'a ArbiterConfig,
    pub p2p_connected: bool,
    /// Whether any declared combination allows one STA and one AP at the
    /// same time (the legacy single-radio rule keys off its absence).
    pub sta_ap_concurrency: bool,
}

/// A feasible way to satisfy one creation request. Transient: produced and
/// consumed within a single arbiter operation.
pub(crate) struct Proposal {
    pub chip: Arc<dyn Chip>,
    pub chip_id: ChipId,
    pub mode_id: ChipModeId,
    pub current_mode: Option<ChipModeId>,
    pub to_remove: Vec<IfaceInfo>,
    pub to_downgrade: Vec<IfaceInfo>,
    /// Live per-kind counts on the chip when the proposal was built.
    pub live_counts: KindCounts,
    /// Every live interface on the chip, for the mode-switch removal path
    /// and for impact reporting.
    pub chip_ifaces: Vec<IfaceInfo>,
}

impl Proposal {
    /// Whether accepting this proposal switches the chip out of a
    /// currently valid mode (which removes everything on it).
    pub fn is_mode_switch(&self) -> bool {
        self.current_mode.is_some_and(|mode| mode != self.mode_id)
    }

    /// Whether the executor must issue a mode-configure call. Unlike
    /// [`is_mode_switch`](Self::is_mode_switch) this is also true when the
    /// chip has no mode yet.
    pub fn needs_configure(&self) -> bool {
        self.current_mode != Some(self.mode_id)
    }

    /// The interfaces that would be destroyed if this proposal runs.
    /// Downgraded bridged APs survive and are not listed.
    pub fn displaced(&self) -> Vec<IfaceInfo> {
        if self.is_mode_switch() {
            self.chip_ifaces.clone()
        } else {
            self.to_remove.clone()
        }
    }

    fn removal_counts(&self) -> KindCounts {
        if self.is_mode_switch() {
            return self.live_counts;
        }
        let mut counts = [0u32; InterfaceKind::COUNT];
        for info in &self.to_remove {
            counts[info.kind.idx()] += 1;
        }
        counts
    }
}

impl std::fmt::Debug for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proposal")
            .field("chip_id", &self.chip_id)
            .field("mode_id", &self.mode_id)
            .field("current_mode", &self.current_mode)
            .field("to_remove", &self.to_remove)
            .field("to_downgrade", &self.to_downgrade)
            .finish_non_exhaustive()
    }
}

// ── Combination expansion ────────────────────────────────────────────

/// Expand a concurrency combination into every concrete per-kind count
/// vector it allows: the cross product over all slots of the kinds each
/// slot accepts. Duplicates are permitted and not collapsed; the cost is
/// redundant feasibility checks, never a wrong answer.
pub(crate) fn expand_combination(combo: &ConcurrencyCombination) -> Vec<KindCounts> {
    if combo.limits.iter().any(|limit| limit.kinds.is_empty()) {
        warn!("malformed concurrency combination with an empty slot");
        return Vec::new();
    }

    let mut num_combos: usize = 1;
    for limit in &combo.limits {
        for _ in 0..limit.max_ifaces {
            num_combos = num_combos.saturating_mul(limit.kinds.len());
        }
    }

    let mut expanded = vec![[0u32; InterfaceKind::COUNT]; num_combos];
    // Mixed-radix enumeration: each slot instance owns a "span" of the
    // expansion index space and cycles through its allowed kinds.
    let mut span = num_combos;
    for limit in &combo.limits {
        for _ in 0..limit.max_ifaces {
            span /= limit.kinds.len();
            for (index, counts) in expanded.iter_mut().enumerate() {
                let kind = limit.kinds[(index / span) % limit.kinds.len()];
                counts[kind.idx()] += 1;
            }
        }
    }
    expanded
}

/// Whether one expanded combination covers the requested per-kind counts.
pub(crate) fn expanded_supports_counts(expanded: &KindCounts, requested: &KindCounts) -> bool {
    InterfaceKind::DISRUPTION_ORDER
        .iter()
        .all(|kind| expanded[kind.idx()] >= requested[kind.idx()])
}

/// Whether any declared combination across the given profiles covers the
/// requested counts. Pure capability question: ignores live interfaces
/// and priorities.
pub(crate) fn device_supports_counts(
    profiles: &[StaticChipProfile],
    requested: &KindCounts,
) -> bool {
    profiles.iter().any(|profile| {
        profile.modes.iter().any(|mode| {
            mode.combinations.iter().any(|combo| {
                expand_combination(combo)
                    .iter()
                    .any(|expanded| expanded_supports_counts(expanded, requested))
            })
        })
    })
}

/// Union of every kind mentioned by any combination slot.
pub(crate) fn supported_kinds(profiles: &[StaticChipProfile]) -> BTreeSet<InterfaceKind> {
    let mut kinds = BTreeSet::new();
    for profile in profiles {
        for mode in &profile.modes {
            for combo in &mode.combinations {
                for limit in &combo.limits {
                    kinds.extend(limit.kinds.iter().copied());
                }
            }
        }
    }
    kinds
}

// ── Victim policy ────────────────────────────────────────────────────

pub(crate) fn is_disconnected_p2p(info: &IfaceInfo, env: &PolicyEnv<'_>) -> bool {
    if info.kind != InterfaceKind::P2p || env.p2p_connected {
        return false;
    }
    let Some(grace) = env.config.disconnected_p2p_grace else {
        return false;
    };
    let Some(entry) = env.cache.get(&info.name, ChipIfaceType::P2p) else {
        return false;
    };
    let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
    let age = env.clock.elapsed_millis().saturating_sub(entry.creation_time_ms);
    age >= grace_ms
}

/// Whether a request with `new_requestor` may delete `existing`.
///
/// Applied in order: removable-station reclaim, idle-P2P reclaim,
/// user-confirmation deferral, strict tier comparison, the privileged
/// last-caller-wins rule with its P2P carve-outs, and finally the legacy
/// single-radio hotspot exception.
fn allowed_to_delete(
    requested: InterfaceKind,
    new_requestor: &WorkSource,
    existing: &IfaceInfo,
    env: &PolicyEnv<'_>,
) -> bool {
    let Some(existing_requestor) = existing.requestor.as_ref() else {
        return false;
    };
    let new_tier = classify(new_requestor, env.context);
    let existing_tier = classify(existing_requestor, env.context);

    // A secondary-internet station is fair game for any non-background
    // request.
    if existing.kind == InterfaceKind::Sta
        && new_tier > PriorityTier::Background
        && env.context.is_removable_station(&existing.name)
    {
        debug!(name = %existing.name, "removable station may be reclaimed");
        return true;
    }

    // Idle P2P reclamation once the grace period has elapsed.
    if new_tier > PriorityTier::Background && is_disconnected_p2p(existing, env) {
        debug!(name = %existing.name, "disconnected P2P past grace period");
        return true;
    }

    // The conflict policy may want the user to decide; deferring counts
    // as allowed here, the actual gate lives with that collaborator.
    if env.conflict_policy.needs_user_approval(
        requested,
        new_requestor,
        existing.kind,
        existing_requestor,
    ) {
        return true;
    }

    if new_tier > existing_tier {
        return true;
    }
    if new_tier == existing_tier {
        // Same kind at the same tier: first caller wins.
        if requested == existing.kind {
            return false;
        }
        // Both privileged and different kinds: last caller wins, except a
        // P2P request never bumps a privileged AP (the user just turned
        // the hotspot on) or the primary station (P2P rides on it).
        if new_tier == PriorityTier::Privileged {
            if requested == InterfaceKind::P2p {
                if matches!(
                    existing.kind,
                    InterfaceKind::Ap | InterfaceKind::ApBridged
                ) {
                    return false;
                }
                if existing.kind == InterfaceKind::Sta
                    && env.context.is_primary_station(&existing.name)
                {
                    return false;
                }
            }
            return true;
        }
    }

    // Legacy single-radio devices: a foreground-or-above (but not
    // privileged or internal) hotspot request beats the privileged STA,
    // because the chip cannot host both at once.
    if matches!(requested, InterfaceKind::Ap | InterfaceKind::ApBridged)
        && new_tier >= PriorityTier::ForegroundApp
        && !matches!(new_tier, PriorityTier::Privileged | PriorityTier::Internal)
        && existing.kind == InterfaceKind::Sta
        && existing_tier == PriorityTier::Privileged
        && !env.sta_ap_concurrency
    {
        return true;
    }

    false
}

/// Pick `quantity` deletable interfaces of one kind, or `None` if not
/// enough exist. Lower-tier owners go first; within a tier the most
/// recently created interface goes first.
fn select_victims(
    quantity: usize,
    requested: InterfaceKind,
    new_requestor: &WorkSource,
    existing: &[IfaceInfo],
    env: &PolicyEnv<'_>,
) -> Option<Vec<IfaceInfo>> {
    let mut lookup_error = false;
    let mut buckets: BTreeMap<PriorityTier, Vec<IfaceInfo>> = BTreeMap::new();

    // Reverse order so later-created interfaces are considered first.
    for info in existing.iter().rev() {
        let Some(existing_requestor) = info.requestor.as_ref() else {
            warn!(name = %info.name, "no attribution for live interface");
            lookup_error = true;
            break;
        };
        if allowed_to_delete(requested, new_requestor, info, env) {
            let tier = classify(existing_requestor, env.context);
            buckets.entry(tier).or_default().push(info.clone());
        }
    }

    let victims: Vec<IfaceInfo> = if lookup_error {
        warn!("victim selection falling back to arbitrary order");
        existing.iter().take(quantity).cloned().collect()
    } else {
        let mut selected = Vec::with_capacity(quantity);
        'tiers: for bucket in buckets.into_values() {
            for info in bucket {
                if selected.len() == quantity {
                    break 'tiers;
                }
                selected.push(info);
            }
        }
        selected
    };

    if victims.len() < quantity {
        return None;
    }
    Some(victims)
}

/// Pick `quantity` bridged APs whose owners can spare an instance, in
/// creation order, or `None` if not enough can.
fn select_bridged_downgrades(
    quantity: usize,
    bridged: &[IfaceInfo],
    env: &PolicyEnv<'_>,
) -> Option<Vec<IfaceInfo>> {
    let mut selected = Vec::new();
    for info in bridged {
        let Some(owner) = env.ap_owners.get(&info.name) else {
            warn!(name = %info.name, "no registered owner for bridged AP");
            continue;
        };
        if owner.instance_for_removal().is_none() {
            continue;
        }
        selected.push(info.clone());
        if selected.len() >= quantity {
            break;
        }
    }
    if selected.len() < quantity {
        return None;
    }
    Some(selected)
}

// ── Per-combination feasibility ──────────────────────────────────────

/// Can this expanded combination, in this mode, host the request? Returns
/// the cost if yes.
fn combo_supports_request(
    snapshot: &ChipSnapshot,
    mode_id: ChipModeId,
    expanded: &KindCounts,
    requested: InterfaceKind,
    new_requestor: &WorkSource,
    env: &PolicyEnv<'_>,
) -> Option<Proposal> {
    // The combination must allot at least one slot of the requested kind.
    if expanded[requested.idx()] == 0 {
        return None;
    }

    let base = || Proposal {
        chip: Arc::clone(&snapshot.chip),
        chip_id: snapshot.chip_id,
        mode_id,
        current_mode: snapshot.current_mode,
        to_remove: Vec::new(),
        to_downgrade: Vec::new(),
        live_counts: snapshot.counts(),
        chip_ifaces: snapshot.all_ifaces().cloned().collect(),
    };

    let is_mode_switch = snapshot.current_mode.is_some_and(|mode| mode != mode_id);
    if is_mode_switch {
        // Changing modes removes everything on the chip, so it is allowed
        // only if every interface could individually be deleted for this
        // request. All-or-nothing: no downgrade path applies here.
        for kind in InterfaceKind::DISRUPTION_ORDER {
            let existing = snapshot.ifaces_of(kind);
            select_victims(existing.len(), requested, new_requestor, existing, env)?;
        }
        return Some(base());
    }

    let mut proposal = base();
    for kind in InterfaceKind::DISRUPTION_ORDER {
        let existing = snapshot.ifaces_of(kind);
        let mut excess =
            i64::try_from(existing.len()).unwrap_or(i64::MAX) - i64::from(expanded[kind.idx()]);
        if kind == requested {
            excess += 1;
        }
        if excess <= 0 {
            continue;
        }
        let excess = usize::try_from(excess).unwrap_or(usize::MAX);

        // Bridged APs get a downgrade attempt before any deletion: drop an
        // instance into spare single-AP capacity and keep the interface.
        if kind == InterfaceKind::ApBridged {
            let mut spare_single_ap = i64::from(expanded[InterfaceKind::Ap.idx()])
                - i64::try_from(snapshot.ifaces_of(InterfaceKind::Ap).len()).unwrap_or(i64::MAX);
            if requested == InterfaceKind::Ap {
                spare_single_ap -= 1;
            }
            if spare_single_ap >= i64::try_from(excess).unwrap_or(i64::MAX) {
                if let Some(downgrades) = select_bridged_downgrades(excess, existing, env) {
                    proposal.to_downgrade.extend(downgrades);
                    continue;
                }
                debug!("not enough downgradable bridged APs, falling back to deletion");
            }
        }

        let victims = select_victims(excess, requested, new_requestor, existing, env)?;
        proposal.to_remove.extend(victims);
    }
    Some(proposal)
}

/// True if `candidate` is strictly less disruptive than `incumbent`:
/// fewer removals compared kind-by-kind in disruption order, then fewer
/// downgrades. Equal proposals keep the incumbent.
fn proposal_is_better(candidate: &Proposal, incumbent: &Proposal) -> bool {
    let candidate_removed = candidate.removal_counts();
    let incumbent_removed = incumbent.removal_counts();
    for kind in InterfaceKind::DISRUPTION_ORDER {
        if candidate_removed[kind.idx()] != incumbent_removed[kind.idx()] {
            return candidate_removed[kind.idx()] < incumbent_removed[kind.idx()];
        }
    }
    candidate.to_downgrade.len() < incumbent.to_downgrade.len()
}

/// The least disruptive feasible proposal across every chip, mode, and
/// expanded combination, or `None` when the request is infeasible.
pub(crate) fn best_creation_proposal(
    snapshots: &[ChipSnapshot],
    requested: InterfaceKind,
    required_capabilities: CapabilityMask,
    new_requestor: &WorkSource,
    env: &PolicyEnv<'_>,
) -> Option<Proposal> {
    let mut best: Option<Proposal> = None;
    for snapshot in snapshots {
        if !capabilities_satisfy(snapshot.capabilities, required_capabilities) {
            continue;
        }
        for mode in &snapshot.modes {
            for combo in &mode.combinations {
                for expanded in expand_combination(combo) {
                    let Some(proposal) = combo_supports_request(
                        snapshot,
                        mode.id,
                        &expanded,
                        requested,
                        new_requestor,
                        env,
                    ) else {
                        continue;
                    };
                    if best
                        .as_ref()
                        .is_none_or(|incumbent| proposal_is_better(&proposal, incumbent))
                    {
                        best = Some(proposal);
                    }
                }
            }
        }
    }
    if best.is_none() {
        let existing: Vec<String> = snapshots
            .iter()
            .flat_map(ChipSnapshot::all_ifaces)
            .map(|info| format!("{}:{}", info.name, info.kind))
            .collect();
        info!(%requested, ?existing, "no feasible creation proposal");
    }
    best
}
