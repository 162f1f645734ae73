// ── Interface arbiter ──
//
// The facade consumers talk to. One global lock serializes every
// read-modify-write sequence against chip state: snapshot read, cache
// validation, proposal search, and reconfiguration form a single critical
// section. Listener callbacks are collected under the lock and delivered
// after it is released (or posted to their executor), so no caller-owned
// lock can deadlock against ours and no listener can stall a hardware
// operation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use strum::EnumCount as _;
use tracing::{debug, error, info, warn};

use airmux_hal::{
    CAPABILITY_ANY, CapabilityMask, Chip, ChipIfaceType, HalError, HalEventCallback,
    InterfaceKind, WifiHal,
};

use crate::cache::{CacheEntry, InterfaceCache};
use crate::clock::{Clock, MonotonicClock};
use crate::config::ArbiterConfig;
use crate::error::ArbiterError;
use crate::listener::{
    ArbiterEvent, CallbackExecutor, EventListener, ListenerHandle, ListenerRegistry, Registration,
};
use crate::model::{IfaceHandle, StaticChipProfile};
use crate::persist::{CapabilityStore, MemoryStore};
use crate::priority::{
    ConflictPolicy, NoConflictPolicy, PriorityTier, RequestorContext, WorkSource, classify,
};
use crate::proposal::{self, ApOwner, PolicyEnv, Proposal};
use crate::snapshot::{self, ChipSnapshot, IfaceInfo};

// ── Request / response types ─────────────────────────────────────────

/// One interface creation request.
pub struct CreateRequest {
    pub kind: InterfaceKind,
    pub required_capabilities: CapabilityMask,
    pub requestor: WorkSource,
    /// Fired exactly once when the interface is destroyed, on `executor`.
    pub destroyed_listener: Option<Arc<dyn EventListener>>,
    /// Required whenever `destroyed_listener` is set.
    pub executor: Option<Arc<dyn CallbackExecutor>>,
    /// Required for AP kinds: consulted when a later request wants to
    /// downgrade this AP instead of deleting it.
    pub ap_owner: Option<Arc<dyn ApOwner>>,
}

impl CreateRequest {
    pub fn new(kind: InterfaceKind, requestor: WorkSource) -> Self {
        Self {
            kind,
            required_capabilities: CAPABILITY_ANY,
            requestor,
            destroyed_listener: None,
            executor: None,
            ap_owner: None,
        }
    }

    pub fn with_required_capabilities(mut self, capabilities: CapabilityMask) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_destroyed_listener(
        mut self,
        listener: Arc<dyn EventListener>,
        executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        self.destroyed_listener = Some(listener);
        self.executor = Some(executor);
        self
    }

    pub fn with_ap_owner(mut self, owner: Arc<dyn ApOwner>) -> Self {
        self.ap_owner = Some(owner);
        self
    }
}

/// One interface a creation request would destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactedInterface {
    pub kind: InterfaceKind,
    pub requestor: WorkSource,
}

// ── Deferred callback dispatch ───────────────────────────────────────

/// Callbacks collected under the lock, delivered after release.
#[derive(Default)]
struct PendingDispatch {
    items: Vec<(Registration, ArbiterEvent)>,
}

impl PendingDispatch {
    fn push(&mut self, registration: Registration, event: ArbiterEvent) {
        self.items.push((registration, event));
    }

    fn flush(self) {
        for (registration, event) in self.items {
            registration.deliver(&event, false);
        }
    }
}

// ── Internal state ───────────────────────────────────────────────────

struct ArbiterState {
    cache: InterfaceCache,
    ap_owners: HashMap<String, Arc<dyn ApOwner>>,
    /// `None` until first loaded from the capability store.
    static_profiles: Option<Vec<StaticChipProfile>>,
    /// Set once a mode configure has succeeded against a matrix read from
    /// the live driver; from then on the persisted model is trusted.
    combos_confirmed: bool,
    p2p_connected: bool,
}

#[derive(Default)]
struct Registries {
    status: ListenerRegistry,
    restart: ListenerRegistry,
}

struct AdvisoryModel {
    generation: u64,
    profiles: Vec<StaticChipProfile>,
}

/// Displaced-interface record with the policy detail impact queries need.
struct DisplacedIface {
    info: IfaceInfo,
    tier: PriorityTier,
    stale_p2p: bool,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Builder for [`InterfaceArbiter`]. Only the HAL and the requestor
/// context are mandatory; the rest default to inert collaborators.
pub struct ArbiterBuilder {
    hal: Arc<dyn WifiHal>,
    context: Arc<dyn RequestorContext>,
    conflict_policy: Arc<dyn ConflictPolicy>,
    store: Arc<dyn CapabilityStore>,
    clock: Arc<dyn Clock>,
    config: ArbiterConfig,
}

impl ArbiterBuilder {
    pub fn conflict_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn capability_store(mut self, store: Arc<dyn CapabilityStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: ArbiterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<InterfaceArbiter> {
        let arbiter = Arc::new(InterfaceArbiter {
            hal: self.hal,
            context: self.context,
            conflict_policy: self.conflict_policy,
            store: self.store,
            clock: self.clock,
            config: self.config,
            state: Mutex::new(ArbiterState {
                cache: InterfaceCache::default(),
                ap_owners: HashMap::new(),
                static_profiles: None,
                combos_confirmed: false,
                p2p_connected: false,
            }),
            registries: Mutex::new(Registries::default()),
            generation: AtomicU64::new(1),
            advisory: ArcSwapOption::empty(),
            weak_self: Mutex::new(Weak::new()),
        });
        *arbiter.weak_self.lock() = Arc::downgrade(&arbiter);
        arbiter.register_hal_events();
        arbiter
    }
}

// ── The arbiter ──────────────────────────────────────────────────────

/// Arbitrates shared radio hardware interfaces across concurrent
/// requesters, against the chip's declared concurrency combinations.
pub struct InterfaceArbiter {
    hal: Arc<dyn WifiHal>,
    context: Arc<dyn RequestorContext>,
    conflict_policy: Arc<dyn ConflictPolicy>,
    store: Arc<dyn CapabilityStore>,
    clock: Arc<dyn Clock>,
    config: ArbiterConfig,
    state: Mutex<ArbiterState>,
    registries: Mutex<Registries>,
    /// Bumped on every mutating operation; advisory reads stamped with an
    /// older generation are discarded, never reused.
    generation: AtomicU64,
    advisory: ArcSwapOption<AdvisoryModel>,
    weak_self: Mutex<Weak<InterfaceArbiter>>,
}

impl InterfaceArbiter {
    pub fn builder(
        hal: Arc<dyn WifiHal>,
        context: Arc<dyn RequestorContext>,
    ) -> ArbiterBuilder {
        ArbiterBuilder {
            hal,
            context,
            conflict_policy: Arc::new(NoConflictPolicy),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(MonotonicClock::new()),
            config: ArbiterConfig::default(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Whether the vendor service connection is usable at all.
    pub fn is_ready(&self) -> bool {
        self.hal.is_initialized()
    }

    /// Whether the radio subsystem is currently running.
    pub fn is_started(&self) -> bool {
        self.hal.is_started()
    }

    /// Start the radio subsystem. `NotAvailable` answers are retried a
    /// bounded number of times with a fixed interval; any other failure is
    /// immediately fatal.
    pub fn start(&self) -> Result<(), ArbiterError> {
        let mut pending = PendingDispatch::default();
        let result = self.start_locked(&mut pending);
        pending.flush();
        result
    }

    fn start_locked(&self, pending: &mut PendingDispatch) -> Result<(), ArbiterError> {
        let mut state = self.state.lock();
        let mut attempts = 0u32;
        loop {
            match self.hal.start() {
                Ok(()) => {
                    if attempts > 0 {
                        info!(attempts, "subsystem started after retries");
                    }
                    self.collect_status(pending);
                    if self.snapshot_chips(&mut state, false).is_none() {
                        error!("subsystem started but chip info is unreadable");
                    }
                    self.bump_generation();
                    return Ok(());
                }
                Err(HalError::NotAvailable) if attempts < self.config.start_retry_attempts => {
                    attempts += 1;
                    warn!(attempt = attempts, "subsystem not yet available, retrying");
                    std::thread::sleep(self.config.start_retry_interval);
                }
                Err(HalError::NotAvailable) => {
                    error!(attempts, "subsystem stayed unavailable; giving up");
                    return Err(ArbiterError::StartTimedOut {
                        attempts: attempts + 1,
                    });
                }
                Err(e) => {
                    error!(error = %e, "subsystem start failed");
                    return Err(ArbiterError::Hardware(e));
                }
            }
        }
    }

    /// Stop the radio subsystem. Every live interface is destroyed and
    /// every destruction listener fired exactly once.
    pub fn stop(&self) {
        let mut pending = PendingDispatch::default();
        {
            let mut state = self.state.lock();
            if let Err(e) = self.hal.stop() {
                warn!(error = %e, "hal stop failed");
            }
            self.teardown_local(&mut state, &mut pending);
            self.collect_status(&mut pending);
            self.hal.invalidate();
            // The stop invalidated service callbacks; re-register.
            self.register_hal_events();
        }
        pending.flush();
    }

    /// Record whether P2P currently has an active connection. Feeds the
    /// idle-P2P reclamation rule.
    pub fn note_p2p_connection_state(&self, connected: bool) {
        self.state.lock().p2p_connected = connected;
    }

    // ── Listener registration ────────────────────────────────────────

    /// Register a manager status listener; poll `is_started`/`is_ready`
    /// when it fires. Duplicate registration is ignored with a warning.
    /// `executor == None` delivers inline from the triggering thread.
    pub fn register_status_listener(
        &self,
        listener: Arc<dyn EventListener>,
        executor: Option<Arc<dyn CallbackExecutor>>,
    ) -> Option<ListenerHandle> {
        self.registries.lock().status.register(listener, executor)
    }

    pub fn deregister_status_listener(&self, handle: ListenerHandle) -> bool {
        self.registries.lock().status.deregister(handle)
    }

    /// Register a listener for vendor-service restarts.
    pub fn register_subsystem_restart_listener(
        &self,
        listener: Arc<dyn EventListener>,
        executor: Option<Arc<dyn CallbackExecutor>>,
    ) -> Option<ListenerHandle> {
        self.registries.lock().restart.register(listener, executor)
    }

    pub fn deregister_subsystem_restart_listener(&self, handle: ListenerHandle) -> bool {
        self.registries.lock().restart.deregister(handle)
    }

    // ── Interface creation / removal ─────────────────────────────────

    /// Create an interface, tearing down or downgrading lower-priority
    /// interfaces if the concurrency matrix requires it.
    ///
    /// [`ArbiterError::NoCapacity`] is ordinary control flow: the request
    /// is infeasible and nothing was touched.
    pub fn create_interface(
        &self,
        request: &CreateRequest,
    ) -> Result<IfaceHandle, ArbiterError> {
        if request.destroyed_listener.is_some() && request.executor.is_none() {
            error!("destruction listener supplied without an executor");
            return Err(ArbiterError::InvalidArgument(
                "a destroyed listener requires an executor",
            ));
        }
        if matches!(request.kind, InterfaceKind::Ap | InterfaceKind::ApBridged)
            && request.ap_owner.is_none()
        {
            error!("AP creation without an owner");
            return Err(ArbiterError::InvalidArgument(
                "AP creation requires an ap_owner",
            ));
        }

        let mut pending = PendingDispatch::default();
        let result = self.create_locked(request, &mut pending);
        pending.flush();
        result
    }

    fn create_locked(
        &self,
        request: &CreateRequest,
        pending: &mut PendingDispatch,
    ) -> Result<IfaceHandle, ArbiterError> {
        let mut state = self.state.lock();
        if !self.hal.is_started() {
            return Err(ArbiterError::NotStarted);
        }

        let Some(mut snapshots) = self.snapshot_chips(&mut state, false) else {
            error!("no chip information; shutting the subsystem down");
            self.fail_fast(&mut state, pending);
            return Err(ArbiterError::Hardware(HalError::NotAvailable));
        };
        if !state.cache.validate_and_backfill(&mut snapshots) {
            error!("interface cache diverged from hardware; shutting down");
            self.fail_fast(&mut state, pending);
            return Err(ArbiterError::CacheMismatch);
        }

        let best = {
            let env = self.policy_env(&state, &snapshots);
            proposal::best_creation_proposal(
                &snapshots,
                request.kind,
                request.required_capabilities,
                &request.requestor,
                &env,
            )
        };
        let Some(best) = best else {
            return Err(ArbiterError::NoCapacity { kind: request.kind });
        };
        debug!(proposal = ?best, "accepted creation proposal");

        match self.execute_reconfiguration(&mut state, &best, request.kind, pending) {
            Err(e) => {
                error!(error = %e, "chip reconfiguration failed; tearing down local state");
                self.hal.invalidate();
                self.teardown_local(&mut state, pending);
                Err(ArbiterError::Hardware(e))
            }
            Ok(name) => {
                let mut entry = CacheEntry {
                    chip: Arc::clone(&best.chip),
                    chip_id: best.chip_id,
                    name: name.clone(),
                    chip_type: request.kind.chip_type(),
                    kind: request.kind,
                    creation_time_ms: self.clock.elapsed_millis(),
                    requestor: request.requestor.clone(),
                    destroyed_listeners: Vec::new(),
                };
                if let Some(listener) = &request.destroyed_listener {
                    entry.add_destroyed_listener(Registration {
                        listener: Arc::clone(listener),
                        executor: request.executor.clone(),
                    });
                }
                state.cache.insert(entry);
                if let Some(owner) = &request.ap_owner {
                    state.ap_owners.insert(name.clone(), Arc::clone(owner));
                }
                self.bump_generation();
                info!(%name, kind = %request.kind, "interface created");
                Ok(IfaceHandle {
                    chip_id: best.chip_id,
                    name,
                    kind: request.kind,
                })
            }
        }
    }

    /// Release an interface. Fires its destruction listeners exactly once.
    /// Returns whether the hardware removal succeeded.
    pub fn remove_interface(&self, handle: &IfaceHandle) -> bool {
        let mut pending = PendingDispatch::default();
        let removed = {
            let mut state = self.state.lock();
            let ty = handle.chip_type();
            let chip = match state.cache.get(&handle.name, ty) {
                Some(entry) => Arc::clone(&entry.chip),
                None => match self.hal.chip(handle.chip_id) {
                    Ok(chip) => chip,
                    Err(e) => {
                        error!(%handle, error = %e, "remove: no chip for handle");
                        return false;
                    }
                },
            };
            let ok = Self::remove_iface_locked(&mut state, &chip, &handle.name, ty, &mut pending);
            self.bump_generation();
            ok
        };
        pending.flush();
        removed
    }

    /// Swap the attribution of a live interface. Cache-only mutation.
    pub fn replace_requestor(&self, handle: &IfaceHandle, requestor: WorkSource) -> bool {
        let mut state = self.state.lock();
        match state.cache.get_mut(&handle.name, handle.chip_type()) {
            Some(entry) => {
                entry.requestor = requestor;
                true
            }
            None => {
                warn!(%handle, "replace_requestor: unknown interface");
                false
            }
        }
    }

    // ── Advisory queries (lock-free fast path, staleness accepted) ───

    /// The set of interface kinds this device can create in some mode.
    pub fn supported_kinds(&self) -> BTreeSet<InterfaceKind> {
        proposal::supported_kinds(&self.advisory_profiles())
    }

    /// Whether the declared combinations cover the requested simultaneous
    /// counts. Pure capability question; ignores live state and priority.
    pub fn can_device_support_combo(&self, counts: &[(InterfaceKind, u32)]) -> bool {
        let mut want = [0u32; InterfaceKind::COUNT];
        for (kind, n) in counts {
            want[kind.idx()] += n;
        }
        proposal::device_supports_counts(&self.advisory_profiles(), &want)
    }

    // ── Impact queries ───────────────────────────────────────────────

    /// Whether `requestor` could obtain an interface of `kind` right now.
    pub fn can_create(
        &self,
        kind: InterfaceKind,
        required_capabilities: CapabilityMask,
        requestor: &WorkSource,
    ) -> bool {
        self.displaced_for_request(kind, true, required_capabilities, requestor)
            .is_ok()
    }

    /// What creating `kind` would destroy, without committing to anything.
    ///
    /// An empty list means the interface can be created for free;
    /// [`ArbiterError::NoCapacity`] means it cannot be created at all.
    /// With `query_for_new == false`, an already-live interface of the
    /// requested kind short-circuits to an empty list.
    pub fn report_impact(
        &self,
        kind: InterfaceKind,
        query_for_new: bool,
        requestor: &WorkSource,
    ) -> Result<Vec<ImpactedInterface>, ArbiterError> {
        let displaced =
            self.displaced_for_request_full(kind, query_for_new, CAPABILITY_ANY, requestor)?;
        Ok(displaced
            .into_iter()
            .map(|d| ImpactedInterface {
                kind: d.info.kind,
                requestor: d.info.requestor.unwrap_or_default(),
            })
            .collect())
    }

    /// Whether creating `kind` would destroy an interface owned by a
    /// privileged requestor (stale disconnected P2P does not count).
    pub fn creating_will_displace_privileged(
        &self,
        kind: InterfaceKind,
        requestor: &WorkSource,
    ) -> bool {
        match self.displaced_for_request_full(kind, true, CAPABILITY_ANY, requestor) {
            Err(_) => false,
            Ok(displaced) => displaced
                .iter()
                .any(|d| d.tier == PriorityTier::Privileged && !d.stale_p2p),
        }
    }

    fn displaced_for_request(
        &self,
        kind: InterfaceKind,
        query_for_new: bool,
        required_capabilities: CapabilityMask,
        requestor: &WorkSource,
    ) -> Result<(), ArbiterError> {
        self.displaced_for_request_full(kind, query_for_new, required_capabilities, requestor)
            .map(|_| ())
    }

    fn displaced_for_request_full(
        &self,
        kind: InterfaceKind,
        query_for_new: bool,
        required_capabilities: CapabilityMask,
        requestor: &WorkSource,
    ) -> Result<Vec<DisplacedIface>, ArbiterError> {
        let mut pending = PendingDispatch::default();
        let result = (|| {
            let mut state = self.state.lock();
            if !self.hal.is_initialized() || !self.hal.is_started() {
                return Err(ArbiterError::NotStarted);
            }
            let Some(mut snapshots) = self.snapshot_chips(&mut state, false) else {
                error!("impact query: no chip information; shutting down");
                self.fail_fast(&mut state, &mut pending);
                return Err(ArbiterError::Hardware(HalError::NotAvailable));
            };
            if !state.cache.validate_and_backfill(&mut snapshots) {
                error!("impact query: cache diverged; shutting down");
                self.fail_fast(&mut state, &mut pending);
                return Err(ArbiterError::CacheMismatch);
            }

            if !query_for_new
                && snapshots
                    .iter()
                    .any(|snap| !snap.ifaces_of(kind).is_empty())
            {
                return Ok(Vec::new());
            }

            let env = self.policy_env(&state, &snapshots);
            let Some(best) = proposal::best_creation_proposal(
                &snapshots,
                kind,
                required_capabilities,
                requestor,
                &env,
            ) else {
                return Err(ArbiterError::NoCapacity { kind });
            };

            Ok(best
                .displaced()
                .into_iter()
                .map(|info| {
                    let tier = info
                        .requestor
                        .as_ref()
                        .map_or(PriorityTier::Background, |ws| classify(ws, env.context));
                    let stale_p2p = proposal::is_disconnected_p2p(&info, &env);
                    DisplacedIface {
                        info,
                        tier,
                        stale_p2p,
                    }
                })
                .collect())
        })();
        pending.flush();
        result
    }

    // ── Internals ────────────────────────────────────────────────────

    fn policy_env<'a>(
        &'a self,
        state: &'a ArbiterState,
        snapshots: &[ChipSnapshot],
    ) -> PolicyEnv<'a> {
        // The legacy single-radio rule needs to know whether the declared
        // matrix allows STA+AP at the same time.
        let mut sta_ap = [0u32; InterfaceKind::COUNT];
        sta_ap[InterfaceKind::Sta.idx()] = 1;
        sta_ap[InterfaceKind::Ap.idx()] = 1;
        let profile_view = snapshot::to_static_profiles(snapshots);
        let sta_ap_concurrency = proposal::device_supports_counts(&profile_view, &sta_ap);

        PolicyEnv {
            context: self.context.as_ref(),
            conflict_policy: self.conflict_policy.as_ref(),
            cache: &state.cache,
            ap_owners: &state.ap_owners,
            clock: self.clock.as_ref(),
            config: &self.config,
            p2p_connected: state.p2p_connected,
            sta_ap_concurrency,
        }
    }

    fn load_static_profiles(&self, state: &mut ArbiterState) -> Vec<StaticChipProfile> {
        if state.static_profiles.is_none() {
            let profiles = match self.store.load() {
                Ok(profiles) => profiles,
                Err(e) => {
                    warn!(error = %e, "could not load persisted capability model");
                    Vec::new()
                }
            };
            if !profiles.is_empty() {
                debug!(chips = profiles.len(), "capability model loaded from store");
            }
            state.static_profiles = Some(profiles);
        }
        state.static_profiles.clone().unwrap_or_default()
    }

    fn snapshot_chips(
        &self,
        state: &mut ArbiterState,
        force_from_hardware: bool,
    ) -> Option<Vec<ChipSnapshot>> {
        let profiles = self.load_static_profiles(state);
        snapshot::read_all_chips(self.hal.as_ref(), &profiles, force_from_hardware)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    fn advisory_profiles(&self) -> Vec<StaticChipProfile> {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(model) = self.advisory.load_full() {
            if model.generation == generation {
                return model.profiles.clone();
            }
        }

        let mut state = self.state.lock();
        let mut profiles = self.load_static_profiles(&mut state);
        if profiles.is_empty() {
            if let Some(snapshots) = self.snapshot_chips(&mut state, false) {
                profiles = snapshot::to_static_profiles(&snapshots);
            }
        }
        drop(state);

        self.advisory.store(Some(Arc::new(AdvisoryModel {
            generation,
            profiles: profiles.clone(),
        })));
        profiles
    }

    fn collect_status(&self, pending: &mut PendingDispatch) {
        for registration in self.registries.lock().status.registrations() {
            pending.push(registration, ArbiterEvent::StatusChanged);
        }
    }

    fn destroyed_event(entry: &CacheEntry) -> ArbiterEvent {
        ArbiterEvent::InterfaceDestroyed {
            name: entry.name.clone(),
            kind: entry.kind,
        }
    }

    /// Remove one interface: post other-context destruction listeners to
    /// the front of their queues before the hardware call (so the owner
    /// observes the loss before anything it queued afterwards), issue the
    /// removal, then hand the remaining listeners to `pending` and purge
    /// the cache entry.
    fn remove_iface_locked(
        state: &mut ArbiterState,
        chip: &Arc<dyn Chip>,
        name: &str,
        ty: ChipIfaceType,
        pending: &mut PendingDispatch,
    ) -> bool {
        debug!(%name, ?ty, "removing interface");
        if let Some(entry) = state.cache.get_mut(name, ty) {
            let event = Self::destroyed_event(entry);
            entry.destroyed_listeners.retain(|registration| {
                if registration.runs_inline_here() {
                    true
                } else {
                    registration.deliver(&event, true);
                    false
                }
            });
        } else {
            warn!(%name, "no cache entry for interface being removed");
        }

        let result = chip.remove_iface(ty, name);

        if let Some(entry) = state.cache.remove(name, ty) {
            let event = Self::destroyed_event(&entry);
            for registration in entry.destroyed_listeners {
                pending.push(registration, event.clone());
            }
        }
        state.ap_owners.remove(name);

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(%name, error = %e, "hardware interface removal failed");
                false
            }
        }
    }

    fn downgrade_bridged_ap(
        state: &mut ArbiterState,
        chip: &Arc<dyn Chip>,
        name: &str,
    ) -> Result<(), HalError> {
        let instance = state
            .ap_owners
            .get(name)
            .and_then(|owner| owner.instance_for_removal());
        let Some(instance) = instance else {
            return Err(HalError::Failure(format!(
                "bridged AP {name} has no removable instance"
            )));
        };
        info!(%name, %instance, "downgrading bridged AP");
        chip.remove_bridged_instance(name, &instance)?;
        if let Some(entry) = state.cache.get_mut(name, ChipIfaceType::Ap) {
            entry.kind = InterfaceKind::Ap;
        }
        Ok(())
    }

    /// Apply a proposal: remove or downgrade what it names, switch the
    /// chip mode if needed, create the new interface.
    fn execute_reconfiguration(
        &self,
        state: &mut ArbiterState,
        best: &Proposal,
        kind: InterfaceKind,
        pending: &mut PendingDispatch,
    ) -> Result<String, HalError> {
        if best.needs_configure() {
            info!(
                chip_id = best.chip_id,
                from = ?best.current_mode,
                to = best.mode_id,
                "chip mode change"
            );
            // Everything on the chip goes away before the mode switch.
            // Individual removal failures only affect bookkeeping; the
            // configure call decides the fate of the operation.
            for info in &best.chip_ifaces {
                let _ = Self::remove_iface_locked(
                    state,
                    &best.chip,
                    &info.name,
                    info.kind.chip_type(),
                    pending,
                );
            }

            let configure_result = best.chip.configure_mode(best.mode_id);

            if !state.combos_confirmed {
                // The declared matrix is only trustworthy once a configure
                // has succeeded against it; re-read from the driver and
                // persist what it says now.
                match snapshot::read_all_chips(self.hal.as_ref(), &[], true) {
                    Some(snapshots) => {
                        let profiles = snapshot::to_static_profiles(&snapshots);
                        if let Err(e) = self.store.save(&profiles) {
                            warn!(error = %e, "could not persist capability model");
                        }
                        state.static_profiles = Some(profiles);
                        if configure_result.is_ok() {
                            info!("concurrency matrix confirmed from driver");
                            state.combos_confirmed = true;
                        }
                    }
                    None => error!("could not re-read chip info for confirmation"),
                }
            }
            configure_result?;
        } else {
            for info in &best.to_remove {
                let _ = Self::remove_iface_locked(
                    state,
                    &best.chip,
                    &info.name,
                    info.kind.chip_type(),
                    pending,
                );
            }
            for info in &best.to_downgrade {
                if info.kind != InterfaceKind::ApBridged {
                    continue;
                }
                Self::downgrade_bridged_ap(state, &best.chip, &info.name)?;
            }
        }

        best.chip.create_iface(kind)
    }

    /// Tear down every piece of local state after a stop or fatal error.
    /// Each cached interface's destruction listeners fire exactly once.
    fn teardown_local(&self, state: &mut ArbiterState, pending: &mut PendingDispatch) {
        let entries = state.cache.drain();
        if !entries.is_empty() {
            warn!(count = entries.len(), "tearing down all cached interfaces");
        }
        for entry in entries {
            let event = Self::destroyed_event(&entry);
            for registration in entry.destroyed_listeners {
                pending.push(registration, event.clone());
            }
        }
        state.ap_owners.clear();
        self.bump_generation();
    }

    /// Full stop-and-teardown after a fatal error, then callback
    /// re-registration so later events still reach us.
    fn fail_fast(&self, state: &mut ArbiterState, pending: &mut PendingDispatch) {
        if let Err(e) = self.hal.stop() {
            warn!(error = %e, "stop after fatal error also failed");
        }
        self.teardown_local(state, pending);
        self.collect_status(pending);
        self.register_hal_events();
    }

    fn register_hal_events(&self) {
        let callback = Arc::new(HalEvents {
            arbiter: self.weak_self.lock().clone(),
        });
        if !self.hal.register_event_callback(callback) {
            warn!("hal rejected event callback registration");
        }
    }

    fn handle_hal_stop(&self) {
        let mut pending = PendingDispatch::default();
        // If the lock is held, the arbiter itself initiated this stop and
        // performs its own teardown; do nothing here.
        if let Some(mut state) = self.state.try_lock() {
            debug!("hal stop observed; tearing down local state");
            self.teardown_local(&mut state, &mut pending);
            self.collect_status(&mut pending);
        }
        pending.flush();
    }

    fn handle_hal_failure(&self, reason: &str) {
        error!(reason, "hal reported failure");
        let mut pending = PendingDispatch::default();
        if let Some(mut state) = self.state.try_lock() {
            if let Err(e) = self.hal.stop() {
                warn!(error = %e, "stop after hal failure also failed");
            }
            self.teardown_local(&mut state, &mut pending);
            self.collect_status(&mut pending);
            self.register_hal_events();
        }
        pending.flush();
    }

    fn handle_subsystem_restart(&self, reason: &str) {
        warn!(reason, "vendor subsystem restart");
        let registrations = self.registries.lock().restart.registrations();
        for registration in registrations {
            registration.deliver(&ArbiterEvent::SubsystemRestart, false);
        }
    }

    fn handle_hal_start(&self) {
        // A start the arbiter itself issued notifies from `start()`.
        if self.state.is_locked() {
            return;
        }
        let mut pending = PendingDispatch::default();
        self.collect_status(&mut pending);
        pending.flush();
    }
}

struct HalEvents {
    arbiter: Weak<InterfaceArbiter>,
}

impl HalEventCallback for HalEvents {
    fn on_start(&self) {
        if let Some(arbiter) = self.arbiter.upgrade() {
            arbiter.handle_hal_start();
        }
    }

    fn on_stop(&self) {
        if let Some(arbiter) = self.arbiter.upgrade() {
            arbiter.handle_hal_stop();
        }
    }

    fn on_failure(&self, reason: &str) {
        if let Some(arbiter) = self.arbiter.upgrade() {
            arbiter.handle_hal_failure(reason);
        }
    }

    fn on_subsystem_restart(&self, reason: &str) {
        if let Some(arbiter) = self.arbiter.upgrade() {
            arbiter.handle_subsystem_restart(reason);
        }
    }
}
