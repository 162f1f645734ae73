#![allow(clippy::unwrap_used)]
// End-to-end arbitration scenarios against the in-memory HAL simulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use airmux_core::{
    ApOwner, ArbiterConfig, ArbiterError, ArbiterEvent, CapabilityStore, Clock, CreateRequest,
    EventListener,
    ImpactedInterface, InterfaceArbiter, InterfaceKind, MemoryStore, PriorityTier,
    RequestorContext, WorkSource, WorkTag, WorkerExecutor,
};
use airmux_hal::{
    ChipMode, ConcurrencyCombination, ConcurrencyLimit, SimChipSpec, SimHal, WifiHal,
};

// ── Fixture ─────────────────────────────────────────────────────────

/// Uid bands: 0 internal, 1-9 privileged, 10-19 system, 20-29 foreground
/// service, 30-39 foreground app, everything else background.
#[derive(Default)]
struct BandedContext {
    primary_stations: Vec<String>,
}

impl RequestorContext for BandedContext {
    fn tier_of(&self, tag: &WorkTag) -> PriorityTier {
        match tag.uid {
            0 => PriorityTier::Internal,
            1..=9 => PriorityTier::Privileged,
            10..=19 => PriorityTier::System,
            20..=29 => PriorityTier::ForegroundService,
            30..=39 => PriorityTier::ForegroundApp,
            _ => PriorityTier::Background,
        }
    }

    fn is_primary_station(&self, iface_name: &str) -> bool {
        self.primary_stations.iter().any(|n| n == iface_name)
    }
}

#[derive(Default)]
struct TestClock(AtomicU64);

impl TestClock {
    fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn elapsed_millis(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ArbiterEvent>>,
}

impl EventListener for Recorder {
    fn on_event(&self, event: &ArbiterEvent) {
        self.events.lock().push(event.clone());
    }
}

impl Recorder {
    fn destroyed_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ArbiterEvent::InterfaceDestroyed { .. }))
            .count()
    }
}

#[derive(Default)]
struct TestApOwner {
    instance: Mutex<Option<String>>,
}

impl TestApOwner {
    fn set_removable(&self, instance: impl Into<String>) {
        *self.instance.lock() = Some(instance.into());
    }
}

impl ApOwner for TestApOwner {
    fn instance_for_removal(&self) -> Option<String> {
        self.instance.lock().clone()
    }
}

fn limit(kinds: &[InterfaceKind], max: u32) -> ConcurrencyLimit {
    ConcurrencyLimit::new(kinds.to_vec(), max)
}

fn combo(limits: Vec<ConcurrencyLimit>) -> ConcurrencyCombination {
    ConcurrencyCombination::new(limits)
}

struct Fixture {
    hal: Arc<SimHal>,
    arbiter: Arc<InterfaceArbiter>,
    clock: Arc<TestClock>,
    store: Arc<MemoryStore>,
    executor: Arc<WorkerExecutor>,
}

impl Fixture {
    fn new(specs: Vec<SimChipSpec>) -> Self {
        Self::with_context(specs, BandedContext::default())
    }

    fn with_context(specs: Vec<SimChipSpec>, context: BandedContext) -> Self {
        let hal = Arc::new(SimHal::new(specs));
        let clock = Arc::new(TestClock::default());
        let store = Arc::new(MemoryStore::new());
        let arbiter = InterfaceArbiter::builder(hal.clone(), Arc::new(context))
            .clock(clock.clone())
            .capability_store(store.clone())
            .config(ArbiterConfig {
                disconnected_p2p_grace: Some(Duration::from_millis(1000)),
                ..ArbiterConfig::default()
            })
            .build();
        arbiter.start().unwrap();
        Self {
            hal,
            arbiter,
            clock,
            store,
            executor: WorkerExecutor::spawn("test-callbacks"),
        }
    }

    fn create(
        &self,
        kind: InterfaceKind,
        uid: u32,
    ) -> Result<airmux_core::IfaceHandle, ArbiterError> {
        self.arbiter
            .create_interface(&self.request(kind, uid, None, None))
    }

    fn create_observed(
        &self,
        kind: InterfaceKind,
        uid: u32,
    ) -> (
        Result<airmux_core::IfaceHandle, ArbiterError>,
        Arc<Recorder>,
    ) {
        let recorder = Arc::new(Recorder::default());
        let result = self
            .arbiter
            .create_interface(&self.request(kind, uid, Some(recorder.clone()), None));
        (result, recorder)
    }

    fn request(
        &self,
        kind: InterfaceKind,
        uid: u32,
        recorder: Option<Arc<Recorder>>,
        owner: Option<Arc<TestApOwner>>,
    ) -> CreateRequest {
        let mut request = CreateRequest::new(kind, WorkSource::from_uid(uid));
        if let Some(recorder) = recorder {
            request = request.with_destroyed_listener(recorder, self.executor.clone());
        }
        let needs_owner = matches!(kind, InterfaceKind::Ap | InterfaceKind::ApBridged);
        if let Some(owner) = owner {
            request = request.with_ap_owner(owner);
        } else if needs_owner {
            request = request.with_ap_owner(Arc::new(TestApOwner::default()));
        }
        request
    }

    fn settle(&self) {
        self.executor.flush();
    }
}

// Chip with one mode: up to two STAs.
fn dual_sta_specs() -> Vec<SimChipSpec> {
    vec![SimChipSpec::new(
        0,
        vec![ChipMode::new(
            0,
            vec![combo(vec![limit(&[InterfaceKind::Sta], 2)])],
        )],
    )]
}

// Chip with one mode and one slot that can hold either a STA or a NAN.
fn sta_or_nan_specs() -> Vec<SimChipSpec> {
    vec![SimChipSpec::new(
        0,
        vec![ChipMode::new(
            0,
            vec![combo(vec![limit(
                &[InterfaceKind::Sta, InterfaceKind::Nan],
                1,
            )])],
        )],
    )]
}

// Chip with two exclusive modes: one STA, or one AP.
fn sta_xor_ap_specs() -> Vec<SimChipSpec> {
    vec![SimChipSpec::new(
        0,
        vec![
            ChipMode::new(0, vec![combo(vec![limit(&[InterfaceKind::Sta], 1)])]),
            ChipMode::new(1, vec![combo(vec![limit(&[InterfaceKind::Ap], 1)])]),
        ],
    )]
}

// One mode, two combinations: {1 STA + 1 bridged AP} or {2 STA + 1 AP}.
fn bridged_downgrade_specs() -> Vec<SimChipSpec> {
    vec![SimChipSpec::new(
        0,
        vec![ChipMode::new(
            0,
            vec![
                combo(vec![
                    limit(&[InterfaceKind::Sta], 1),
                    limit(&[InterfaceKind::ApBridged], 1),
                ]),
                combo(vec![
                    limit(&[InterfaceKind::Sta], 2),
                    limit(&[InterfaceKind::Ap], 1),
                ]),
            ],
        )],
    )]
}

// One mode, either a STA or a P2P (two separate combinations).
fn sta_xor_p2p_specs() -> Vec<SimChipSpec> {
    vec![SimChipSpec::new(
        0,
        vec![ChipMode::new(
            0,
            vec![
                combo(vec![limit(&[InterfaceKind::Sta], 1)]),
                combo(vec![limit(&[InterfaceKind::P2p], 1)]),
            ],
        )],
    )]
}

// ── Basic lifecycle ─────────────────────────────────────────────────

#[test]
fn create_and_remove_a_station() {
    let fx = Fixture::new(dual_sta_specs());
    let handle = fx.create(InterfaceKind::Sta, 10).unwrap();
    assert_eq!(handle.name, "wlan0");
    assert_eq!(fx.hal.chip(0).unwrap().iface_names(handle.chip_type()).unwrap().len(), 1);

    assert!(fx.arbiter.remove_interface(&handle));
    assert!(fx.hal.chip(0).unwrap().iface_names(handle.chip_type()).unwrap().is_empty());
    // Second removal: nothing live, nothing cached.
    assert!(!fx.arbiter.remove_interface(&handle));
}

#[test]
fn supported_kinds_reflect_the_declared_matrix() {
    let fx = Fixture::new(bridged_downgrade_specs());
    let kinds: Vec<_> = fx.arbiter.supported_kinds().into_iter().collect();
    assert_eq!(
        kinds,
        vec![InterfaceKind::Sta, InterfaceKind::Ap, InterfaceKind::ApBridged]
    );
    assert!(fx
        .arbiter
        .can_device_support_combo(&[(InterfaceKind::Sta, 2), (InterfaceKind::Ap, 1)]));
    assert!(!fx
        .arbiter
        .can_device_support_combo(&[(InterfaceKind::Sta, 1), (InterfaceKind::Nan, 1)]));
}

#[test]
fn start_retries_transient_unavailability() {
    let hal = Arc::new(SimHal::new(dual_sta_specs()));
    hal.refuse_starts(2);
    let arbiter =
        InterfaceArbiter::builder(hal.clone(), Arc::new(BandedContext::default())).build();
    arbiter.start().unwrap();
    assert!(arbiter.is_started());
}

#[test]
fn start_gives_up_after_bounded_retries() {
    let hal = Arc::new(SimHal::new(dual_sta_specs()));
    hal.refuse_starts(10);
    let arbiter =
        InterfaceArbiter::builder(hal.clone(), Arc::new(BandedContext::default())).build();
    match arbiter.start() {
        Err(ArbiterError::StartTimedOut { attempts }) => assert_eq!(attempts, 4),
        other => panic!("expected StartTimedOut, got {other:?}"),
    }
    assert!(!arbiter.is_started());
}

#[test]
fn create_without_start_is_rejected() {
    let hal = Arc::new(SimHal::new(dual_sta_specs()));
    let arbiter =
        InterfaceArbiter::builder(hal, Arc::new(BandedContext::default())).build();
    let request = CreateRequest::new(InterfaceKind::Sta, WorkSource::from_uid(1));
    assert!(matches!(
        arbiter.create_interface(&request),
        Err(ArbiterError::NotStarted)
    ));
}

#[test]
fn contract_violations_are_rejected_loudly() {
    let fx = Fixture::new(dual_sta_specs());

    // Destruction listener without an executor.
    let mut request = CreateRequest::new(InterfaceKind::Sta, WorkSource::from_uid(1));
    request.destroyed_listener = Some(Arc::new(Recorder::default()));
    assert!(matches!(
        fx.arbiter.create_interface(&request),
        Err(ArbiterError::InvalidArgument(_))
    ));

    // AP creation without an owner.
    let request = CreateRequest::new(InterfaceKind::Ap, WorkSource::from_uid(1));
    assert!(matches!(
        fx.arbiter.create_interface(&request),
        Err(ArbiterError::InvalidArgument(_))
    ));
}

// ── Feasibility and priority ────────────────────────────────────────

#[test]
fn n_plus_one_equal_priority_stations_are_infeasible() {
    let fx = Fixture::new(dual_sta_specs());
    fx.create(InterfaceKind::Sta, 10).unwrap();
    fx.create(InterfaceKind::Sta, 11).unwrap();

    let ops_before = fx.hal.op_log().len();
    let result = fx.create(InterfaceKind::Sta, 12);
    assert!(matches!(
        result,
        Err(ArbiterError::NoCapacity {
            kind: InterfaceKind::Sta
        })
    ));
    // Nothing was touched: no hardware ops, cache unchanged.
    assert_eq!(fx.hal.op_log().len(), ops_before);
    assert_eq!(
        fx.hal.chip(0).unwrap().iface_names(InterfaceKind::Sta.chip_type()).unwrap().len(),
        2
    );
}

#[test]
fn higher_priority_request_preempts_with_exactly_one_callback() {
    let fx = Fixture::new(sta_or_nan_specs());
    let (nan, recorder) = fx.create_observed(InterfaceKind::Nan, 99); // background
    let nan = nan.unwrap();

    // A privileged STA request takes the slot.
    let sta = fx.create(InterfaceKind::Sta, 1).unwrap();
    fx.settle();
    assert_eq!(recorder.destroyed_count(), 1);
    assert_eq!(
        recorder.events.lock().first(),
        Some(&ArbiterEvent::InterfaceDestroyed {
            name: nan.name.clone(),
            kind: InterfaceKind::Nan
        })
    );
    assert_eq!(sta.name, "wlan0");

    // The NAN is gone from hardware too.
    assert!(fx.hal.chip(0).unwrap().iface_names(nan.chip_type()).unwrap().is_empty());
}

#[test]
fn equal_tier_same_kind_first_caller_wins() {
    let fx = Fixture::new(sta_or_nan_specs());
    fx.create(InterfaceKind::Sta, 10).unwrap();
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 11),
        Err(ArbiterError::NoCapacity { .. })
    ));
}

#[test]
fn privileged_cross_kind_is_last_caller_wins() {
    let fx = Fixture::new(sta_xor_ap_specs());
    fx.create(InterfaceKind::Sta, 1).unwrap();
    // Privileged AP versus privileged STA: the later caller wins.
    let ap = fx.create(InterfaceKind::Ap, 2).unwrap();
    assert_eq!(ap.kind, InterfaceKind::Ap);
    assert!(fx.hal.chip(0).unwrap().iface_names(InterfaceKind::Sta.chip_type()).unwrap().is_empty());
}

#[test]
fn privileged_p2p_may_not_evict_privileged_ap() {
    let fx = Fixture::new(vec![SimChipSpec::new(
        0,
        vec![ChipMode::new(
            0,
            vec![
                combo(vec![limit(&[InterfaceKind::Ap], 1)]),
                combo(vec![limit(&[InterfaceKind::P2p], 1)]),
            ],
        )],
    )]);
    fx.create(InterfaceKind::Ap, 1).unwrap();
    assert!(matches!(
        fx.create(InterfaceKind::P2p, 2),
        Err(ArbiterError::NoCapacity { .. })
    ));
}

#[test]
fn privileged_p2p_may_not_evict_the_primary_station() {
    let context = BandedContext {
        primary_stations: vec!["wlan0".into()],
    };
    let fx = Fixture::with_context(sta_xor_p2p_specs(), context);
    fx.create(InterfaceKind::Sta, 1).unwrap(); // becomes wlan0, privileged
    assert!(matches!(
        fx.create(InterfaceKind::P2p, 2),
        Err(ArbiterError::NoCapacity { .. })
    ));
}

#[test]
fn replace_requestor_changes_later_arbitration() {
    let fx = Fixture::new(sta_or_nan_specs());
    let sta = fx.create(InterfaceKind::Sta, 99).unwrap(); // background

    // Promote the owner to privileged; a system NAN request now loses.
    assert!(fx.arbiter.replace_requestor(&sta, WorkSource::from_uid(1)));
    assert!(matches!(
        fx.create(InterfaceKind::Nan, 10),
        Err(ArbiterError::NoCapacity { .. })
    ));
}

// ── Disconnected-P2P reclamation ────────────────────────────────────

#[test]
fn idle_p2p_is_reclaimable_after_the_grace_period() {
    let fx = Fixture::new(sta_xor_p2p_specs());
    let (p2p, recorder) = fx.create_observed(InterfaceKind::P2p, 1); // privileged
    let p2p = p2p.unwrap();

    // Fresh P2P (age 0): a foreground app cannot take the slot.
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 30),
        Err(ArbiterError::NoCapacity { .. })
    ));

    // Past the grace period but connected: still protected.
    fx.clock.advance(2000);
    fx.arbiter.note_p2p_connection_state(true);
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 30),
        Err(ArbiterError::NoCapacity { .. })
    ));

    // Disconnected and past the grace period: reclaimable.
    fx.arbiter.note_p2p_connection_state(false);
    fx.create(InterfaceKind::Sta, 30).unwrap();
    fx.settle();
    assert_eq!(recorder.destroyed_count(), 1);
    assert!(fx.hal.chip(0).unwrap().iface_names(p2p.chip_type()).unwrap().is_empty());
}

// ── Impact queries ──────────────────────────────────────────────────

#[test]
fn impact_queries_are_idempotent_and_pure() {
    let fx = Fixture::new(sta_or_nan_specs());
    fx.create(InterfaceKind::Nan, 99).unwrap(); // background owner

    let ops_before = fx.hal.op_log().len();
    let first = fx
        .arbiter
        .report_impact(InterfaceKind::Sta, true, &WorkSource::from_uid(1))
        .unwrap();
    let second = fx
        .arbiter
        .report_impact(InterfaceKind::Sta, true, &WorkSource::from_uid(1))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![ImpactedInterface {
            kind: InterfaceKind::Nan,
            requestor: WorkSource::from_uid(99),
        }]
    );
    // Queries never touch hardware.
    assert_eq!(fx.hal.op_log().len(), ops_before);

    // The NAN is still there, so a same-kind advisory query that accepts
    // an existing interface reports no impact.
    let existing_ok = fx
        .arbiter
        .report_impact(InterfaceKind::Nan, false, &WorkSource::from_uid(99))
        .unwrap();
    assert!(existing_ok.is_empty());

    assert!(fx
        .arbiter
        .can_create(InterfaceKind::Sta, airmux_core::CAPABILITY_ANY, &WorkSource::from_uid(1)));
    // Background-owned victim: nothing privileged is displaced.
    assert!(!fx
        .arbiter
        .creating_will_displace_privileged(InterfaceKind::Sta, &WorkSource::from_uid(1)));
}

#[test]
fn displacing_a_privileged_owner_is_reported() {
    let fx = Fixture::new(sta_or_nan_specs());
    let nan = fx.create(InterfaceKind::Nan, 99).unwrap();
    fx.arbiter.replace_requestor(&nan, WorkSource::from_uid(1));

    // Privileged STA versus privileged NAN: allowed (cross-kind last
    // caller wins), and it would displace a privileged owner.
    assert!(fx
        .arbiter
        .creating_will_displace_privileged(InterfaceKind::Sta, &WorkSource::from_uid(2)));
}

// ── End-to-end scenarios from the concurrency matrix ────────────────

#[test]
fn mode_change_scenario_sta_then_ap_then_rejected_sta() {
    let fx = Fixture::new(sta_xor_ap_specs());

    // 1. Foreground app STA: succeeds, nothing removed.
    let (sta, sta_recorder) = fx.create_observed(InterfaceKind::Sta, 30);
    let sta = sta.unwrap();
    assert_eq!(sta.name, "wlan0");

    // 2. System AP: full mode-change path. The STA dies with exactly one
    //    callback; the AP appears.
    let ap = fx.create(InterfaceKind::Ap, 10).unwrap();
    fx.settle();
    assert_eq!(sta_recorder.destroyed_count(), 1);
    let log = fx.hal.op_log();
    assert!(log.iter().any(|op| op == "chip0 configure mode1"), "log: {log:?}");
    assert_eq!(
        fx.hal.chip(0).unwrap().iface_names(ap.chip_type()).unwrap(),
        vec![ap.name.clone()]
    );

    // 3. A second system requestor asks for a STA again: equal tier,
    //    different kind, not privileged -- first caller wins, rejected,
    //    nothing changes.
    let ops_before = fx.hal.op_log().len();
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 11),
        Err(ArbiterError::NoCapacity { .. })
    ));
    assert_eq!(fx.hal.op_log().len(), ops_before);
    assert_eq!(
        fx.hal.chip(0).unwrap().iface_names(ap.chip_type()).unwrap(),
        vec![ap.name]
    );
}

#[test]
fn bridged_ap_is_downgraded_not_deleted() {
    let fx = Fixture::new(bridged_downgrade_specs());

    // Privileged STA, then privileged bridged AP.
    fx.create(InterfaceKind::Sta, 1).unwrap();
    let owner = Arc::new(TestApOwner::default());
    let (ap_recorder, ap) = {
        let recorder = Arc::new(Recorder::default());
        let request = fx.request(
            InterfaceKind::ApBridged,
            2,
            Some(recorder.clone()),
            Some(owner.clone()),
        );
        (recorder, fx.arbiter.create_interface(&request).unwrap())
    };
    owner.set_removable(format!("{}.0", ap.name));

    // A second privileged STA fits only in the {2 STA + 1 AP} shape; the
    // bridged AP is downgraded into the spare single-AP slot, not killed.
    let second_sta = fx.create(InterfaceKind::Sta, 3).unwrap();
    fx.settle();

    assert_eq!(ap_recorder.destroyed_count(), 0);
    let chip = fx.hal.chip(0).unwrap();
    assert_eq!(chip.bridged_instances(&ap.name).unwrap().len(), 1);
    assert_eq!(
        chip.iface_names(InterfaceKind::Sta.chip_type()).unwrap().len(),
        2
    );
    assert_eq!(second_sta.kind, InterfaceKind::Sta);

    // Without a removable instance the same request would have failed:
    // the remaining shapes cannot host a third STA.
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 4),
        Err(ArbiterError::NoCapacity { .. })
    ));
}

#[test]
fn bridged_ap_without_removable_instance_blocks_the_downgrade() {
    let fx = Fixture::new(bridged_downgrade_specs());
    fx.create(InterfaceKind::Sta, 1).unwrap();
    // Owner never reports a removable instance.
    let owner = Arc::new(TestApOwner::default());
    let request = fx.request(InterfaceKind::ApBridged, 2, None, Some(owner));
    fx.arbiter.create_interface(&request).unwrap();

    // Equal-privileged STA request: downgrade unavailable, deletion of the
    // bridged AP is allowed (privileged cross-kind, last caller wins), so
    // the proposal falls back to removing it.
    let (result, _) = fx.create_observed(InterfaceKind::Sta, 3);
    result.unwrap();
    let chip = fx.hal.chip(0).unwrap();
    assert!(chip.iface_names(InterfaceKind::Ap.chip_type()).unwrap().is_empty());
}

// ── Capability filtering and persistence ────────────────────────────

#[test]
fn required_capabilities_filter_chips() {
    let sta_mode = ChipMode::new(0, vec![combo(vec![limit(&[InterfaceKind::Sta], 1)])]);
    let fx = Fixture::new(vec![
        SimChipSpec::new(0, vec![sta_mode.clone()]).with_capabilities(0b01),
        SimChipSpec::new(1, vec![sta_mode]).with_capabilities(0b10),
    ]);

    let request = CreateRequest::new(InterfaceKind::Sta, WorkSource::from_uid(10))
        .with_required_capabilities(0b10);
    let handle = fx.arbiter.create_interface(&request).unwrap();
    assert_eq!(handle.chip_id, 1);
}

#[test]
fn unreadable_capabilities_pass_every_filter() {
    let sta_mode = ChipMode::new(0, vec![combo(vec![limit(&[InterfaceKind::Sta], 1)])]);
    let fx = Fixture::new(vec![
        SimChipSpec::new(0, vec![sta_mode]).with_unreadable_capabilities(),
    ]);

    let request = CreateRequest::new(InterfaceKind::Sta, WorkSource::from_uid(10))
        .with_required_capabilities(0xff);
    assert!(fx.arbiter.create_interface(&request).is_ok());
}

#[test]
fn confirmed_matrix_is_persisted_and_reusable() {
    let fx = Fixture::new(sta_xor_ap_specs());
    assert!(fx.store.load().unwrap().is_empty());

    // First creation configures a mode, which confirms and persists the
    // concurrency matrix.
    fx.create(InterfaceKind::Sta, 10).unwrap();
    let profiles = fx.store.load().unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].chip_id, 0);
    assert_eq!(profiles[0].modes.len(), 2);

    // A fresh arbiter sharing the store answers advisory queries from the
    // persisted model without ever touching hardware.
    let cold_hal = Arc::new(SimHal::new(sta_xor_ap_specs()));
    let cold = InterfaceArbiter::builder(cold_hal, Arc::new(BandedContext::default()))
        .capability_store(fx.store.clone())
        .build();
    let kinds: Vec<_> = cold.supported_kinds().into_iter().collect();
    assert_eq!(kinds, vec![InterfaceKind::Sta, InterfaceKind::Ap]);
}

// ── Fatal paths ─────────────────────────────────────────────────────

#[test]
fn cache_divergence_forces_a_full_restart() {
    let fx = Fixture::new(dual_sta_specs());
    let (sta, recorder) = fx.create_observed(InterfaceKind::Sta, 10);
    let sta = sta.unwrap();

    // Something outside the arbiter kills the interface.
    fx.hal
        .chip(0)
        .unwrap()
        .remove_iface(sta.chip_type(), &sta.name)
        .unwrap();

    // The next mutating request detects the divergence, stops the
    // subsystem, and tears everything down -- the listener still fires
    // exactly once.
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 11),
        Err(ArbiterError::CacheMismatch)
    ));
    fx.settle();
    assert_eq!(recorder.destroyed_count(), 1);
    assert!(!fx.arbiter.is_started());

    // The subsystem can be brought back afterwards.
    fx.arbiter.start().unwrap();
    fx.create(InterfaceKind::Sta, 11).unwrap();
}

#[test]
fn creation_failure_tears_down_local_state() {
    let fx = Fixture::new(dual_sta_specs());
    let (_, recorder) = fx.create_observed(InterfaceKind::Sta, 10);

    fx.hal.sim_chip(0).unwrap().fail_next_create();
    assert!(matches!(
        fx.create(InterfaceKind::Sta, 11),
        Err(ArbiterError::Hardware(_))
    ));
    fx.settle();
    // The surviving STA's listener fired during the teardown.
    assert_eq!(recorder.destroyed_count(), 1);
}

#[test]
fn stop_notifies_every_destruction_listener_once() {
    let fx = Fixture::new(dual_sta_specs());
    let (_, first_recorder) = fx.create_observed(InterfaceKind::Sta, 10);
    let (_, second_recorder) = fx.create_observed(InterfaceKind::Sta, 11);

    fx.arbiter.stop();
    fx.settle();
    assert_eq!(first_recorder.destroyed_count(), 1);
    assert_eq!(second_recorder.destroyed_count(), 1);
    assert!(!fx.arbiter.is_started());

    // Stopping again changes nothing.
    fx.arbiter.stop();
    fx.settle();
    assert_eq!(first_recorder.destroyed_count(), 1);
}

// ── Status and restart listeners ────────────────────────────────────

#[test]
fn status_listeners_fire_on_start_and_stop() {
    let hal = Arc::new(SimHal::new(dual_sta_specs()));
    let arbiter =
        InterfaceArbiter::builder(hal, Arc::new(BandedContext::default())).build();

    let recorder = Arc::new(Recorder::default());
    let handle = arbiter
        .register_status_listener(recorder.clone(), None)
        .unwrap();
    // Duplicate registration of the same listener is a no-op.
    assert!(arbiter.register_status_listener(recorder.clone(), None).is_none());

    arbiter.start().unwrap();
    arbiter.stop();
    let status_events = recorder
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, ArbiterEvent::StatusChanged))
        .count();
    assert!(status_events >= 2, "expected start+stop notifications");

    assert!(arbiter.deregister_status_listener(handle));
    let before = recorder.events.lock().len();
    arbiter.start().unwrap();
    assert_eq!(recorder.events.lock().len(), before);
}

#[test]
fn subsystem_restart_listeners_are_notified() {
    let fx = Fixture::new(dual_sta_specs());
    let recorder = Arc::new(Recorder::default());
    fx.arbiter
        .register_subsystem_restart_listener(recorder.clone(), None)
        .unwrap();

    fx.hal.trigger_subsystem_restart("firmware crash");
    assert_eq!(
        recorder.events.lock().clone(),
        vec![ArbiterEvent::SubsystemRestart]
    );
}
