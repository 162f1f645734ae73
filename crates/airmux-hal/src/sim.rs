// ── In-memory HAL simulator ──
//
// A scriptable implementation of the hardware traits, used by the
// arbiter's test suites and as a hardware-free development target.
// Supports failure injection for the paths the arbiter must handle:
// transient start refusal, interface-creation failure, and mode-configure
// failure. Every mutating call is appended to an op log so tests can
// assert on exactly what reached the "hardware".

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::chip::{Chip, HalEventCallback, WifiHal};
use crate::error::{HalError, HalResult};
use crate::types::{CapabilityMask, ChipId, ChipIfaceType, ChipMode, ChipModeId, InterfaceKind};

/// Static description of one simulated chip.
#[derive(Debug, Clone)]
pub struct SimChipSpec {
    pub id: ChipId,
    /// `None` simulates a chip whose capability bits cannot be read.
    pub capabilities: Option<CapabilityMask>,
    pub modes: Vec<ChipMode>,
}

impl SimChipSpec {
    pub fn new(id: ChipId, modes: Vec<ChipMode>) -> Self {
        Self {
            id,
            capabilities: Some(0),
            modes,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityMask) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_unreadable_capabilities(mut self) -> Self {
        self.capabilities = None;
        self
    }
}

#[derive(Debug, Clone)]
struct SimIface {
    name: String,
    ty: ChipIfaceType,
    instances: Vec<String>,
}

#[derive(Default)]
struct SimChipState {
    current_mode: Option<ChipModeId>,
    ifaces: Vec<SimIface>,
    name_counters: [u32; 4],
    fail_next_create: bool,
    fail_next_configure: bool,
}

struct Shared {
    started: Mutex<bool>,
    op_log: Mutex<Vec<String>>,
}

impl Shared {
    fn log(&self, entry: String) {
        debug!(op = %entry, "sim hal");
        self.op_log.lock().push(entry);
    }

    fn ensure_started(&self) -> HalResult<()> {
        if *self.started.lock() {
            Ok(())
        } else {
            Err(HalError::NotAvailable)
        }
    }
}

/// One simulated chip. Obtained through [`SimHal::chip`].
pub struct SimChip {
    id: ChipId,
    capabilities: Option<CapabilityMask>,
    modes: Vec<ChipMode>,
    state: Mutex<SimChipState>,
    shared: Arc<Shared>,
}

impl SimChip {
    fn alloc_name(state: &mut SimChipState, ty: ChipIfaceType) -> String {
        let slot = match ty {
            ChipIfaceType::Sta => 0,
            ChipIfaceType::Ap => 1,
            ChipIfaceType::P2p => 2,
            ChipIfaceType::Nan => 3,
        };
        let n = state.name_counters[slot];
        state.name_counters[slot] += 1;
        match ty {
            ChipIfaceType::Sta => format!("wlan{n}"),
            ChipIfaceType::Ap => format!("ap{n}"),
            ChipIfaceType::P2p => format!("p2p{n}"),
            ChipIfaceType::Nan => format!("aware{n}"),
        }
    }

    /// Arm a one-shot failure on the next `create_iface` call.
    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    /// Arm a one-shot failure on the next `configure_mode` call.
    pub fn fail_next_configure(&self) {
        self.state.lock().fail_next_configure = true;
    }
}

impl Chip for SimChip {
    fn id(&self) -> ChipId {
        self.id
    }

    fn current_mode(&self) -> HalResult<Option<ChipModeId>> {
        self.shared.ensure_started()?;
        Ok(self.state.lock().current_mode)
    }

    fn available_modes(&self) -> HalResult<Vec<ChipMode>> {
        self.shared.ensure_started()?;
        Ok(self.modes.clone())
    }

    fn capabilities(&self) -> HalResult<CapabilityMask> {
        self.shared.ensure_started()?;
        self.capabilities.ok_or(HalError::NotSupported)
    }

    fn configure_mode(&self, mode: ChipModeId) -> HalResult<()> {
        self.shared.ensure_started()?;
        let mut state = self.state.lock();
        if state.fail_next_configure {
            state.fail_next_configure = false;
            return Err(HalError::Failure("injected configure failure".into()));
        }
        if !self.modes.iter().any(|m| m.id == mode) {
            return Err(HalError::Failure(format!("chip {} has no mode {mode}", self.id)));
        }
        // A mode switch resets the chip; anything still live is gone.
        state.ifaces.clear();
        state.current_mode = Some(mode);
        self.shared.log(format!("chip{} configure mode{mode}", self.id));
        Ok(())
    }

    fn iface_names(&self, ty: ChipIfaceType) -> HalResult<Vec<String>> {
        self.shared.ensure_started()?;
        Ok(self
            .state
            .lock()
            .ifaces
            .iter()
            .filter(|iface| iface.ty == ty)
            .map(|iface| iface.name.clone())
            .collect())
    }

    fn bridged_instances(&self, name: &str) -> HalResult<Vec<String>> {
        self.shared.ensure_started()?;
        let state = self.state.lock();
        let iface = state
            .ifaces
            .iter()
            .find(|iface| iface.name == name && iface.ty == ChipIfaceType::Ap)
            .ok_or_else(|| HalError::InvalidIface(name.into()))?;
        Ok(iface.instances.clone())
    }

    fn create_iface(&self, kind: InterfaceKind) -> HalResult<String> {
        self.shared.ensure_started()?;
        let mut state = self.state.lock();
        if state.fail_next_create {
            state.fail_next_create = false;
            return Err(HalError::Failure("injected create failure".into()));
        }
        let ty = kind.chip_type();
        let name = Self::alloc_name(&mut state, ty);
        let instances = if kind == InterfaceKind::ApBridged {
            vec![format!("{name}.0"), format!("{name}.1")]
        } else if kind == InterfaceKind::Ap {
            vec![name.clone()]
        } else {
            Vec::new()
        };
        state.ifaces.push(SimIface {
            name: name.clone(),
            ty,
            instances,
        });
        self.shared.log(format!("chip{} create {kind} {name}", self.id));
        Ok(name)
    }

    fn remove_iface(&self, ty: ChipIfaceType, name: &str) -> HalResult<()> {
        self.shared.ensure_started()?;
        let mut state = self.state.lock();
        let before = state.ifaces.len();
        state
            .ifaces
            .retain(|iface| !(iface.ty == ty && iface.name == name));
        if state.ifaces.len() == before {
            return Err(HalError::InvalidIface(name.into()));
        }
        self.shared.log(format!("chip{} remove {name}", self.id));
        Ok(())
    }

    fn remove_bridged_instance(&self, name: &str, instance: &str) -> HalResult<()> {
        self.shared.ensure_started()?;
        let mut state = self.state.lock();
        let iface = state
            .ifaces
            .iter_mut()
            .find(|iface| iface.name == name && iface.ty == ChipIfaceType::Ap)
            .ok_or_else(|| HalError::InvalidIface(name.into()))?;
        let before = iface.instances.len();
        iface.instances.retain(|i| i != instance);
        if iface.instances.len() == before {
            return Err(HalError::InvalidIface(format!("{name}/{instance}")));
        }
        self.shared
            .log(format!("chip{} downgrade {name} drop {instance}", self.id));
        Ok(())
    }
}

/// Scriptable in-memory Wi-Fi service.
pub struct SimHal {
    chips: Vec<Arc<SimChip>>,
    shared: Arc<Shared>,
    callbacks: Mutex<Vec<Arc<dyn HalEventCallback>>>,
    refuse_starts: Mutex<u32>,
}

impl SimHal {
    pub fn new(specs: Vec<SimChipSpec>) -> Self {
        let shared = Arc::new(Shared {
            started: Mutex::new(false),
            op_log: Mutex::new(Vec::new()),
        });
        let chips = specs
            .into_iter()
            .map(|spec| {
                Arc::new(SimChip {
                    id: spec.id,
                    capabilities: spec.capabilities,
                    modes: spec.modes,
                    state: Mutex::new(SimChipState::default()),
                    shared: Arc::clone(&shared),
                })
            })
            .collect();
        Self {
            chips,
            shared,
            callbacks: Mutex::new(Vec::new()),
            refuse_starts: Mutex::new(0),
        }
    }

    /// Refuse the next `n` start attempts with `NotAvailable`.
    pub fn refuse_starts(&self, n: u32) {
        *self.refuse_starts.lock() = n;
    }

    /// Direct handle to a simulated chip for failure injection.
    pub fn sim_chip(&self, id: ChipId) -> Option<Arc<SimChip>> {
        self.chips.iter().find(|chip| chip.id == id).cloned()
    }

    /// Everything that reached the "hardware", in order.
    pub fn op_log(&self) -> Vec<String> {
        self.shared.op_log.lock().clone()
    }

    /// Fire a subsystem-restart event at the registered callbacks.
    pub fn trigger_subsystem_restart(&self, reason: &str) {
        for callback in &*self.callbacks.lock() {
            callback.on_subsystem_restart(reason);
        }
    }
}

impl WifiHal for SimHal {
    fn is_initialized(&self) -> bool {
        true
    }

    fn is_started(&self) -> bool {
        *self.shared.started.lock()
    }

    fn start(&self) -> HalResult<()> {
        {
            let mut refuse = self.refuse_starts.lock();
            if *refuse > 0 {
                *refuse -= 1;
                return Err(HalError::NotAvailable);
            }
        }
        *self.shared.started.lock() = true;
        self.shared.log("start".into());
        for callback in &*self.callbacks.lock() {
            callback.on_start();
        }
        Ok(())
    }

    fn stop(&self) -> HalResult<()> {
        if !*self.shared.started.lock() {
            return Ok(());
        }
        for chip in &self.chips {
            let mut state = chip.state.lock();
            state.ifaces.clear();
            state.current_mode = None;
        }
        *self.shared.started.lock() = false;
        self.shared.log("stop".into());
        // Stopping invalidates service callbacks, same as the real thing;
        // consumers must re-register.
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback.on_stop();
        }
        Ok(())
    }

    fn invalidate(&self) {
        self.shared.log("invalidate".into());
    }

    fn chip_ids(&self) -> HalResult<Vec<ChipId>> {
        self.shared.ensure_started()?;
        Ok(self.chips.iter().map(|chip| chip.id).collect())
    }

    fn chip(&self, id: ChipId) -> HalResult<Arc<dyn Chip>> {
        self.shared.ensure_started()?;
        self.chips
            .iter()
            .find(|chip| chip.id == id)
            .map(|chip| Arc::clone(chip) as Arc<dyn Chip>)
            .ok_or(HalError::InvalidChip(id))
    }

    fn register_event_callback(&self, callback: Arc<dyn HalEventCallback>) -> bool {
        self.callbacks.lock().push(callback);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{ConcurrencyCombination, ConcurrencyLimit};

    fn single_sta_ap_hal() -> SimHal {
        let mode = ChipMode::new(
            0,
            vec![ConcurrencyCombination::new(vec![
                ConcurrencyLimit::new(vec![InterfaceKind::Sta], 1),
                ConcurrencyLimit::new(vec![InterfaceKind::Ap], 1),
            ])],
        );
        SimHal::new(vec![SimChipSpec::new(0, vec![mode]).with_capabilities(0b11)])
    }

    #[test]
    fn chip_ops_require_start() {
        let hal = single_sta_ap_hal();
        assert_eq!(hal.chip_ids(), Err(HalError::NotAvailable));

        hal.start().unwrap();
        assert_eq!(hal.chip_ids().unwrap(), vec![0]);
    }

    #[test]
    fn refused_starts_then_success() {
        let hal = single_sta_ap_hal();
        hal.refuse_starts(2);
        assert_eq!(hal.start(), Err(HalError::NotAvailable));
        assert_eq!(hal.start(), Err(HalError::NotAvailable));
        hal.start().unwrap();
        assert!(hal.is_started());
    }

    #[test]
    fn create_list_remove_cycle() {
        let hal = single_sta_ap_hal();
        hal.start().unwrap();
        let chip = hal.chip(0).unwrap();
        chip.configure_mode(0).unwrap();

        let sta = chip.create_iface(InterfaceKind::Sta).unwrap();
        assert_eq!(sta, "wlan0");
        assert_eq!(chip.iface_names(ChipIfaceType::Sta).unwrap(), vec!["wlan0"]);

        chip.remove_iface(ChipIfaceType::Sta, &sta).unwrap();
        assert!(chip.iface_names(ChipIfaceType::Sta).unwrap().is_empty());
        assert_eq!(
            chip.remove_iface(ChipIfaceType::Sta, "wlan0"),
            Err(HalError::InvalidIface("wlan0".into()))
        );
    }

    #[test]
    fn bridged_ap_has_two_instances_and_downgrades() {
        let hal = single_sta_ap_hal();
        hal.start().unwrap();
        let chip = hal.chip(0).unwrap();
        chip.configure_mode(0).unwrap();

        let ap = chip.create_iface(InterfaceKind::ApBridged).unwrap();
        assert_eq!(chip.bridged_instances(&ap).unwrap().len(), 2);

        chip.remove_bridged_instance(&ap, &format!("{ap}.0")).unwrap();
        assert_eq!(chip.bridged_instances(&ap).unwrap().len(), 1);
        // Still listed as an AP on the wire.
        assert_eq!(chip.iface_names(ChipIfaceType::Ap).unwrap(), vec![ap]);
    }

    #[test]
    fn mode_switch_clears_interfaces() {
        let sta_mode = ChipMode::new(
            0,
            vec![ConcurrencyCombination::new(vec![ConcurrencyLimit::new(
                vec![InterfaceKind::Sta],
                1,
            )])],
        );
        let ap_mode = ChipMode::new(
            1,
            vec![ConcurrencyCombination::new(vec![ConcurrencyLimit::new(
                vec![InterfaceKind::Ap],
                1,
            )])],
        );
        let hal = SimHal::new(vec![SimChipSpec::new(0, vec![sta_mode, ap_mode])]);
        hal.start().unwrap();
        let chip = hal.chip(0).unwrap();
        chip.configure_mode(0).unwrap();
        chip.create_iface(InterfaceKind::Sta).unwrap();

        chip.configure_mode(1).unwrap();
        assert!(chip.iface_names(ChipIfaceType::Sta).unwrap().is_empty());
        assert_eq!(chip.current_mode().unwrap(), Some(1));
    }

    #[test]
    fn stop_clears_state_and_callbacks() {
        struct Flag(Mutex<bool>);
        impl HalEventCallback for Flag {
            fn on_stop(&self) {
                *self.0.lock() = true;
            }
        }

        let hal = single_sta_ap_hal();
        let flag = Arc::new(Flag(Mutex::new(false)));
        assert!(hal.register_event_callback(flag.clone()));

        hal.start().unwrap();
        let chip = hal.chip(0).unwrap();
        chip.configure_mode(0).unwrap();
        chip.create_iface(InterfaceKind::Sta).unwrap();

        hal.stop().unwrap();
        assert!(*flag.0.lock());
        assert!(!hal.is_started());

        // Callback was dropped by the stop; a restart fires nothing.
        *flag.0.lock() = false;
        hal.start().unwrap();
        hal.stop().unwrap();
        assert!(!*flag.0.lock());
    }
}
