use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::time::Duration;

use log::{debug, error, info, warn};
use spin::Mutex;

use crate::{
    FirmwareInfo, HubHal, Irq, IrqMask, Mode, Osal, PanicSlot, Reg, RegisterMap, Transport,
    broker::{Broker, RegValue},
    err::*,
    fwlog,
    irq::{DispatchOutcome, IrqHandler, IrqRequest, IrqRestore, IrqTable, IrqWork},
    panic::{PanicOutcome, PanicSequencer, PanicState},
    registry::{InitCall, InitCallRegistry, PanicHandler, PanicRegistry},
    reset::{self, HubVariant},
};

/// Firmware version reported while the hub is not running its main program.
pub const FIRMWARE_VERSION_UNKNOWN: u16 = 0xFFFF;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Ask the firmware loader to flash even when versions match.
    pub force_upgrade: bool,
    pub variant: HubVariant,
    /// Wait between the panic reset and the firmware reload.
    pub panic_settle: Duration,
    pub register_map: RegisterMap,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            force_upgrade: false,
            variant: HubVariant::default(),
            panic_settle: Duration::from_millis(100),
            register_map: RegisterMap::default(),
        }
    }
}

/// Snapshot for status attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub mode: Mode,
    /// [`FIRMWARE_VERSION_UNKNOWN`] unless the hub is in [`Mode::Normal`].
    pub firmware_version: u16,
    /// Firmware has been downloaded at least once since probe.
    pub download_status: bool,
    pub panic_state: PanicState,
    pub recoveries: usize,
}

/// Channel context of one sensor hub.
///
/// Created by [`SensorHub::probe`], shared with every feature driver as an
/// `Arc`. All client operations take `&self`.
pub struct SensorHub {
    broker: Broker,
    irq: IrqTable,
    work: IrqWork,
    panic: PanicSequencer,
    panic_handlers: PanicRegistry,
    initcalls: InitCallRegistry,
    /// Serialises bring-up and teardown.
    lifecycle: Mutex<()>,
    hal: Box<dyn HubHal>,
    osal: Box<dyn Osal>,
    config: HubConfig,
}

impl SensorHub {
    /// Create the channel in [`Mode::Uninitialized`] and pulse the hub reset
    /// line. The hub is not usable until [`initialize`](Self::initialize).
    pub fn probe(
        transport: impl Transport,
        hal: impl HubHal,
        osal: impl Osal,
        config: HubConfig,
    ) -> Arc<Self> {
        let hub = Self {
            broker: Broker::new(transport, config.register_map),
            irq: IrqTable::new(),
            work: IrqWork::new(),
            panic: PanicSequencer::new(),
            panic_handlers: PanicRegistry::new(),
            initcalls: InitCallRegistry::new(),
            lifecycle: Mutex::new(()),
            hal: Box::new(hal),
            osal: Box::new(osal),
            config,
        };
        reset::hw_reset(hub.config.variant, hub.hal(), hub.osal());
        info!("sensor hub probed, variant {:?}", hub.config.variant);
        Arc::new(hub)
    }

    /// First firmware bring-up.
    ///
    /// A download failure here is returned to the caller with the hub put
    /// back into boot mode, nothing else is touched. On success every event
    /// is disabled on the hub, the IRQ restore callback is installed, the
    /// init calls run and the hub enters [`Mode::Normal`].
    pub fn initialize(&self) -> Result {
        let _lifecycle = self.lifecycle.lock();
        if self.broker.mode() == Mode::Normal {
            debug!("hub already initialized");
            return Ok(());
        }

        {
            let mut bus = self.broker.lock();
            bus.set_mode(Mode::Boot);
            match self.hal.load_firmware(bus.transport(), self.config.force_upgrade) {
                Ok(fw) => bus.set_firmware(Some(fw)),
                Err(e) => {
                    error!("Failed to load hub firmware: {e}");
                    reset::hw_reset(self.config.variant, self.hal(), self.osal());
                    bus.set_mode(Mode::Uninitialized);
                    return Err(e);
                }
            }
        }

        self.irq.clear_enables(&self.broker)?;
        // replaces anything put there through the raw registry
        self.panic_handlers.unregister(PanicSlot::IrqRestore);
        self.panic_handlers
            .register(PanicSlot::IrqRestore, Arc::new(IrqRestore))?;

        let failed = self.initcalls.drain(self);
        if failed > 0 {
            warn!("{failed} init call(s) failed during hub bring-up");
        }

        self.broker.lock().set_mode(Mode::Normal);
        info!("sensor hub up");
        Ok(())
    }

    /// Tear down the interrupt table and the recovery callbacks, then pulse
    /// the hub reset line. Blocks until every running event handler has
    /// returned.
    pub fn remove(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.irq.shutdown();
        if self.broker.mode() == Mode::Normal {
            if let Err(e) = self.irq.clear_enables(&self.broker) {
                warn!("failed to clear hub interrupt enables: {e}");
            }
        }
        self.panic_handlers.clear();
        self.initcalls.reopen();
        while self.work.pop().is_some() {}

        let mut bus = self.broker.lock();
        reset::hw_reset(self.config.variant, self.hal(), self.osal());
        bus.set_mode(Mode::Uninitialized);
        bus.set_firmware(None);
        info!("sensor hub removed");
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn irq_table(&self) -> &IrqTable {
        &self.irq
    }

    pub fn panic_registry(&self) -> &PanicRegistry {
        &self.panic_handlers
    }

    pub fn irq_work(&self) -> &IrqWork {
        &self.work
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn hal(&self) -> &dyn HubHal {
        self.hal.as_ref()
    }

    pub(crate) fn osal(&self) -> &dyn Osal {
        self.osal.as_ref()
    }

    pub fn mode(&self) -> Mode {
        self.broker.mode()
    }

    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.broker.firmware()
    }

    pub fn panic_state(&self) -> PanicState {
        self.panic.state()
    }

    // ---- register access ----

    pub fn get_size(&self, reg: Reg) -> Result<usize> {
        self.broker.get_size(reg)
    }

    pub fn read(&self, reg: Reg) -> Result<Vec<u8>> {
        self.broker.read(reg)
    }

    pub fn read_into(&self, reg: Reg, value: &mut [u8]) -> Result<usize> {
        self.broker.read_into(reg, value)
    }

    pub fn write(&self, reg: Reg, value: &[u8], mask: Option<&[u8]>) -> Result {
        self.broker.write(reg, value, mask)
    }

    pub fn write_1byte(&self, reg: Reg, value: u8, mask: u8) -> Result {
        self.broker.write_1byte(reg, value, mask)
    }

    pub fn read_value<T: RegValue>(&self, reg: Reg) -> Result<T> {
        self.broker.read_value(reg)
    }

    pub fn write_value<T: RegValue>(&self, reg: Reg, value: T) -> Result {
        self.broker.write_value(reg, value)
    }

    pub fn command(&self, bank: u8, cmd: u8, payload: &[u8], response: &mut [u8]) -> Result<usize> {
        self.broker.command(bank, cmd, payload, response)
    }

    // ---- events ----

    pub fn irq_register(&self, irq: Irq, handler: impl IrqHandler) -> Result {
        self.irq.register(irq, handler)
    }

    /// See [`IrqTable::unregister`].
    pub fn irq_unregister(&self, irq: Irq) {
        self.irq.unregister(irq)
    }

    pub fn irq_enable(&self, irq: Irq) -> Result {
        self.irq.enable(&self.broker, irq)
    }

    pub fn irq_disable(&self, irq: Irq) -> Result {
        self.irq.disable(&self.broker, irq)
    }

    pub fn irq_is_enabled(&self, irq: Irq) -> bool {
        self.irq.is_enabled(irq)
    }

    /// Bottom half of the hub interrupt line: read the status registers and
    /// dispatch. A status read that fails the way a dead hub fails goes
    /// straight to the panic check. Refused with
    /// [`HubError::NotInitialized`] before the first bring-up.
    pub fn handle_interrupt(&self) -> Result<DispatchOutcome> {
        if self.broker.mode() == Mode::Uninitialized {
            return Err(HubError::NotInitialized);
        }
        match self.irq.read_pending(&self.broker) {
            Ok(pending) => Ok(self.dispatch_all(pending)),
            Err(e) if e.hints_hub_fault() => {
                warn!("reading hub IRQ status failed: {e}");
                Ok(DispatchOutcome::PanicCheck(self.check_panic()))
            }
            Err(e) => Err(e),
        }
    }

    /// Invoke the handler of every event in `pending`. When no handler ran
    /// at all the interrupt is unexplained and the hub is checked for a
    /// panic, exactly once.
    pub fn dispatch_all(&self, pending: IrqMask) -> DispatchOutcome {
        match self.irq.dispatch_all(self, pending) {
            0 => {
                debug!("no handler for pending {:#06x}", pending.bits());
                DispatchOutcome::PanicCheck(self.check_panic())
            }
            n => DispatchOutcome::Dispatched(n),
        }
    }

    /// Ask the hub whether it panicked, and recover if it did. Safe to call
    /// from any worker context, a concurrent call returns
    /// [`PanicOutcome::InProgress`].
    pub fn check_panic(&self) -> PanicOutcome {
        self.panic.process(self)
    }

    /// Run every queued [`IrqRequest`]. Returns how many were handled.
    pub fn process_work(&self) -> usize {
        let mut handled = 0;
        while let Some(request) = self.work.pop() {
            match request {
                IrqRequest::Interrupt => {
                    if let Err(e) = self.handle_interrupt() {
                        error!("hub interrupt handling failed: {e}");
                    }
                }
                IrqRequest::PanicCheck => {
                    self.check_panic();
                }
            }
            handled += 1;
        }
        handled
    }

    // ---- recovery & bring-up callbacks ----

    /// [`PanicSlot::IrqRestore`] belongs to the hub itself and is refused
    /// with [`HubError::SlotOccupied`].
    pub fn panic_register(&self, slot: PanicSlot, handler: impl PanicHandler) -> Result {
        if slot == PanicSlot::IrqRestore {
            error!("{} is reserved for the hub", slot.name());
            return Err(HubError::SlotOccupied(slot));
        }
        self.panic_handlers.register(slot, Arc::new(handler))
    }

    pub fn panic_unregister(&self, slot: PanicSlot) {
        if slot == PanicSlot::IrqRestore {
            warn!("{} is reserved for the hub, not removed", slot.name());
            return;
        }
        self.panic_handlers.unregister(slot)
    }

    /// Queue `call` for firmware bring-up. If the hub already came up the
    /// call runs right here and its result is returned.
    pub fn register_initcall(&self, call: Arc<dyn InitCall>) -> Result {
        match self.initcalls.register(call) {
            None => Ok(()),
            Some(call) => {
                debug!("hub already up, running init call now");
                call.init(self)
            }
        }
    }

    pub fn unregister_initcall(&self, call: &Arc<dyn InitCall>) {
        self.initcalls.unregister(call)
    }

    // ---- control plane ----

    pub fn status(&self) -> HubStatus {
        let (mode, firmware) = {
            let bus = self.broker.lock();
            (bus.mode(), bus.firmware())
        };
        let firmware_version = match (mode, firmware) {
            (Mode::Normal, Some(fw)) => fw.version,
            _ => FIRMWARE_VERSION_UNKNOWN,
        };
        HubStatus {
            mode,
            firmware_version,
            download_status: firmware.is_some(),
            panic_state: self.panic.state(),
            recoveries: self.panic.recoveries(),
        }
    }

    /// Raw firmware log enable word, two bits per tag.
    pub fn log_levels(&self) -> Result<u64> {
        self.read_value(Reg::LogLogEnable)
    }

    /// Apply `TAG=LEVEL` pairs to the firmware log enable word. Returns the
    /// value written.
    pub fn set_log_levels(&self, pairs: &str) -> Result<u64> {
        let levels = fwlog::apply_log_levels(self.log_levels()?, pairs);
        debug!("hub log levels -> {levels:#018x}");
        self.write_value(Reg::LogLogEnable, levels)?;
        Ok(levels)
    }
}
