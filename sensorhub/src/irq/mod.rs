//! Interrupt Dispatch Table.
//!
//! One slot per [`Irq`], holding at most one handler and the enable state
//! last written to the hub. The table lock is never held while a handler
//! runs or while the bus is in use.
//!
//! Enable state changes go through a second lock that covers the bus write
//! and the table update together, so the table always matches the hub.
//! Order: enable lock -> bus lock. The enable lock is never taken while the
//! table lock is held.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, error, info, trace, warn};
use spin::Mutex;

mod work;

pub use work::{IrqRequest, IrqWork, WaitWork};

use crate::{
    IRQ_REGISTERS, Irq, IrqMask, SensorHub, broker::Broker, err::*, osal::spin_while,
    panic::PanicOutcome, registry::PanicHandler,
};

pub trait IrqHandler: Send + Sync + 'static {
    fn handle(&self, event: &IrqEvent<'_>);
}

impl<F> IrqHandler for F
where
    F: Fn(&IrqEvent<'_>) + Send + Sync + 'static,
{
    fn handle(&self, event: &IrqEvent<'_>) {
        self(event)
    }
}

/// Passed to a handler for each event it receives.
pub struct IrqEvent<'a> {
    pub hub: &'a SensorHub,
    pub irq: Irq,
    registration: &'a Arc<Registration>,
}

impl IrqEvent<'_> {
    /// Remove the running handler from its slot without waiting for the
    /// current invocation to return.
    pub fn unregister_self(&self) {
        self.hub.irq_table().revoke(self.irq, self.registration);
    }
}

/// Result of one pass over the pending events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Number of handlers invoked.
    Dispatched(usize),
    /// Nothing could be dispatched, the hub was checked for a panic.
    PanicCheck(PanicOutcome),
}

struct Registration {
    handler: Box<dyn IrqHandler>,
    revoked: AtomicBool,
    active: AtomicUsize,
}

impl Registration {
    fn new(handler: impl IrqHandler) -> Self {
        Self {
            handler: Box::new(handler),
            revoked: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        }
    }

    /// Mark an invocation as running, unless the registration was revoked.
    fn enter(&self) -> Option<ActiveGuard<'_>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self);
        if self.revoked.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    fn wait_idle(&self) {
        spin_while(|| self.active.load(Ordering::SeqCst) > 0);
    }
}

struct ActiveGuard<'a>(&'a Registration);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Slot {
    registration: Option<Arc<Registration>>,
    enabled: bool,
}

pub struct IrqTable {
    slots: Mutex<[Slot; Irq::COUNT]>,
    /// Sequences hub enable writes with the table update.
    enables: Mutex<()>,
}

impl IrqTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(core::array::from_fn(|_| Slot::default())),
            enables: Mutex::new(()),
        }
    }

    pub fn register(&self, irq: Irq, handler: impl IrqHandler) -> Result {
        let mut slots = self.slots.lock();
        let slot = &mut slots[irq.index()];
        if slot.registration.is_some() {
            error!("IRQ {irq:?} registration failed, slot in use");
            return Err(HubError::AlreadyRegistered(irq));
        }
        slot.registration = Some(Arc::new(Registration::new(handler)));
        info!("IRQ {irq:?} registered");
        Ok(())
    }

    /// Clear the slot of `irq` and wait for running invocations of the old
    /// handler to return. Once this returns the handler is never called
    /// again.
    ///
    /// A handler removing itself must use [`IrqEvent::unregister_self`]
    /// instead, waiting on its own invocation would never finish.
    pub fn unregister(&self, irq: Irq) {
        let removed = self.slots.lock()[irq.index()].registration.take();
        if let Some(registration) = removed {
            registration.revoke();
            registration.wait_idle();
            info!("IRQ {irq:?} unregistered");
        }
    }

    fn revoke(&self, irq: Irq, registration: &Arc<Registration>) {
        registration.revoke();
        let mut slots = self.slots.lock();
        let slot = &mut slots[irq.index()];
        if slot
            .registration
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, registration))
        {
            slot.registration = None;
            info!("IRQ {irq:?} unregistered by its handler");
        }
    }

    pub fn is_registered(&self, irq: Irq) -> bool {
        self.slots.lock()[irq.index()].registration.is_some()
    }

    pub fn enable(&self, broker: &Broker, irq: Irq) -> Result {
        self.set_enabled(broker, irq, true)
    }

    pub fn disable(&self, broker: &Broker, irq: Irq) -> Result {
        self.set_enabled(broker, irq, false)
    }

    fn set_enabled(&self, broker: &Broker, irq: Irq, enabled: bool) -> Result {
        let (_, enable_reg, bit) = irq.location();
        let value = if enabled { bit } else { 0 };
        let _enables = self.enables.lock();
        broker.write_1byte(enable_reg, value, bit)?;

        let mut slots = self.slots.lock();
        let slot = &mut slots[irq.index()];
        slot.enabled = enabled;
        if enabled && slot.registration.is_none() {
            warn!("IRQ {irq:?} enabled without a handler");
        }
        debug!("IRQ {irq:?} enabled={enabled}");
        Ok(())
    }

    pub fn is_enabled(&self, irq: Irq) -> bool {
        self.slots.lock()[irq.index()].enabled
    }

    pub fn enabled_mask(&self) -> IrqMask {
        let slots = self.slots.lock();
        (0..Irq::COUNT as u8)
            .filter_map(|id| Irq::try_from(id).ok())
            .filter(|irq| slots[irq.index()].enabled)
            .fold(IrqMask::empty(), |acc, irq| acc | irq.mask())
    }

    /// Read the hub's interrupt status registers.
    pub fn read_pending(&self, broker: &Broker) -> Result<IrqMask> {
        let mut status = [0u8; IRQ_REGISTERS.len()];
        for (byte, (status_reg, _)) in status.iter_mut().zip(IRQ_REGISTERS) {
            *byte = broker.read_value::<u8>(status_reg)?;
        }
        Ok(IrqMask::from_status(&status))
    }

    /// Invoke the handler of every event in `pending`. Returns how many
    /// handlers ran.
    pub fn dispatch_all(&self, hub: &SensorHub, pending: IrqMask) -> usize {
        let unknown = pending.unrecognized();
        if !unknown.is_empty() {
            warn!("unrecognized IRQ bits {:#06x}", unknown.bits());
        }

        let targets: Vec<(Irq, Arc<Registration>)> = {
            let slots = self.slots.lock();
            pending
                .irqs()
                .filter_map(|irq| match &slots[irq.index()].registration {
                    Some(registration) => Some((irq, registration.clone())),
                    None => {
                        warn!("IRQ {irq:?} raised with no handler");
                        None
                    }
                })
                .collect()
        };

        let mut invoked = 0;
        for (irq, registration) in &targets {
            let Some(_active) = registration.enter() else {
                continue;
            };
            trace!("dispatch IRQ {irq:?}");
            registration.handler.handle(&IrqEvent {
                hub,
                irq: *irq,
                registration,
            });
            invoked += 1;
        }
        invoked
    }

    /// Write the enable state kept in the table back to the hub.
    pub fn restore(&self, broker: &Broker) -> Result {
        let _enables = self.enables.lock();
        let mask = self.enabled_mask();
        for (i, (_, enable_reg)) in IRQ_REGISTERS.iter().enumerate() {
            broker.write(*enable_reg, &[mask.register_byte(i)], None)?;
        }
        info!("IRQ enables restored: {:#06x}", mask.bits());
        Ok(())
    }

    /// Disable every event on the hub and in the table.
    pub fn clear_enables(&self, broker: &Broker) -> Result {
        let _enables = self.enables.lock();
        for slot in self.slots.lock().iter_mut() {
            slot.enabled = false;
        }
        for (_, enable_reg) in IRQ_REGISTERS {
            broker.write(enable_reg, &[0], None)?;
        }
        Ok(())
    }

    /// Drop every handler, waiting for running ones to return.
    pub fn shutdown(&self) {
        for id in 0..Irq::COUNT as u8 {
            if let Ok(irq) = Irq::try_from(id) {
                self.unregister(irq);
            }
        }
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Recovery callback that rewrites the hub's enable registers after a
/// panic reset. Installed in [`PanicSlot::IrqRestore`](crate::PanicSlot).
pub(crate) struct IrqRestore;

impl PanicHandler for IrqRestore {
    fn restore(&self, hub: &SensorHub) {
        if let Err(e) = hub.irq_table().restore(hub.broker()) {
            error!("IRQ restore after hub panic failed: {e}");
        }
    }
}
