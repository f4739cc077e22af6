//! Panic Detector & Recovery Sequencer.
//!
//! The hub runs one of two bus slave programs. The normal one serves the
//! feature banks and answers `0xFF` for unknown banks; the panic handler
//! only serves [`PANIC_BANK`] and answers `0x00` for everything else. So an
//! interrupt with no active event is the hint, and the handoff command on
//! the panic bank is the proof: only a panicked hub answers it with
//! [`PANIC_RESP_CHECK`].
//!
//! ```text
//! Normal -> Checking -> Normal                      (not a panic)
//!                    -> Resetting -> ReloadingFirmware -> Recovering -> Normal
//! ```

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use log::{debug, error, info};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::Mutex;

use crate::{
    Mode, PANIC_BANK, PanicSlot, SensorHub,
    broker::BusGuard,
    err::{HubError, Result, check_len},
    reset,
};

/// Panic handoff command.
pub const PANIC_CMD_CHECK: u8 = 0xCD;
/// Answer of a panicked hub to [`PANIC_CMD_CHECK`].
pub const PANIC_RESP_CHECK: u32 = 0xDEAD_BEEF;
pub const PANIC_RESP_LEN: usize = 4;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PanicState {
    #[default]
    Normal,
    Checking,
    Resetting,
    ReloadingFirmware,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicOutcome {
    /// The hub answered like a healthy hub, nothing was done.
    NotConfirmed,
    /// The hub was reset, reflashed and every recovery callback ran.
    Recovered,
    /// Another check or recovery was already running.
    InProgress,
}

pub struct PanicSequencer {
    state: AtomicU8,
    running: Mutex<()>,
    recoveries: AtomicUsize,
}

impl PanicSequencer {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PanicState::Normal.into()),
            running: Mutex::new(()),
            recoveries: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> PanicState {
        PanicState::try_from(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::Acquire)
    }

    fn enter(&self, state: PanicState) {
        debug!("panic state -> {state:?}");
        self.state.store(state.into(), Ordering::Release);
    }

    /// Confirm a hub panic and recover from it.
    ///
    /// Blocks for the reset settle time and a full firmware download when
    /// the panic is real, so it must run in a context that may sleep.
    pub(crate) fn process(&self, hub: &SensorHub) -> PanicOutcome {
        let Some(_running) = self.running.try_lock() else {
            info!("hub panic handling already in progress");
            return PanicOutcome::InProgress;
        };

        self.enter(PanicState::Checking);
        let mut bus = hub.broker().lock();
        if let Err(e) = confirm(&mut bus) {
            info!("Unknown IRQ status! hub panic handoff: {e}");
            drop(bus);
            self.enter(PanicState::Normal);
            return PanicOutcome::NotConfirmed;
        }

        error!("Detected hub panic, reset hub!");
        self.enter(PanicState::Resetting);
        let mode = bus.mode();
        bus.set_mode(Mode::Boot);
        let config = hub.config();
        reset::hw_reset(config.variant, hub.hal(), hub.osal());
        hub.osal().delay(config.panic_settle);

        self.enter(PanicState::ReloadingFirmware);
        match hub.hal().load_firmware(bus.transport(), false) {
            Ok(fw) => bus.set_firmware(Some(fw)),
            Err(e) => {
                let err = HubError::FirmwareReloadFailed(Box::new(e));
                error!("Failed to restart hub: {err}");
                hub.hal().halt(&err);
            }
        }
        bus.set_mode(mode);
        drop(bus);

        self.enter(PanicState::Recovering);
        for slot in PanicSlot::ALL {
            if let Some(handler) = hub.panic_registry().get(slot) {
                info!("Calling {} as hub restarted!", slot.name());
                handler.restore(hub);
            }
        }

        self.recoveries.fetch_add(1, Ordering::AcqRel);
        self.enter(PanicState::Normal);
        info!("hub panic recovery done");
        PanicOutcome::Recovered
    }
}

impl Default for PanicSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Send the handoff command. `Ok` only when the hub answers with exactly
/// the magic value.
fn confirm(bus: &mut BusGuard<'_>) -> Result {
    let mut buf = [0u8; PANIC_RESP_LEN];
    buf[0] = PANIC_BANK;
    buf[1] = PANIC_CMD_CHECK;

    let n = bus.write_read(&mut buf, 2, PANIC_RESP_LEN)?;
    check_len(PANIC_RESP_LEN, n)?;

    let resp = u32::from_le_bytes(buf);
    if resp != PANIC_RESP_CHECK {
        debug!("panic handoff answered {resp:#010x}");
        return Err(HubError::PanicNotConfirmed);
    }
    Ok(())
}
