//! Simulated sensor hub for host tests.
//!
//! [`SimHub`] is a cheap handle onto shared hub state and implements all
//! three collaborator traits, so one instance can be cloned into
//! `SensorHub::probe` as transport, HAL and OSAL while the test keeps a
//! clone to poke at the hub.
//!
//! What it models:
//! - register memory per bank, with the hub applying write masks
//! - interrupt status registers that clear on read
//! - the panic program: feature banks read back zero, the handoff command
//!   answers the magic
//! - firmware download over the bus, reset and boot strap lines
//! - fault injection (short transfers, NACKs, wrong handoff answer, failing
//!   downloads) and a check that no two transfers ever overlap on the wire

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, trace};
use sensorhub_if::{
    BootMode,
    err::{BusError, HubError},
    hal::{FirmwareInfo, HubHal, Osal, Transport},
    irq::Irq,
    reg::{PANIC_BANK, REGISTER_MAP, Reg, bank},
};
use spin::Mutex;

/// Bank the simulated bootloader takes firmware images on.
pub const DOWNLOAD_BANK: u8 = 0x0B;
pub const DEFAULT_FIRMWARE_VERSION: u16 = 0x0123;

const PANIC_CMD_CHECK: u8 = 0xCD;
const PANIC_MAGIC: u32 = 0xDEAD_BEEF;
const BANKS: usize = 16;
const BANK_SIZE: usize = 256;

/// Board side effects, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    BootMode(BootMode),
    Reset(bool),
    FirmwareLoad { force_upgrade: bool },
    Delay(Duration),
}

struct State {
    memory: Vec<[u8; BANK_SIZE]>,
    /// `(boot0, boot1)` strap levels.
    boot_pins: (bool, bool),
    running: bool,
    panicked: bool,
    panic_response: Option<u32>,
    firmware_version: u16,
    failing_loads: usize,
    short_transfers: usize,
    nacks: usize,
    tcmd_response: Vec<u8>,
    frames: Vec<Vec<u8>>,
    events: Vec<HalEvent>,
}

impl State {
    fn new() -> Self {
        Self {
            memory: vec![[0; BANK_SIZE]; BANKS],
            boot_pins: (false, false),
            running: false,
            panicked: false,
            panic_response: None,
            firmware_version: DEFAULT_FIRMWARE_VERSION,
            failing_loads: 0,
            short_transfers: 0,
            nacks: 0,
            tcmd_response: Vec::new(),
            frames: Vec::new(),
            events: Vec::new(),
        }
    }

    fn boot(&mut self, version: u16) {
        for bank in self.memory.iter_mut() {
            bank.fill(0);
        }
        let desc = REGISTER_MAP.lookup(Reg::GeneralVersion).unwrap();
        let at = desc.offset as usize;
        self.memory[desc.bank as usize][at..at + 2].copy_from_slice(&version.to_le_bytes());
        self.running = true;
        self.panicked = false;
    }

    fn is_status(bank: u8, offset: u8) -> bool {
        [Reg::GeneralInterrupt0Status, Reg::GeneralInterrupt1Status]
            .iter()
            .filter_map(|r| REGISTER_MAP.lookup(*r).ok())
            .any(|d| d.bank == bank && d.offset == offset)
    }

    fn transfer(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<usize, BusError> {
        self.frames.push(buf[..write_len].to_vec());
        if self.nacks > 0 {
            self.nacks -= 1;
            return Err(BusError::Nack);
        }
        if write_len < 2 {
            return Err(BusError::Other(format!("frame too short: {write_len}")));
        }
        let (bank_id, offset) = (buf[0], buf[1]);

        let done = if bank_id == DOWNLOAD_BANK {
            let version = u16::from_le_bytes([buf[2], buf[3]]);
            self.boot(version);
            if read_len == 0 { write_len } else { read_len }
        } else if bank_id == PANIC_BANK {
            let answer = match (self.panicked, self.panic_response) {
                (_, Some(forced)) => forced.to_le_bytes(),
                (true, None) => PANIC_MAGIC.to_le_bytes(),
                (false, None) => [0xFF; 4],
            };
            if offset == PANIC_CMD_CHECK {
                for (i, b) in buf[..read_len].iter_mut().enumerate() {
                    *b = answer.get(i).copied().unwrap_or(0);
                }
            }
            read_len
        } else if self.panicked {
            buf[..read_len].fill(0);
            if read_len == 0 { write_len } else { read_len }
        } else if bank_id == bank::TCMD {
            for (i, b) in buf[..read_len].iter_mut().enumerate() {
                *b = self.tcmd_response.get(i).copied().unwrap_or(0);
            }
            if read_len == 0 { write_len } else { read_len }
        } else if read_len == 0 {
            self.write_masked(bank_id, offset, &buf[2..write_len]);
            write_len
        } else {
            self.read_mem(bank_id, offset, &mut buf[..read_len]);
            read_len
        };

        if self.short_transfers > 0 {
            self.short_transfers -= 1;
            return Ok(done.saturating_sub(1));
        }
        Ok(done)
    }

    fn write_masked(&mut self, bank_id: u8, offset: u8, body: &[u8]) {
        let size = body.len() / 2;
        let (value, mask) = body.split_at(size);
        let mem = &mut self.memory[bank_id as usize % BANKS];
        for i in 0..size {
            let at = (offset as usize + i) % BANK_SIZE;
            mem[at] = (mem[at] & !mask[i]) | (value[i] & mask[i]);
        }
    }

    fn read_mem(&mut self, bank_id: u8, offset: u8, out: &mut [u8]) {
        let clear = Self::is_status(bank_id, offset);
        let mem = &mut self.memory[bank_id as usize % BANKS];
        for (i, b) in out.iter_mut().enumerate() {
            let at = (offset as usize + i) % BANK_SIZE;
            *b = mem[at];
            if clear {
                mem[at] = 0;
            }
        }
    }
}

struct Inner {
    state: Mutex<State>,
    on_wire: AtomicBool,
    overlaps: AtomicUsize,
    transfers: AtomicUsize,
    xfer_delay: Mutex<Duration>,
    real_delays: AtomicBool,
    halted: AtomicBool,
}

#[derive(Clone)]
pub struct SimHub {
    inner: Arc<Inner>,
}

impl Default for SimHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                on_wire: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
                transfers: AtomicUsize::new(0),
                xfer_delay: Mutex::new(Duration::ZERO),
                real_delays: AtomicBool::new(false),
                halted: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> spin::MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    // ---- hub side stimulus ----

    /// Latch `irq` in the hub's interrupt status registers.
    pub fn raise(&self, irq: Irq) {
        let (status, _, bit) = irq.location();
        let desc = REGISTER_MAP.lookup(status).unwrap();
        self.state().memory[desc.bank as usize][desc.offset as usize] |= bit;
        trace!("sim: raised {irq:?}");
    }

    /// Crash the hub firmware into its panic program.
    pub fn trigger_panic(&self) {
        debug!("sim: hub panicked");
        self.state().panicked = true;
    }

    pub fn is_panicked(&self) -> bool {
        self.state().panicked
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Answer the handoff command with `value` regardless of the hub state.
    pub fn set_panic_response(&self, value: Option<u32>) {
        self.state().panic_response = value;
    }

    pub fn set_firmware_version(&self, version: u16) {
        self.state().firmware_version = version;
    }

    /// Make the next `n` firmware downloads fail.
    pub fn fail_firmware_loads(&self, n: usize) {
        self.state().failing_loads = n;
    }

    /// Make the next `n` transfers report one byte less than asked.
    pub fn inject_short_transfers(&self, n: usize) {
        self.state().short_transfers = n;
    }

    pub fn inject_nacks(&self, n: usize) {
        self.state().nacks = n;
    }

    pub fn set_tcmd_response(&self, response: &[u8]) {
        self.state().tcmd_response = response.to_vec();
    }

    /// Hold every transfer on the wire for `delay`, widening the window in
    /// which an overlapping transfer would be caught.
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.inner.xfer_delay.lock() = delay;
    }

    /// Sleep for real in [`Osal::delay`] instead of only recording it.
    pub fn use_real_delays(&self, real: bool) {
        self.inner.real_delays.store(real, Ordering::SeqCst);
    }

    // ---- inspection ----

    /// Hub side content of `reg`.
    pub fn register(&self, reg: Reg) -> Vec<u8> {
        let desc = REGISTER_MAP.lookup(reg).unwrap();
        let at = desc.offset as usize;
        self.state().memory[desc.bank as usize][at..at + desc.size as usize].to_vec()
    }

    pub fn set_register(&self, reg: Reg, value: &[u8]) {
        let desc = REGISTER_MAP.lookup(reg).unwrap();
        assert_eq!(value.len(), desc.size as usize, "{reg:?} width");
        let at = desc.offset as usize;
        self.state().memory[desc.bank as usize][at..at + value.len()].copy_from_slice(value);
    }

    /// Every frame written on the wire, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    pub fn events(&self) -> Vec<HalEvent> {
        self.state().events.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.frames.clear();
        state.events.clear();
    }

    /// Current `(boot0, boot1)` strap levels.
    pub fn boot_pins(&self) -> (bool, bool) {
        self.state().boot_pins
    }

    pub fn firmware_loads(&self) -> usize {
        self.count_events(|e| matches!(e, HalEvent::FirmwareLoad { .. }))
    }

    /// Times the reset line was asserted.
    pub fn resets(&self) -> usize {
        self.count_events(|e| *e == HalEvent::Reset(false))
    }

    fn count_events(&self, f: impl Fn(&HalEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| f(e)).count()
    }

    pub fn transfers(&self) -> usize {
        self.inner.transfers.load(Ordering::SeqCst)
    }

    /// Transfers that started while another one was still on the wire.
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub fn halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    fn record(&self, event: HalEvent) {
        trace!("sim: {event:?}");
        self.state().events.push(event);
    }
}

impl Transport for SimHub {
    fn write_read(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<usize, BusError> {
        if self.inner.on_wire.swap(true, Ordering::SeqCst) {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.transfers.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.xfer_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let res = self.state().transfer(buf, write_len, read_len);

        self.inner.on_wire.store(false, Ordering::SeqCst);
        res
    }
}

impl HubHal for SimHub {
    fn set_bootmode(&self, mode: BootMode) {
        self.record(HalEvent::BootMode(mode));
        self.state().boot_pins = mode.levels();
    }

    fn set_reset(&self, high: bool) {
        self.record(HalEvent::Reset(high));
        if !high {
            let mut state = self.state();
            state.running = false;
            state.panicked = false;
        }
    }

    fn load_firmware(&self, bus: &mut dyn Transport, force_upgrade: bool) -> Result<FirmwareInfo, HubError> {
        self.record(HalEvent::FirmwareLoad { force_upgrade });
        let version = {
            let mut state = self.state();
            if state.failing_loads > 0 {
                state.failing_loads -= 1;
                None
            } else {
                Some(state.firmware_version)
            }
        };
        let Some(version) = version else {
            debug!("sim: firmware download fails");
            return Err(HubError::Bus(BusError::Timeout));
        };

        let [lo, hi] = version.to_le_bytes();
        let mut frame = [DOWNLOAD_BANK, 0x00, lo, hi];
        let n = bus.write_read(&mut frame, 4, 0)?;
        if n != 4 {
            return Err(HubError::TransferSizeMismatch { expected: 4, actual: n });
        }
        Ok(FirmwareInfo { version })
    }

    fn halt(&self, err: &HubError) -> ! {
        self.inner.halted.store(true, Ordering::SeqCst);
        panic!("sensor hub halted: {err}");
    }
}

impl Osal for SimHub {
    fn delay(&self, duration: Duration) {
        self.record(HalEvent::Delay(duration));
        if self.inner.real_delays.load(Ordering::SeqCst) {
            thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(sim: &mut SimHub, bank_id: u8, offset: u8, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len.max(2)];
        buf[0] = bank_id;
        buf[1] = offset;
        let n = sim.write_read(&mut buf, 2, len).unwrap();
        assert_eq!(n, len);
        buf[..len].to_vec()
    }

    #[test]
    fn masked_write_keeps_unmasked_bits() {
        let mut sim = SimHub::new();
        sim.set_register(Reg::UserSettingsScreenStatus, &[0b1010]);
        let mut frame = [bank::USERSETTINGS, 0x00, 0b0101, 0b0001];
        assert_eq!(sim.write_read(&mut frame, 4, 0).unwrap(), 4);
        assert_eq!(sim.register(Reg::UserSettingsScreenStatus), [0b1011]);
    }

    #[test]
    fn status_clears_on_read() {
        let mut sim = SimHub::new();
        sim.raise(Irq::GyroDataReady);
        assert_eq!(read(&mut sim, bank::GENERAL, 0x0A, 1), [0b10]);
        assert_eq!(read(&mut sim, bank::GENERAL, 0x0A, 1), [0]);
    }

    #[test]
    fn panic_program_answers_handoff() {
        let mut sim = SimHub::new();
        assert_eq!(read(&mut sim, PANIC_BANK, PANIC_CMD_CHECK, 4), [0xFF; 4]);
        sim.raise(Irq::AccelDataReady);
        sim.trigger_panic();
        assert_eq!(read(&mut sim, bank::GENERAL, 0x0A, 1), [0]);
        assert_eq!(
            read(&mut sim, PANIC_BANK, PANIC_CMD_CHECK, 4),
            PANIC_MAGIC.to_le_bytes()
        );
    }

    #[test]
    fn download_boots_firmware() {
        let mut sim = SimHub::new();
        sim.set_firmware_version(0x0042);
        let info = sim.clone().load_firmware(&mut sim, true).unwrap();
        assert_eq!(info.version, 0x0042);
        assert!(sim.is_running());
        assert_eq!(sim.register(Reg::GeneralVersion), [0x42, 0x00]);
        assert_eq!(sim.firmware_loads(), 1);
    }
}
