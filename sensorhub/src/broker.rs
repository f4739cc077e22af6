//! Transaction Broker.
//!
//! Owns the only [`Transport`] to the hub. Every register access, raw
//! command and the panic handoff goes through [`Broker::lock`], so no two
//! transactions ever interleave on the wire.
//!
//! Wire format:
//!
//! | access  | write                               | read          |
//! |---------|-------------------------------------|---------------|
//! | read    | `[bank][offset]`                    | `size` bytes  |
//! | write   | `[bank][offset][value..][mask..]`   | none          |
//! | command | `[bank][cmd][payload..]`            | response len  |

use alloc::{boxed::Box, vec, vec::Vec};

use log::{error, info, trace};
use spin::{Mutex, MutexGuard};

use crate::{
    FirmwareInfo, Mode, Reg, RegDesc, RegisterMap, Transport,
    err::{HubError, Result, check_len},
};

const HEADER_LEN: usize = 2;

pub(crate) struct Channel {
    transport: Box<dyn Transport>,
    mode: Mode,
    firmware: Option<FirmwareInfo>,
}

pub struct Broker {
    map: RegisterMap,
    channel: Mutex<Channel>,
}

impl Broker {
    pub fn new(transport: impl Transport, map: RegisterMap) -> Self {
        Self {
            map,
            channel: Mutex::new(Channel {
                transport: Box::new(transport),
                mode: Mode::Uninitialized,
                firmware: None,
            }),
        }
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Width of `reg` in bytes. Pure table lookup, never touches the bus.
    pub fn get_size(&self, reg: Reg) -> Result<usize> {
        self.map.size(reg)
    }

    /// Take the bus access lock.
    pub fn lock(&self) -> BusGuard<'_> {
        BusGuard {
            channel: self.channel.lock(),
        }
    }

    pub fn read(&self, reg: Reg) -> Result<Vec<u8>> {
        let desc = self.map.lookup(reg)?;
        let mut out = vec![0u8; desc.size as usize];
        self.lock().read_reg(reg, desc, &mut out)?;
        Ok(out)
    }

    /// Read `reg` into the front of `value`, returns the register width.
    pub fn read_into(&self, reg: Reg, value: &mut [u8]) -> Result<usize> {
        let desc = self.map.lookup(reg)?;
        let size = desc.size as usize;
        if value.len() < size {
            return Err(HubError::InvalidLength {
                expected: size,
                actual: value.len(),
            });
        }
        self.lock().read_reg(reg, desc, &mut value[..size])?;
        Ok(size)
    }

    /// Write `value` to `reg`. `mask` selects the bits the hub changes;
    /// `None` overwrites the whole register.
    pub fn write(&self, reg: Reg, value: &[u8], mask: Option<&[u8]>) -> Result {
        let desc = self.map.lookup(reg)?;
        let size = desc.size as usize;
        check_arg(size, value.len())?;
        if let Some(mask) = mask {
            check_arg(size, mask.len())?;
        }
        self.lock().write_reg(reg, desc, value, mask)
    }

    pub fn write_1byte(&self, reg: Reg, value: u8, mask: u8) -> Result {
        self.write(reg, &[value], Some(&[mask]))
    }

    pub fn read_value<T: RegValue>(&self, reg: Reg) -> Result<T> {
        check_arg(self.get_size(reg)?, T::SIZE)?;
        let raw = self.read(reg)?;
        Ok(T::from_le(&raw))
    }

    pub fn write_value<T: RegValue>(&self, reg: Reg, value: T) -> Result {
        check_arg(self.get_size(reg)?, T::SIZE)?;
        let mut raw = vec![0u8; T::SIZE];
        value.to_le(&mut raw);
        self.write(reg, &raw, None)
    }

    /// Raw `[bank][cmd][payload]` transaction. The hub must answer with
    /// exactly `response.len()` bytes.
    pub fn command(&self, bank: u8, cmd: u8, payload: &[u8], response: &mut [u8]) -> Result<usize> {
        let write_len = HEADER_LEN + payload.len();
        let read_len = response.len();
        let mut buf = vec![0u8; write_len.max(read_len)];
        buf[0] = bank;
        buf[1] = cmd;
        buf[HEADER_LEN..write_len].copy_from_slice(payload);

        let n = self.lock().write_read(&mut buf, write_len, read_len)?;
        let expected = if read_len == 0 { write_len } else { read_len };
        check_len(expected, n)?;
        response.copy_from_slice(&buf[..read_len]);
        Ok(n)
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode()
    }

    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.lock().firmware()
    }
}

fn check_arg(expected: usize, actual: usize) -> Result {
    if expected == actual {
        Ok(())
    } else {
        Err(HubError::InvalidLength { expected, actual })
    }
}

/// Exclusive access to the bus. Dropping it releases the bus access lock.
pub struct BusGuard<'a> {
    channel: MutexGuard<'a, Channel>,
}

impl BusGuard<'_> {
    pub fn write_read(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<usize> {
        trace!(
            "bus xfer bank {:#04x} cmd {:#04x} w{write_len} r{read_len}",
            buf.first().copied().unwrap_or_default(),
            buf.get(1).copied().unwrap_or_default(),
        );
        let n = self
            .channel
            .transport
            .write_read(buf, write_len, read_len)
            .inspect_err(|e| error!("bus transfer failed: {e}"))?;
        Ok(n)
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.channel.transport.as_mut()
    }

    pub fn mode(&self) -> Mode {
        self.channel.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.channel.mode != mode {
            info!("hub mode {:?} -> {:?}", self.channel.mode, mode);
            self.channel.mode = mode;
        }
    }

    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.channel.firmware
    }

    pub fn set_firmware(&mut self, firmware: Option<FirmwareInfo>) {
        if let Some(fw) = firmware {
            info!("hub firmware version {:#06x}", fw.version);
        }
        self.channel.firmware = firmware;
    }

    fn read_reg(&mut self, reg: Reg, desc: RegDesc, out: &mut [u8]) -> Result {
        let size = desc.size as usize;
        let mut buf = vec![0u8; size.max(HEADER_LEN)];
        buf[0] = desc.bank;
        buf[1] = desc.offset;

        let n = self.write_read(&mut buf, HEADER_LEN, size)?;
        check_len(size, n).inspect_err(|e| error!("read {reg:?}: {e}"))?;
        out.copy_from_slice(&buf[..size]);
        Ok(())
    }

    fn write_reg(&mut self, reg: Reg, desc: RegDesc, value: &[u8], mask: Option<&[u8]>) -> Result {
        let size = desc.size as usize;
        let write_len = HEADER_LEN + size * 2;
        let mut buf = vec![0xFFu8; write_len];
        buf[0] = desc.bank;
        buf[1] = desc.offset;
        buf[HEADER_LEN..HEADER_LEN + size].copy_from_slice(value);
        if let Some(mask) = mask {
            buf[HEADER_LEN + size..].copy_from_slice(mask);
        }

        let n = self.write_read(&mut buf, write_len, 0)?;
        check_len(write_len, n).inspect_err(|e| error!("write {reg:?}: {e}"))
    }
}

/// Plain integers stored little endian in hub registers.
pub trait RegValue: Sized + Copy {
    const SIZE: usize;

    fn from_le(bytes: &[u8]) -> Self;
    fn to_le(self, out: &mut [u8]);
}

macro_rules! impl_reg_value {
    ($($t:ty),*) => {
        $(
            impl RegValue for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(raw)
                }

                fn to_le(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_reg_value!(u8, i8, u16, i16, u32, i32, u64, i64);
