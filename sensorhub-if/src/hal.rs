use core::time::Duration;

use crate::{
    BootMode,
    err::{BusError, HubError},
};

/// The physical channel to the hub.
///
/// Implementations never see concurrent calls: the broker owns the transport
/// behind its bus access lock.
pub trait Transport: Send + 'static {
    /// Write `buf[..write_len]`, then read `read_len` bytes back into
    /// `buf[..read_len]`.
    ///
    /// Returns the number of bytes read, or the number of bytes written when
    /// `read_len` is zero.
    fn write_read(
        &mut self,
        buf: &mut [u8],
        write_len: usize,
        read_len: usize,
    ) -> Result<usize, BusError>;
}

/// What the firmware loader reports after a successful download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub version: u16,
}

/// Board and firmware collaborators of the hub.
pub trait HubHal: Send + Sync + 'static {
    fn set_bootmode(&self, mode: BootMode);

    /// Drive the reset line. `true` releases the hub from reset.
    fn set_reset(&self, high: bool);

    /// Flash firmware onto the hub over `bus`. The caller holds the bus
    /// access lock for the whole download.
    fn load_firmware(
        &self,
        bus: &mut dyn Transport,
        force_upgrade: bool,
    ) -> Result<FirmwareInfo, HubError>;

    /// Stop the system after an unrecoverable hub failure.
    fn halt(&self, err: &HubError) -> ! {
        panic!("sensor hub unrecoverable: {err}");
    }
}

pub trait Osal: Send + Sync + 'static {
    fn delay(&self, duration: Duration);
}
