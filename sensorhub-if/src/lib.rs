#![no_std]

extern crate alloc;

pub mod err;
pub mod hal;
pub mod irq;
pub mod reg;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Operating mode of the channel to the hub.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Mode {
    #[default]
    Uninitialized,
    Boot,
    Normal,
    Factory,
}

/// Boot strap levels `(boot0, boot1)` sampled by the hub when it leaves reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootMode {
    Mode00,
    Mode01,
    Mode10,
    Mode11,
}

impl BootMode {
    pub fn levels(&self) -> (bool, bool) {
        match self {
            BootMode::Mode00 => (false, false),
            BootMode::Mode01 => (true, false),
            BootMode::Mode10 => (false, true),
            BootMode::Mode11 => (true, true),
        }
    }
}

/// Recovery priority slots. Callbacks run in declaration order after a hub
/// panic; `IrqRestore` must stay the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PanicSlot {
    DisplayRestore,
    AccelRestore,
    GyroRestore,
    Mpu9150Restore,
    IrqRestore,
}

impl PanicSlot {
    pub const COUNT: usize = 5;

    pub const ALL: [PanicSlot; Self::COUNT] = [
        PanicSlot::DisplayRestore,
        PanicSlot::AccelRestore,
        PanicSlot::GyroRestore,
        PanicSlot::Mpu9150Restore,
        PanicSlot::IrqRestore,
    ];

    pub fn index(&self) -> usize {
        u8::from(*self) as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            PanicSlot::DisplayRestore => "display_restore",
            PanicSlot::AccelRestore => "accel_restore",
            PanicSlot::GyroRestore => "gyro_restore",
            PanicSlot::Mpu9150Restore => "mpu9150_restore",
            PanicSlot::IrqRestore => "irq_restore",
        }
    }
}

pub use err::{BusError, HubError};
pub use hal::{FirmwareInfo, HubHal, Osal, Transport};
pub use irq::{Irq, IrqMask};
pub use reg::{Reg, RegDesc, RegisterMap, REGISTER_MAP};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_restore_is_last_slot() {
        let last = PanicSlot::ALL[PanicSlot::COUNT - 1];
        assert_eq!(last, PanicSlot::IrqRestore);
        for (i, slot) in PanicSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
    }

    #[test]
    fn mode_round_trips_through_u8() {
        let raw: u8 = Mode::Normal.into();
        assert_eq!(Mode::try_from(raw).unwrap(), Mode::Normal);
        assert!(Mode::try_from(9u8).is_err());
    }
}
