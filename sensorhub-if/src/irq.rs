//! Hub interrupt events.
//!
//! The hub exposes its events as bits in two status/enable register pairs,
//! eight events per pair. Event `n` lives in bit `n % 8` of pair `n / 8`.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::reg::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Irq {
    AccelDataReady,
    GyroDataReady,
    CompassDataReady,
    PressureDataReady,
    PedometerDataReady,
    ActivityChange,
    LightSensorDataReady,
    MetsDataReady,
    ApAlarmExpired,
}

/// `(status, enable)` register pairs, indexed by `irq / 8`.
pub const IRQ_REGISTERS: [(Reg, Reg); 2] = [
    (Reg::GeneralInterrupt0Status, Reg::GeneralInterrupt0Enable),
    (Reg::GeneralInterrupt1Status, Reg::GeneralInterrupt1Enable),
];

impl Irq {
    pub const COUNT: usize = 9;

    pub fn index(&self) -> usize {
        u8::from(*self) as usize
    }

    pub fn mask(&self) -> IrqMask {
        IrqMask::from_bits_retain(1 << self.index())
    }

    /// Status/enable register pair and the bit inside it.
    pub fn location(&self) -> (Reg, Reg, u8) {
        let (status, enable) = IRQ_REGISTERS[self.index() / 8];
        (status, enable, 1 << (self.index() % 8))
    }
}

bitflags! {
    /// Set of hub events, bit `n` standing for the event with id `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IrqMask: u16 {
        const ACCEL_DATA_READY = 1 << 0;
        const GYRO_DATA_READY = 1 << 1;
        const COMPASS_DATA_READY = 1 << 2;
        const PRESSURE_DATA_READY = 1 << 3;
        const PEDOMETER_DATA_READY = 1 << 4;
        const ACTIVITY_CHANGE = 1 << 5;
        const LIGHTSENSOR_DATA_READY = 1 << 6;
        const METS_DATA_READY = 1 << 7;
        const AP_ALARM_EXPIRED = 1 << 8;
    }
}

impl IrqMask {
    /// Build a mask from the raw status bytes, one byte per register pair.
    pub fn from_status(bytes: &[u8]) -> Self {
        let raw = bytes
            .iter()
            .take(IRQ_REGISTERS.len())
            .enumerate()
            .fold(0u16, |acc, (i, b)| acc | ((*b as u16) << (i * 8)));
        Self::from_bits_retain(raw)
    }

    /// The status/enable byte for register pair `index`.
    pub fn register_byte(&self, index: usize) -> u8 {
        (self.bits() >> (index * 8)) as u8
    }

    /// Bits that do not name a known event.
    pub fn unrecognized(&self) -> Self {
        Self::from_bits_retain(self.bits() & !Self::all().bits())
    }

    /// Known events set in this mask, lowest id first.
    pub fn irqs(self) -> impl Iterator<Item = Irq> {
        (0..Irq::COUNT as u8)
            .filter_map(|id| Irq::try_from(id).ok())
            .filter(move |irq| self.contains(irq.mask()))
    }
}

impl From<Irq> for IrqMask {
    fn from(value: Irq) -> Self {
        value.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_matches_named_flags() {
        assert_eq!(Irq::AccelDataReady.mask(), IrqMask::ACCEL_DATA_READY);
        assert_eq!(Irq::ApAlarmExpired.mask(), IrqMask::AP_ALARM_EXPIRED);
        assert_eq!(IrqMask::all().bits().count_ones() as usize, Irq::COUNT);
    }

    #[test]
    fn location_splits_by_register() {
        let (status, enable, bit) = Irq::LightSensorDataReady.location();
        assert_eq!(status, Reg::GeneralInterrupt0Status);
        assert_eq!(enable, Reg::GeneralInterrupt0Enable);
        assert_eq!(bit, 1 << 6);

        let (status, enable, bit) = Irq::ApAlarmExpired.location();
        assert_eq!(status, Reg::GeneralInterrupt1Status);
        assert_eq!(enable, Reg::GeneralInterrupt1Enable);
        assert_eq!(bit, 1);
    }

    #[test]
    fn status_bytes_build_mask() {
        let mask = IrqMask::from_status(&[0b0000_0011, 0b0000_0001]);
        let irqs: alloc::vec::Vec<_> = mask.irqs().collect();
        assert_eq!(
            irqs,
            [Irq::AccelDataReady, Irq::GyroDataReady, Irq::ApAlarmExpired]
        );
        assert_eq!(mask.register_byte(0), 0b11);
        assert_eq!(mask.register_byte(1), 0b1);
    }

    #[test]
    fn unknown_bits_are_kept_apart() {
        let mask = IrqMask::from_bits_retain(0x8000 | IrqMask::GYRO_DATA_READY.bits());
        assert_eq!(mask.unrecognized().bits(), 0x8000);
        assert_eq!(mask.irqs().count(), 1);
        assert_eq!(IrqMask::from_bits_retain(0x8000).irqs().count(), 0);
    }
}
