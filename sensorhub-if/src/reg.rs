//! Hub register identifiers and the build-time Register Descriptor table.
//!
//! Every transaction on the wire starts with `[bank][offset]`. The bank
//! selects a feature block on the hub, the offset a register inside it.
//! Bank [`PANIC_BANK`] is reserved for the panic handoff protocol and never
//! appears in the table.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::err::HubError;

/// Bank reserved for the panic handoff command.
pub const PANIC_BANK: u8 = 0xFF;

/// Feature banks of the hub firmware.
pub mod bank {
    pub const GENERAL: u8 = 0x00;
    pub const ACCEL: u8 = 0x01;
    pub const GYRO: u8 = 0x02;
    pub const COMPASS: u8 = 0x03;
    pub const PEDOMETER: u8 = 0x04;
    pub const METS: u8 = 0x05;
    pub const LIGHTSENSOR: u8 = 0x06;
    pub const USERSETTINGS: u8 = 0x07;
    pub const LOG: u8 = 0x08;
    /// Test command bank, used with raw commands only.
    pub const TCMD: u8 = 0x09;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Reg {
    GeneralVersion,
    GeneralUtc,
    GeneralApAlarm,
    GeneralInterrupt0Status,
    GeneralInterrupt0Enable,
    GeneralInterrupt1Status,
    GeneralInterrupt1Enable,

    AccelSampleRate,
    AccelX,
    AccelY,
    AccelZ,
    AccelX2,
    AccelY2,
    AccelZ2,

    GyroSampleRate,
    GyroX,
    GyroY,
    GyroZ,
    GyroX2,
    GyroY2,
    GyroZ2,

    CompassSampleRate,
    CompassX,
    CompassY,
    CompassZ,
    CompassAccuracy,

    PedometerActivity,
    PedometerTotalDistance,
    PedometerTotalSteps,
    PedometerCurrentSpeed,
    PedometerFloorsClimbed,

    MetsCalories,

    LightSensorSampleRate,
    LightSensorSignal,

    UserSettingsScreenStatus,

    LogLogEnable,
}

impl Reg {
    pub fn id(&self) -> u16 {
        (*self).into()
    }
}

impl TryFrom<u16> for RegId {
    type Error = HubError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Reg::try_from_primitive(value)
            .map(RegId)
            .map_err(|_| HubError::InvalidRegister(value))
    }
}

/// Register id checked against the identifier space, for raw ids coming
/// from outside the crate (control plane, test commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegId(pub Reg);

/// Location and width of one register on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegDesc {
    pub bank: u8,
    pub offset: u8,
    /// Width in bytes. Zero marks a register the firmware does not expose.
    pub size: u8,
}

impl RegDesc {
    pub const fn new(bank: u8, offset: u8, size: u8) -> Self {
        Self { bank, offset, size }
    }
}

/// Immutable mapping from [`Reg`] to [`RegDesc`].
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    entries: &'static [(Reg, RegDesc)],
}

impl RegisterMap {
    pub const fn new(entries: &'static [(Reg, RegDesc)]) -> Self {
        Self { entries }
    }

    /// Look up a register. Unknown registers and registers with a zero
    /// width are both reported as [`HubError::InvalidRegister`].
    pub fn lookup(&self, reg: Reg) -> Result<RegDesc, HubError> {
        self.entries
            .iter()
            .find(|(r, _)| *r == reg)
            .map(|(_, desc)| *desc)
            .filter(|desc| desc.size > 0)
            .ok_or(HubError::InvalidRegister(reg.id()))
    }

    pub fn size(&self, reg: Reg) -> Result<usize, HubError> {
        self.lookup(reg).map(|desc| desc.size as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Reg, RegDesc)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        REGISTER_MAP
    }
}

use bank::*;

pub const REGISTER_MAP: RegisterMap = RegisterMap::new(&[
    (Reg::GeneralVersion, RegDesc::new(GENERAL, 0x00, 2)),
    (Reg::GeneralUtc, RegDesc::new(GENERAL, 0x02, 4)),
    (Reg::GeneralApAlarm, RegDesc::new(GENERAL, 0x06, 4)),
    (Reg::GeneralInterrupt0Status, RegDesc::new(GENERAL, 0x0A, 1)),
    (Reg::GeneralInterrupt0Enable, RegDesc::new(GENERAL, 0x0B, 1)),
    (Reg::GeneralInterrupt1Status, RegDesc::new(GENERAL, 0x0C, 1)),
    (Reg::GeneralInterrupt1Enable, RegDesc::new(GENERAL, 0x0D, 1)),
    (Reg::AccelSampleRate, RegDesc::new(ACCEL, 0x00, 2)),
    (Reg::AccelX, RegDesc::new(ACCEL, 0x02, 4)),
    (Reg::AccelY, RegDesc::new(ACCEL, 0x06, 4)),
    (Reg::AccelZ, RegDesc::new(ACCEL, 0x0A, 4)),
    (Reg::AccelX2, RegDesc::new(ACCEL, 0x0E, 4)),
    (Reg::AccelY2, RegDesc::new(ACCEL, 0x12, 4)),
    (Reg::AccelZ2, RegDesc::new(ACCEL, 0x16, 4)),
    (Reg::GyroSampleRate, RegDesc::new(GYRO, 0x00, 2)),
    (Reg::GyroX, RegDesc::new(GYRO, 0x02, 4)),
    (Reg::GyroY, RegDesc::new(GYRO, 0x06, 4)),
    (Reg::GyroZ, RegDesc::new(GYRO, 0x0A, 4)),
    (Reg::GyroX2, RegDesc::new(GYRO, 0x0E, 4)),
    (Reg::GyroY2, RegDesc::new(GYRO, 0x12, 4)),
    (Reg::GyroZ2, RegDesc::new(GYRO, 0x16, 4)),
    (Reg::CompassSampleRate, RegDesc::new(COMPASS, 0x00, 2)),
    (Reg::CompassX, RegDesc::new(COMPASS, 0x02, 4)),
    (Reg::CompassY, RegDesc::new(COMPASS, 0x06, 4)),
    (Reg::CompassZ, RegDesc::new(COMPASS, 0x0A, 4)),
    (Reg::CompassAccuracy, RegDesc::new(COMPASS, 0x0E, 1)),
    (Reg::PedometerActivity, RegDesc::new(PEDOMETER, 0x00, 1)),
    (Reg::PedometerTotalDistance, RegDesc::new(PEDOMETER, 0x01, 4)),
    (Reg::PedometerTotalSteps, RegDesc::new(PEDOMETER, 0x05, 4)),
    (Reg::PedometerCurrentSpeed, RegDesc::new(PEDOMETER, 0x09, 4)),
    (Reg::PedometerFloorsClimbed, RegDesc::new(PEDOMETER, 0x0D, 2)),
    (Reg::MetsCalories, RegDesc::new(METS, 0x00, 4)),
    (Reg::LightSensorSampleRate, RegDesc::new(LIGHTSENSOR, 0x00, 2)),
    (Reg::LightSensorSignal, RegDesc::new(LIGHTSENSOR, 0x02, 2)),
    (Reg::UserSettingsScreenStatus, RegDesc::new(USERSETTINGS, 0x00, 1)),
    (Reg::LogLogEnable, RegDesc::new(LOG, 0x00, 8)),
]);
