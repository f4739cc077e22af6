#![no_std]

extern crate alloc;

pub mod broker;
pub mod err;
pub mod fwlog;
pub mod irq;
pub mod panic;
pub mod registry;

mod hub;
mod osal;
mod reset;

pub use sensorhub_if::{
    BootMode, Mode, PanicSlot,
    hal::{FirmwareInfo, HubHal, Osal, Transport},
    irq::{IRQ_REGISTERS, Irq, IrqMask},
    reg::{self, PANIC_BANK, REGISTER_MAP, Reg, RegDesc, RegId, RegisterMap},
};

pub use broker::{BusGuard, RegValue};
pub use err::{BusError, HubError, Result};
pub use hub::*;
pub use irq::{DispatchOutcome, IrqEvent, IrqHandler, IrqRequest, IrqWork};
pub use panic::{PanicOutcome, PanicState};
pub use registry::{InitCall, PanicHandler};
pub use reset::HubVariant;
