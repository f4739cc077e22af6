use log::debug;

use crate::{BootMode, HubHal, Osal, osal::delay_ms};

/// Reset wiring of the hub part.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubVariant {
    /// Boot straps low, reset pulsed high-low-high.
    #[default]
    Standard,
    /// Part strapped into its ROM bootloader across reset; needs a long
    /// settle before the bus answers.
    BootloaderStrap,
}

pub(crate) fn hw_reset(variant: HubVariant, hal: &dyn HubHal, osal: &dyn Osal) {
    debug!("hub reset, variant {variant:?}");
    match variant {
        HubVariant::Standard => {
            hal.set_bootmode(BootMode::Mode00);
            hal.set_reset(true);
            delay_ms(osal, 5);
            hal.set_reset(false);
            delay_ms(osal, 5);
            hal.set_reset(true);
        }
        HubVariant::BootloaderStrap => {
            hal.set_bootmode(BootMode::Mode01);
            delay_ms(osal, 5);
            hal.set_reset(false);
            delay_ms(osal, 10);
            hal.set_reset(true);
            delay_ms(osal, 400);
        }
    }
}
