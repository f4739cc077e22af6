use core::time::Duration;

use crate::Osal;

/// Busy wait until `condition` turns false.
pub(crate) fn spin_while<F>(condition: F)
where
    F: Fn() -> bool,
{
    while condition() {
        core::hint::spin_loop();
    }
}

pub(crate) fn delay_ms(osal: &dyn Osal, ms: u64) {
    osal.delay(Duration::from_millis(ms));
}
