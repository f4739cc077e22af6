pub use sensorhub_if::err::*;

pub type Result<T = ()> = core::result::Result<T, HubError>;

/// Check the byte count a transaction reported against what the register
/// layout requires.
pub(crate) fn check_len(expected: usize, actual: usize) -> Result {
    if expected == actual {
        Ok(())
    } else {
        Err(HubError::TransferSizeMismatch { expected, actual })
    }
}
