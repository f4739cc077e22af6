use alloc::{boxed::Box, string::String};

use crate::{Irq, PanicSlot};

/// Transport level failure reported by a [`Transport`](crate::Transport).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("No acknowledge from hub")]
    Nack,
    #[error("Bus timeout")]
    Timeout,
    #[error("Bus arbitration lost")]
    ArbitrationLost,
    #[error("Other bus error: {0}")]
    Other(String),
}

#[derive(thiserror::Error, Debug)]
pub enum HubError {
    #[error("Invalid register {0:#x}")]
    InvalidRegister(u16),
    #[error("Transfer size mismatch: expected {expected} bytes, got {actual}")]
    TransferSizeMismatch { expected: usize, actual: usize },
    #[error("Invalid buffer length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("IRQ {0:?} already registered")]
    AlreadyRegistered(Irq),
    #[error("Panic slot {} already occupied", .0.name())]
    SlotOccupied(PanicSlot),
    #[error("Hub panic not confirmed")]
    PanicNotConfirmed,
    #[error("Firmware reload failed: {0}")]
    FirmwareReloadFailed(Box<HubError>),
    #[error("Not initialized")]
    NotInitialized,
    #[error("Other error: {0}")]
    Other(#[from] Box<dyn core::error::Error + Send + Sync>),
}

impl HubError {
    /// Errors that suggest the hub itself stopped answering sanely. Callers
    /// seeing one of these usually ask for a panic check.
    pub fn hints_hub_fault(&self) -> bool {
        matches!(
            self,
            HubError::TransferSizeMismatch { .. } | HubError::Bus(BusError::Nack)
        )
    }
}
