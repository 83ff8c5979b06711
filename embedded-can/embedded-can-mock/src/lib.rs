//! In-memory CAN bus for exercising CAN protocol stacks without hardware.
//!
//! [`BusHandle`] owns the shared medium; each [`MockCan`] attached to it implements
//! [`embedded_can::nb::Can`] and sees every frame sent by the other nodes. Frames are
//! [`MockFrame`], which implements [`embedded_can::Frame`] with up to 64 data bytes so CAN FD
//! sized payloads can be simulated too.

mod bus;
mod frame;

pub use bus::{BusHandle, MAX_NODES, MockCan};
pub use frame::MockFrame;

use core::fmt;

/// Errors reported by the mock bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockError {
    /// The bus already has [`MAX_NODES`] nodes attached.
    TooManyNodes,
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockError::TooManyNodes => write!(f, "too many nodes attached to mock bus"),
        }
    }
}

impl std::error::Error for MockError {}

impl embedded_can::Error for MockError {
    fn kind(&self) -> embedded_can::ErrorKind {
        embedded_can::ErrorKind::Other
    }
}
