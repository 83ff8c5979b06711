//! Link error types.
//!
//! Two families exist:
//! - [`IsoTpError`] is returned synchronously by the link's entry points.
//! - [`TransferError`] describes why an in-flight transfer was abandoned; it is delivered through
//!   [`crate::LinkEvents`] because the failure is usually detected long after the call that
//!   started the transfer returned.

use core::fmt;

/// Timeout category identifiers (ISO-TP naming).
///
/// - `N_Bs`: sender waiting for a FlowControl frame after a First Frame or a completed block.
/// - `N_Cr`: receiver waiting for the next Consecutive Frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Timeout waiting for flow control.
    NBs,
    /// Timeout waiting for consecutive frame.
    NCr,
}

/// Reason an in-flight send or reassembly was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Deadline exceeded for the indicated phase.
    Timeout(TimeoutKind),
    /// Consecutive Frame carried the wrong sequence number.
    BadSequence,
    /// Message does not fit: the peer reported overflow, or our receive buffer is too small.
    Overflow,
    /// The peer sent more FlowControl `Wait` frames than `wft_max` allows.
    WaitLimitExceeded,
    /// FlowControl frame carried a status outside {ContinueToSend, Wait, Overflow}.
    InvalidFlowStatus,
    /// A new message started before the current reassembly finished.
    UnexpectedPdu,
    /// The frame transport refused a frame mid-transfer.
    Transport,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Timeout(TimeoutKind::NBs) => {
                write!(f, "timed out waiting for flow control")
            }
            TransferError::Timeout(TimeoutKind::NCr) => {
                write!(f, "timed out waiting for consecutive frame")
            }
            TransferError::BadSequence => write!(f, "consecutive frame out of sequence"),
            TransferError::Overflow => write!(f, "message exceeds buffer capacity"),
            TransferError::WaitLimitExceeded => write!(f, "too many flow control wait frames"),
            TransferError::InvalidFlowStatus => write!(f, "invalid flow control status"),
            TransferError::UnexpectedPdu => write!(f, "reassembly interrupted by a new message"),
            TransferError::Transport => write!(f, "frame transport rejected a frame"),
        }
    }
}

impl core::error::Error for TransferError {}

/// Errors surfaced by the link's entry points.
#[derive(Debug)]
pub enum IsoTpError<E> {
    /// Empty payload or an identifier the frame type cannot carry.
    InvalidArgument,
    /// Configuration rejected at construction time.
    InvalidConfig,
    /// A send is already in progress on this link.
    NotIdle,
    /// Payload larger than the transmit buffer.
    Overflow,
    /// No completed message is waiting to be extracted.
    NotFound,
    /// Output buffer too small for the pending message; the message is kept.
    BufferTooSmall {
        /// Length of the pending message.
        needed: usize,
    },
    /// The link was re-entered from one of its own event callbacks.
    Busy,
    /// Wrapper around transport-specific errors.
    LinkError(E),
}

impl<E: fmt::Debug> fmt::Display for IsoTpError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsoTpError::InvalidArgument => write!(f, "invalid argument"),
            IsoTpError::InvalidConfig => write!(f, "invalid link configuration"),
            IsoTpError::NotIdle => write!(f, "previous send not finished"),
            IsoTpError::Overflow => write!(f, "payload exceeds transmit buffer"),
            IsoTpError::NotFound => write!(f, "no complete message available"),
            IsoTpError::BufferTooSmall { needed } => {
                write!(f, "output buffer too small, {needed} bytes required")
            }
            IsoTpError::Busy => write!(f, "link re-entered from its own callback"),
            IsoTpError::LinkError(err) => write!(f, "frame transport error: {err:?}"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for IsoTpError<E> {}

impl<E> IsoTpError<E> {
    /// Replace the transport error payload, keeping every other variant.
    pub fn map_link<F>(self, f: impl FnOnce(E) -> F) -> IsoTpError<F> {
        match self {
            IsoTpError::InvalidArgument => IsoTpError::InvalidArgument,
            IsoTpError::InvalidConfig => IsoTpError::InvalidConfig,
            IsoTpError::NotIdle => IsoTpError::NotIdle,
            IsoTpError::Overflow => IsoTpError::Overflow,
            IsoTpError::NotFound => IsoTpError::NotFound,
            IsoTpError::BufferTooSmall { needed } => IsoTpError::BufferTooSmall { needed },
            IsoTpError::Busy => IsoTpError::Busy,
            IsoTpError::LinkError(err) => IsoTpError::LinkError(f(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::ToString;

    use super::*;

    #[test]
    fn display_names_the_condition() {
        let err: IsoTpError<()> = IsoTpError::BufferTooSmall { needed: 42 };
        assert_eq!(err.to_string(), "output buffer too small, 42 bytes required");
        assert_eq!(
            TransferError::Timeout(TimeoutKind::NBs).to_string(),
            "timed out waiting for flow control"
        );
    }

    #[test]
    fn map_link_only_touches_transport_errors() {
        let err: IsoTpError<u8> = IsoTpError::LinkError(7);
        assert!(matches!(err.map_link(u16::from), IsoTpError::LinkError(7u16)));
        let err: IsoTpError<u8> = IsoTpError::NotIdle;
        assert!(matches!(err.map_link(u16::from), IsoTpError::NotIdle));
    }
}
