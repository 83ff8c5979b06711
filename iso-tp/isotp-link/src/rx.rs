//! Receive-side reassembly and flow-control decisions.

use core::cmp::min;

use crate::RxFlowControl;
use crate::errors::TransferError;
use crate::pdu::{FlowStatus, Pdu, duration_to_st_min};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Backing storage for one of the link's buffers.
///
/// Supports both:
/// - caller-provided buffers (common in `no_std`), and
/// - owned buffers when allocation is available.
pub enum LinkBuffer<'a> {
    /// Caller-provided slice.
    Borrowed(&'a mut [u8]),
    #[cfg(feature = "alloc")]
    /// Owned buffer when allocation is available.
    Owned(Vec<u8>),
}

impl LinkBuffer<'_> {
    /// Total writable capacity.
    pub fn capacity(&self) -> usize {
        self.as_ref().len()
    }
}

impl AsRef<[u8]> for LinkBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            LinkBuffer::Borrowed(buf) => buf,
            #[cfg(feature = "alloc")]
            LinkBuffer::Owned(buf) => buf.as_slice(),
        }
    }
}

impl AsMut<[u8]> for LinkBuffer<'_> {
    fn as_mut(&mut self) -> &mut [u8] {
        match self {
            LinkBuffer::Borrowed(buf) => buf,
            #[cfg(feature = "alloc")]
            LinkBuffer::Owned(buf) => buf.as_mut_slice(),
        }
    }
}

/// High-level receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// No transfer active.
    Idle,
    /// In-progress segmented transfer.
    Receiving,
    /// A complete message waits in the buffer for extraction.
    Complete,
}

/// FlowControl frame the link must send back to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlReply {
    /// Flow status to transmit back to the sender.
    pub status: FlowStatus,
    /// Block size for the sender (0 = unlimited).
    pub block_size: u8,
    /// Encoded STmin value to send (not a `Duration`).
    pub st_min: u8,
}

/// Outcome after processing a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Frame does not belong to any transfer; nothing changed.
    Ignored,
    /// Fragment stored; more Consecutive Frames expected.
    InProgress,
    /// Fragment stored; a FlowControl frame must be sent.
    FlowControl(FlowControlReply),
    /// Payload complete with length.
    Completed(usize),
    /// Transfer refused or abandoned; send `reply` if present.
    Aborted {
        /// Why the transfer ended.
        error: TransferError,
        /// FlowControl to send (Overflow for oversized First Frames).
        reply: Option<FlowControlReply>,
    },
}

/// Result of feeding one PDU to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStep {
    /// An in-progress reassembly was dropped because this PDU started a new message.
    pub interrupted: bool,
    /// What the PDU itself produced.
    pub outcome: RxOutcome,
}

impl RxStep {
    fn plain(outcome: RxOutcome) -> Self {
        Self {
            interrupted: false,
            outcome,
        }
    }
}

/// Receive state machine.
pub struct RxMachine<'a> {
    state: RxState,
    buffer: LinkBuffer<'a>,
    limit: usize,
    written: usize,
    expected_len: usize,
    next_sn: u8,
    block_size: u8,
    block_remaining: u8,
}

impl<'a> RxMachine<'a> {
    /// Create a machine accepting messages up to `limit` bytes (clamped to the buffer).
    pub fn new(buffer: LinkBuffer<'a>, limit: usize) -> Self {
        let limit = min(limit, buffer.capacity());
        Self {
            state: RxState::Idle,
            buffer,
            limit,
            written: 0,
            expected_len: 0,
            next_sn: 0,
            block_size: 0,
            block_remaining: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Largest message accepted.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes stored so far for the current (or completed) message.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Clear state to idle, discarding any partial or completed message.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.written = 0;
        self.expected_len = 0;
        self.next_sn = 0;
        self.block_remaining = 0;
    }

    /// The completed message, if one is waiting.
    pub fn completed(&self) -> Option<&[u8]> {
        match self.state {
            RxState::Complete => Some(&self.buffer.as_ref()[..self.written]),
            RxState::Idle | RxState::Receiving => None,
        }
    }

    /// Handle an incoming PDU and return actions to take.
    ///
    /// Dispatches on the current state. A Single or First Frame arriving mid-reassembly drops the
    /// partial message and is then handled as the start of a new one in the same call.
    pub fn on_pdu(&mut self, fc: &RxFlowControl, pdu: Pdu<'_>) -> RxStep {
        match self.state {
            RxState::Idle | RxState::Complete => RxStep::plain(self.on_idle(fc, pdu)),
            RxState::Receiving => self.on_receiving(fc, pdu),
        }
    }

    fn on_idle(&mut self, fc: &RxFlowControl, pdu: Pdu<'_>) -> RxOutcome {
        match pdu {
            Pdu::SingleFrame { data, .. } => self.handle_single(data),
            Pdu::FirstFrame { len, data } => self.handle_first(fc, len as usize, data),
            Pdu::ConsecutiveFrame { .. } | Pdu::FlowControl { .. } => RxOutcome::Ignored,
        }
    }

    fn on_receiving(&mut self, fc: &RxFlowControl, pdu: Pdu<'_>) -> RxStep {
        match pdu {
            Pdu::SingleFrame { .. } | Pdu::FirstFrame { .. } => {
                self.reset();
                RxStep {
                    interrupted: true,
                    outcome: self.on_idle(fc, pdu),
                }
            }
            Pdu::ConsecutiveFrame { sn, data } => {
                RxStep::plain(self.handle_consecutive(fc, sn, data))
            }
            Pdu::FlowControl { .. } => RxStep::plain(RxOutcome::Ignored),
        }
    }

    fn handle_single(&mut self, data: &[u8]) -> RxOutcome {
        let len = data.len();
        if len == 0 {
            return RxOutcome::Ignored;
        }
        if len > self.limit {
            return RxOutcome::Aborted {
                error: TransferError::Overflow,
                reply: None,
            };
        }
        self.buffer.as_mut()[..len].copy_from_slice(data);
        self.written = len;
        self.expected_len = len;
        self.state = RxState::Complete;
        RxOutcome::Completed(len)
    }

    fn handle_first(&mut self, fc: &RxFlowControl, len: usize, data: &[u8]) -> RxOutcome {
        if len > self.limit {
            return RxOutcome::Aborted {
                error: TransferError::Overflow,
                reply: Some(FlowControlReply {
                    status: FlowStatus::Overflow,
                    block_size: 0,
                    st_min: 0,
                }),
            };
        }
        let copy_len = min(data.len(), len);
        self.buffer.as_mut()[..copy_len].copy_from_slice(&data[..copy_len]);
        self.written = copy_len;
        self.expected_len = len;
        self.next_sn = 1;
        self.block_size = fc.block_size;
        self.block_remaining = fc.block_size;
        self.state = RxState::Receiving;
        RxOutcome::FlowControl(clear_to_send(fc))
    }

    fn handle_consecutive(&mut self, fc: &RxFlowControl, sn: u8, data: &[u8]) -> RxOutcome {
        if data.is_empty() {
            return RxOutcome::Ignored;
        }
        if sn != self.next_sn {
            self.reset();
            return RxOutcome::Aborted {
                error: TransferError::BadSequence,
                reply: None,
            };
        }
        let chunk = min(data.len(), self.expected_len - self.written);
        let end = self.written + chunk;
        self.buffer.as_mut()[self.written..end].copy_from_slice(&data[..chunk]);
        self.written = end;
        self.next_sn = (self.next_sn + 1) & 0x0F;

        if self.written >= self.expected_len {
            self.state = RxState::Complete;
            return RxOutcome::Completed(self.written);
        }

        if self.block_size > 0 {
            self.block_remaining = self.block_remaining.saturating_sub(1);
            if self.block_remaining == 0 {
                // Runtime flow-control changes take effect at block boundaries.
                self.block_size = fc.block_size;
                self.block_remaining = fc.block_size;
                return RxOutcome::FlowControl(clear_to_send(fc));
            }
        }

        RxOutcome::InProgress
    }
}

fn clear_to_send(fc: &RxFlowControl) -> FlowControlReply {
    FlowControlReply {
        status: FlowStatus::ClearToSend,
        block_size: fc.block_size,
        st_min: duration_to_st_min(fc.st_min),
    }
}
