//! Transmit-side progress tracking for ISO-TP.

use core::time::Duration;
use embedded_can::Id;

/// Progress indicator returned by [`crate::IsoTpLink::send`] and [`crate::IsoTpLink::poll`].
///
/// Describes the send direction after a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No send in progress.
    Idle,
    /// Waiting for a flow control frame from the peer.
    WaitingForFlowControl,
    /// Consecutive Frames are being sent; keep polling.
    InFlight,
    /// The last frame of the message was queued during this step.
    Completed,
}

/// Bookkeeping for an in-flight segmented transfer.
///
/// Peer flow-control parameters live here and are dropped with the session.
#[derive(Debug, Clone, Copy)]
pub struct TxSession {
    /// Identifier carried by every frame of this message.
    pub id: Id,
    /// Expected full payload length.
    pub payload_len: usize,
    /// Current offset into payload.
    pub offset: usize,
    /// Next sequence number nibble.
    pub next_sn: u8,
    /// Block size granted by the peer (0 = unlimited).
    pub block_size: u8,
    /// Frames remaining before next FC.
    pub block_remaining: u8,
    /// Separation time between CFs.
    pub st_min: Duration,
    /// Count of Wait responses seen.
    pub wait_count: u8,
}

impl TxSession {
    /// Session for a message whose First Frame carried `first_chunk` bytes.
    pub fn new(id: Id, payload_len: usize, first_chunk: usize) -> Self {
        Self {
            id,
            payload_len,
            offset: first_chunk,
            next_sn: 1,
            block_size: 0,
            block_remaining: 0,
            st_min: Duration::ZERO,
            wait_count: 0,
        }
    }

    /// Apply a ContinueToSend grant from the peer.
    pub fn grant(&mut self, block_size: u8, st_min: Duration) {
        self.wait_count = 0;
        self.block_size = block_size;
        self.block_remaining = block_size;
        self.st_min = st_min;
    }

    /// Bytes still to be sent in Consecutive Frames.
    pub fn remaining(&self) -> usize {
        self.payload_len - self.offset
    }
}

/// Transmit state machine.
#[derive(Debug, Clone, Copy)]
pub enum TxState<I> {
    /// No active transfer.
    Idle,
    /// First Frame or a full block sent; waiting for FC until deadline.
    AwaitingFc { session: TxSession, deadline: I },
    /// Sending consecutive frames; the next one may go out at `next_cf_at`.
    Sending {
        session: TxSession,
        next_cf_at: Option<I>,
    },
}

impl<I> TxState<I> {
    /// True when no segmented send is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self, TxState::Idle)
    }
}
