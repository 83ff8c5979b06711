//! Completion notifications and observable link status.

use crate::errors::TransferError;

/// Outcome of one finished send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Message length handed to `send`.
    pub len: usize,
    /// `Ok` once the last frame was queued, otherwise why the send was abandoned.
    pub result: Result<(), TransferError>,
}

impl SendReport {
    /// True when every frame of the message was queued.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Receiver of link completion events.
///
/// Callbacks run inside the link's critical section, possibly in interrupt context (receive
/// completion is detected by frame intake). Keep them short and do not call back into the same
/// link: a re-entrant call is rejected with [`crate::IsoTpError::Busy`].
pub trait LinkEvents {
    /// A send finished, successfully or not. Invoked exactly once per accepted send.
    fn on_send_done(&mut self, report: SendReport) {
        let _ = report;
    }

    /// A message was reassembled. The slice is the link's receive buffer; the same message stays
    /// available to [`crate::IsoTpLink::receive`] until extracted or replaced.
    fn on_receive_done(&mut self, payload: &[u8]) {
        let _ = payload;
    }

    /// A reassembly was abandoned.
    fn on_receive_failed(&mut self, error: TransferError) {
        let _ = error;
    }
}

/// Ignore every event.
impl LinkEvents for () {}

/// Per-direction supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer active.
    Idle,
    /// Multi-frame transfer in progress.
    Active,
    /// The last transfer was abandoned by the timeout supervisor.
    ///
    /// Behaves like `Idle`; it only records why the previous transfer ended until the next one
    /// starts.
    TimedOut,
}

impl TransferState {
    /// True unless a transfer is in progress.
    pub fn is_idle(self) -> bool {
        !matches!(self, TransferState::Active)
    }
}

/// Snapshot returned by [`crate::IsoTpLink::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Send direction.
    pub send: TransferState,
    /// Receive direction.
    pub receive: TransferState,
    /// A complete message is waiting for [`crate::IsoTpLink::receive`].
    pub message_ready: bool,
}
