//! Link configuration container.

use core::time::Duration;
use embedded_can::{ExtendedId, Id, StandardId};

use crate::errors::IsoTpError;

/// Largest message a First Frame's 12-bit length field can announce.
pub const MAX_MESSAGE_LEN: usize = 4095;

/// Payload length of a classic CAN frame.
pub const CLASSIC_FRAME_LEN: usize = 8;

/// Data lengths a CAN FD frame can carry (DLC 8 to 15 map onto 8..=64 in uneven steps).
pub const FD_FRAME_LENS: [usize; 8] = [8, 12, 16, 20, 24, 32, 48, 64];

/// Configuration for one ISO-TP link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// CAN identifier used when transmitting.
    pub tx_id: Id,
    /// CAN identifier of the frames fed to this link.
    pub rx_id: Id,
    /// Capacity of the transmit buffer (largest message `send` accepts).
    pub tx_buffer_size: usize,
    /// Capacity of the receive buffer (largest message the link reassembles).
    pub rx_buffer_size: usize,
    /// Consecutive Frames granted to a sending peer per FlowControl (0 = unlimited).
    pub block_size: u8,
    /// Minimum separation time requested from a sending peer.
    pub st_min: Duration,
    /// Maximum number of FlowControl `Wait` frames accepted in a row before failing a send.
    pub wft_max: u8,
    /// Timeout waiting for flow control after a First Frame or a completed block.
    pub n_bs: Duration,
    /// Timeout waiting for the next Consecutive Frame while receiving.
    pub n_cr: Duration,
    /// Optional padding byte; when set, every transmitted frame is padded to `frame_len`.
    pub padding: Option<u8>,
    /// Maximum CAN payload size (DLC) supported by the transport.
    ///
    /// - Classic CAN uses 8 bytes.
    /// - CAN FD uses one of [`FD_FRAME_LENS`] (if supported by the backend frame type).
    pub frame_len: usize,
}

impl Default for LinkConfig {
    /// Diagnostic request/response identifiers, 4 KB buffers, one second timeouts.
    fn default() -> Self {
        Self {
            tx_id: Id::Standard(StandardId::new(0x7E0).unwrap_or(StandardId::ZERO)),
            rx_id: Id::Standard(StandardId::new(0x7E8).unwrap_or(StandardId::ZERO)),
            tx_buffer_size: MAX_MESSAGE_LEN,
            rx_buffer_size: MAX_MESSAGE_LEN,
            block_size: 8,
            st_min: Duration::from_millis(0),
            wft_max: 1,
            n_bs: Duration::from_millis(1000),
            n_cr: Duration::from_millis(1000),
            padding: None,
            frame_len: CLASSIC_FRAME_LEN,
        }
    }
}

/// Map a raw identifier to its frame format: 11-bit when it fits, 29-bit otherwise.
///
/// Returns `None` for values wider than 29 bits.
pub fn id_from_raw(raw: u32) -> Option<Id> {
    if raw <= u32::from(StandardId::MAX.as_raw()) {
        StandardId::new(raw as u16).map(Id::Standard)
    } else {
        ExtendedId::new(raw).map(Id::Extended)
    }
}

impl LinkConfig {
    /// Default configuration bound to raw identifiers, picking the identifier width per value.
    pub fn from_raw_ids(tx_id: u32, rx_id: u32) -> Result<Self, IsoTpError<()>> {
        let tx_id = id_from_raw(tx_id).ok_or(IsoTpError::InvalidArgument)?;
        let rx_id = id_from_raw(rx_id).ok_or(IsoTpError::InvalidArgument)?;
        Ok(Self {
            tx_id,
            rx_id,
            ..Self::default()
        })
    }

    /// Set both response timeouts (`n_bs` and `n_cr`).
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.n_bs = timeout;
        self.n_cr = timeout;
        self
    }

    /// Set both buffer capacities.
    pub fn with_buffer_sizes(mut self, tx: usize, rx: usize) -> Self {
        self.tx_buffer_size = tx;
        self.rx_buffer_size = rx;
        self
    }

    /// Reject invalid limits or mirrored IDs.
    pub fn validate(&self) -> Result<(), IsoTpError<()>> {
        for size in [self.tx_buffer_size, self.rx_buffer_size] {
            if size == 0 || size > MAX_MESSAGE_LEN {
                return Err(IsoTpError::InvalidConfig);
            }
        }
        if !FD_FRAME_LENS.contains(&self.frame_len) {
            return Err(IsoTpError::InvalidConfig);
        }
        if self.tx_id == self.rx_id {
            return Err(IsoTpError::InvalidConfig);
        }
        Ok(())
    }

    /// Max application bytes in a Single Frame.
    pub fn max_single_frame_payload(&self) -> usize {
        if self.frame_len > CLASSIC_FRAME_LEN {
            self.frame_len - 2
        } else {
            CLASSIC_FRAME_LEN - 1
        }
    }

    /// Max application bytes carried in a First Frame.
    pub fn max_first_frame_payload(&self) -> usize {
        self.frame_len - 2
    }

    /// Max application bytes carried in a Consecutive Frame.
    pub fn max_consecutive_frame_payload(&self) -> usize {
        self.frame_len - 1
    }
}
