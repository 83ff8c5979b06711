//! `isotp-link`: a poll-driven ISO-TP (ISO 15765-2) link for CAN.
//!
//! ISO-TP carries payloads of up to 4095 bytes over CAN by segmenting them into:
//! - a **Single Frame** (small payloads),
//! - a **First Frame** + multiple **Consecutive Frames** (larger payloads), and
//! - **Flow Control** frames sent back by the receiver to regulate pacing and batching.
//!
//! The crate is built around [`IsoTpLink`], a session bound to one transmit and one receive
//! identifier. The link never owns a thread and never blocks:
//! - the CAN receive path (often an interrupt handler) feeds frames with [`IsoTpLink::on_frame`]
//!   or [`IsoTpLink::on_frame_received`],
//! - the application starts transfers with [`IsoTpLink::send`] and calls [`IsoTpLink::poll`]
//!   periodically to emit Consecutive Frames and expire timeouts,
//! - completed messages are extracted with [`IsoTpLink::receive`], or observed as they complete
//!   through a [`LinkEvents`] handler.
//!
//! Outgoing frames go through a [`FrameTransport`]; [`NbCan`] adapts any
//! `embedded_can::nb::Can` driver.
//!
//! # Feature flags
//! - `std` (default): enables allocation support and exports [`StdClock`].
//! - `alloc`: owned link buffers ([`LinkBuffer::Owned`], [`IsoTpLink::new`]) without the
//!   standard library.
//!
//! # Quick start
//! ```rust,ignore
//! use isotp_link::{IsoTpLink, LinkConfig, NbCan, Progress, StdClock};
//!
//! let cfg = LinkConfig::from_raw_ids(0x7E8, 0x7E0).unwrap();
//! let link = IsoTpLink::new(cfg, NbCan::new(driver), StdClock, ()).unwrap();
//!
//! // In the CAN receive handler:
//! link.on_frame(&frame);
//!
//! // In the main loop:
//! link.send(b"hello, segmented world")?;
//! while link.poll()? != Progress::Idle {}
//! let mut out = [0u8; 4095];
//! if let Ok(len) = link.receive(&mut out) {
//!     handle(&out[..len]);
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(any(feature = "alloc", feature = "std"))]
extern crate alloc;

pub mod config;
pub mod errors;
pub mod events;
mod link;
pub mod pdu;
pub mod rx;
pub mod timer;
pub mod transport;
pub mod tx;

pub use config::{LinkConfig, id_from_raw};
pub use errors::{IsoTpError, TimeoutKind, TransferError};
pub use events::{LinkEvents, LinkStatus, SendReport, TransferState};
pub use link::IsoTpLink;
pub use rx::LinkBuffer;
pub use timer::{Clock, MicrosClock};
#[cfg(feature = "std")]
pub use timer::StdClock;
pub use transport::{FrameTransport, NbCan, NbCanError};
pub use tx::Progress;

use core::time::Duration;

/// Receive-side ISO-TP flow-control parameters (BS/STmin).
///
/// These values are advertised to the remote sender in FlowControl (FC) frames. Updating them at
/// runtime allows shaping the sender's rate based on backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFlowControl {
    /// Block size (0 = unlimited).
    pub block_size: u8,
    /// Minimum separation time between consecutive frames.
    pub st_min: Duration,
}

impl RxFlowControl {
    /// Build flow-control parameters from a link's static configuration.
    pub fn from_config(cfg: &LinkConfig) -> Self {
        Self {
            block_size: cfg.block_size,
            st_min: cfg.st_min,
        }
    }
}
