//! Frame transport seam.

use core::fmt;

use log::warn;

/// Non-blocking sink for outgoing CAN frames.
///
/// Implementations enqueue the frame and return immediately; a full queue is reported as an
/// error, never waited on. Receive-side filtering and delivery stay with the driver, which feeds
/// matching frames into [`crate::IsoTpLink::on_frame_received`].
pub trait FrameTransport {
    /// Frame type built by the link.
    type Frame: embedded_can::Frame;
    /// Driver-specific error.
    type Error: fmt::Debug;

    /// Queue one frame for transmission without blocking.
    fn try_send(&mut self, frame: &Self::Frame) -> Result<(), Self::Error>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for &mut T {
    type Frame = T::Frame;
    type Error = T::Error;

    fn try_send(&mut self, frame: &Self::Frame) -> Result<(), Self::Error> {
        (**self).try_send(frame)
    }
}

/// Errors from [`NbCan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbCanError<E> {
    /// The driver's transmit queue is full.
    QueueFull,
    /// Driver-reported error.
    Driver(E),
}

/// Adapter turning any [`embedded_can::nb::Can`] driver into a [`FrameTransport`].
#[derive(Debug)]
pub struct NbCan<C>(pub C);

impl<C> NbCan<C> {
    /// Wrap a driver.
    pub fn new(can: C) -> Self {
        Self(can)
    }

    /// Shared access to the driver.
    pub fn inner(&self) -> &C {
        &self.0
    }

    /// Give the driver back.
    pub fn into_inner(self) -> C {
        self.0
    }
}

impl<C: embedded_can::nb::Can> FrameTransport for NbCan<C> {
    type Frame = C::Frame;
    type Error = NbCanError<C::Error>;

    fn try_send(&mut self, frame: &Self::Frame) -> Result<(), Self::Error> {
        match self.0.transmit(frame) {
            Ok(None) => Ok(()),
            // The driver evicted a lower-priority pending frame to make room; requeue it once.
            Ok(Some(displaced)) => {
                if !matches!(self.0.transmit(&displaced), Ok(None)) {
                    warn!("isotp: displaced CAN frame could not be requeued");
                }
                Ok(())
            }
            Err(nb::Error::WouldBlock) => Err(NbCanError::QueueFull),
            Err(nb::Error::Other(err)) => Err(NbCanError::Driver(err)),
        }
    }
}
