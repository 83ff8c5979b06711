//! The ISO-TP link: one conversation between a transmit and a receive identifier.

use core::cell::RefCell;
use core::cmp::min;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_can::{Frame, Id};
use log::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::errors::{IsoTpError, TimeoutKind, TransferError};
use crate::events::{LinkEvents, LinkStatus, SendReport, TransferState};
use crate::pdu::{FlowStatus, Pdu, PduError, decode, encode, peer_st_min};
use crate::rx::{FlowControlReply, LinkBuffer, RxMachine, RxOutcome, RxState};
use crate::timer::Clock;
use crate::transport::FrameTransport;
use crate::tx::{Progress, TxSession, TxState};
use crate::RxFlowControl;

/// ISO-TP endpoint bound to one pair of CAN identifiers.
///
/// Every entry point takes `&self` and runs inside a short critical section, so a link can be
/// placed in a `static` and shared between the CAN receive interrupt (calling
/// [`IsoTpLink::on_frame`]) and a task calling [`IsoTpLink::send`], [`IsoTpLink::poll`] and
/// [`IsoTpLink::receive`].
pub struct IsoTpLink<'a, T, C, H = ()>
where
    T: FrameTransport,
    C: Clock,
    H: LinkEvents,
{
    cfg: LinkConfig,
    clock: C,
    state: Mutex<CriticalSectionRawMutex, RefCell<LinkState<'a, T, C::Instant, H>>>,
}

struct LinkState<'a, T, I, H> {
    transport: T,
    events: H,
    tx_buffer: LinkBuffer<'a>,
    tx_state: TxState<I>,
    tx_status: TransferState,
    rx: RxMachine<'a>,
    rx_deadline: Option<I>,
    rx_status: TransferState,
    rx_flow_control: RxFlowControl,
    pending_fc: Option<FlowControlReply>,
}

impl<'a, T, C, H> IsoTpLink<'a, T, C, H>
where
    T: FrameTransport,
    C: Clock,
    H: LinkEvents,
{
    /// Build a link over caller-provided buffers.
    ///
    /// The buffers must hold at least `tx_buffer_size` and `rx_buffer_size` bytes respectively.
    pub fn with_buffers(
        cfg: LinkConfig,
        transport: T,
        clock: C,
        events: H,
        tx_buffer: LinkBuffer<'a>,
        rx_buffer: LinkBuffer<'a>,
    ) -> Result<Self, IsoTpError<()>> {
        cfg.validate()?;
        if tx_buffer.capacity() < cfg.tx_buffer_size || rx_buffer.capacity() < cfg.rx_buffer_size
        {
            return Err(IsoTpError::InvalidConfig);
        }
        let state = LinkState {
            transport,
            events,
            tx_buffer,
            tx_state: TxState::Idle,
            tx_status: TransferState::Idle,
            rx: RxMachine::new(rx_buffer, cfg.rx_buffer_size),
            rx_deadline: None,
            rx_status: TransferState::Idle,
            rx_flow_control: RxFlowControl::from_config(&cfg),
            pending_fc: None,
        };
        debug!(
            "isotp: link up, tx {:?} rx {:?}, buffers {}/{} bytes",
            cfg.tx_id, cfg.rx_id, cfg.tx_buffer_size, cfg.rx_buffer_size
        );
        Ok(Self {
            cfg,
            clock,
            state: Mutex::new(RefCell::new(state)),
        })
    }

    /// Build a link allocating both buffers at their configured sizes.
    #[cfg(feature = "alloc")]
    pub fn new(cfg: LinkConfig, transport: T, clock: C, events: H) -> Result<Self, IsoTpError<()>> {
        let tx_buffer = LinkBuffer::Owned(alloc::vec![0u8; cfg.tx_buffer_size]);
        let rx_buffer = LinkBuffer::Owned(alloc::vec![0u8; cfg.rx_buffer_size]);
        Self::with_buffers(cfg, transport, clock, events, tx_buffer, rx_buffer)
    }

    /// Configuration the link was built with.
    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    /// Start sending `data` on the configured transmit identifier.
    ///
    /// A payload that fits a Single Frame is sent immediately and reported complete. Longer
    /// payloads are copied into the transmit buffer, the First Frame is sent, and the rest of the
    /// message is driven by [`IsoTpLink::poll`].
    pub fn send(&self, data: &[u8]) -> Result<Progress, IsoTpError<T::Error>> {
        self.send_with_id(self.cfg.tx_id, data)
    }

    /// Like [`IsoTpLink::send`], with every frame of this message carrying `id`.
    ///
    /// Flow Control frames sent by the receive side keep using the configured transmit identifier.
    pub fn send_with_id(&self, id: Id, data: &[u8]) -> Result<Progress, IsoTpError<T::Error>> {
        if data.is_empty() {
            return Err(IsoTpError::InvalidArgument);
        }
        if data.len() > self.cfg.tx_buffer_size {
            return Err(IsoTpError::Overflow);
        }
        self.locked(|state| state.start_send(&self.cfg, &self.clock, id, data))
    }

    /// Feed the payload of one inbound frame already filtered to the receive identifier.
    ///
    /// Never blocks. Malformed frames are dropped. Callable from interrupt context.
    pub fn on_frame_received(&self, data: &[u8]) {
        let pdu = match decode(data) {
            Ok(pdu) => Ok(pdu),
            Err(PduError::InvalidFlowStatus(nibble)) => Err(nibble),
            Err(err) => {
                trace!("isotp: dropping undecodable frame: {err:?}");
                return;
            }
        };
        let result = self.locked(|state| {
            match pdu {
                Ok(Pdu::FlowControl {
                    status,
                    block_size,
                    st_min,
                }) => state.on_flow_control(&self.cfg, &self.clock, status, block_size, st_min),
                Ok(pdu) => state.on_data_pdu(&self.cfg, &self.clock, pdu),
                Err(nibble) => state.on_invalid_flow_status(nibble),
            }
            Ok::<(), IsoTpError<()>>(())
        });
        if result.is_err() {
            warn!("isotp: frame dropped, link re-entered from an event handler");
        }
    }

    /// Feed an inbound frame, checking its identifier first.
    ///
    /// Returns `false` (and ignores the frame) when it is not addressed to this link.
    pub fn on_frame<F: Frame>(&self, frame: &F) -> bool {
        if frame.id() != self.cfg.rx_id || frame.is_remote_frame() {
            return false;
        }
        self.on_frame_received(frame.data());
        true
    }

    /// Advance timers and the send path by one step.
    ///
    /// Retries a deferred Flow Control frame, expires overdue transfers, and emits at most one
    /// Consecutive Frame. A transfer that fails here is reported through the event handler; a
    /// transport error while sending a Consecutive Frame is also returned.
    pub fn poll(&self) -> Result<Progress, IsoTpError<T::Error>> {
        self.locked(|state| {
            let now = self.clock.now();
            state.retry_flow_control(&self.cfg);
            state.expire_reassembly(now);
            match state.tx_state {
                TxState::Idle => Ok(Progress::Idle),
                TxState::AwaitingFc { session, deadline } => {
                    if now >= deadline {
                        state.finish_send(
                            session.payload_len,
                            Err(TransferError::Timeout(TimeoutKind::NBs)),
                        );
                        Ok(Progress::Idle)
                    } else {
                        Ok(Progress::WaitingForFlowControl)
                    }
                }
                TxState::Sending {
                    session,
                    next_cf_at,
                } => state.send_consecutive(&self.cfg, &self.clock, session, next_cf_at, now),
            }
        })
    }

    /// Copy the completed message into `out` and return its length.
    ///
    /// Fails with [`IsoTpError::NotFound`] when no message is complete, and with
    /// [`IsoTpError::BufferTooSmall`] when `out` is shorter than the message, which is kept.
    pub fn receive(&self, out: &mut [u8]) -> Result<usize, IsoTpError<T::Error>> {
        self.locked(|state| {
            let Some(message) = state.rx.completed() else {
                return Err(IsoTpError::NotFound);
            };
            let len = message.len();
            let Some(dest) = out.get_mut(..len) else {
                return Err(IsoTpError::BufferTooSmall { needed: len });
            };
            dest.copy_from_slice(message);
            state.rx.reset();
            Ok(len)
        })
    }

    /// Hand the completed message to `f` without copying, then release it.
    ///
    /// `f` runs inside the link's critical section.
    pub fn receive_with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, IsoTpError<T::Error>> {
        self.locked(|state| {
            let Some(message) = state.rx.completed() else {
                return Err(IsoTpError::NotFound);
            };
            let out = f(message);
            state.rx.reset();
            Ok(out)
        })
    }

    /// Per-direction state and whether a message is waiting.
    pub fn status(&self) -> Result<LinkStatus, IsoTpError<T::Error>> {
        self.locked(|state| {
            Ok(LinkStatus {
                send: state.tx_status,
                receive: state.rx_status,
                message_ready: state.rx.state() == RxState::Complete,
            })
        })
    }

    /// Current receive-side FlowControl parameters (BS/STmin).
    pub fn rx_flow_control(&self) -> Result<RxFlowControl, IsoTpError<T::Error>> {
        self.locked(|state| Ok(state.rx_flow_control))
    }

    /// Update receive-side FlowControl parameters (BS/STmin).
    ///
    /// Takes effect at the next First Frame or block boundary.
    pub fn set_rx_flow_control(&self, fc: RxFlowControl) -> Result<(), IsoTpError<T::Error>> {
        self.locked(|state| {
            state.rx_flow_control = fc;
            Ok(())
        })
    }

    /// Run `f` with the event handler, e.g. to drain what it collected.
    pub fn events<R>(&self, f: impl FnOnce(&mut H) -> R) -> Result<R, IsoTpError<T::Error>> {
        self.locked(|state| Ok(f(&mut state.events)))
    }

    /// Tear the link down, returning the transport and the event handler.
    pub fn release(self) -> (T, H) {
        let state = self.state.into_inner().into_inner();
        debug!("isotp: link released");
        (state.transport, state.events)
    }

    fn locked<R, E>(
        &self,
        f: impl FnOnce(&mut LinkState<'a, T, C::Instant, H>) -> Result<R, IsoTpError<E>>,
    ) -> Result<R, IsoTpError<E>> {
        self.state.lock(|cell| match cell.try_borrow_mut() {
            Ok(mut state) => f(&mut state),
            Err(_) => Err(IsoTpError::Busy),
        })
    }
}

impl<T, I, H> LinkState<'_, T, I, H>
where
    T: FrameTransport,
    I: Copy + PartialOrd,
    H: LinkEvents,
{
    fn start_send<C: Clock<Instant = I>>(
        &mut self,
        cfg: &LinkConfig,
        clock: &C,
        id: Id,
        data: &[u8],
    ) -> Result<Progress, IsoTpError<T::Error>> {
        if !self.tx_state.is_idle() {
            return Err(IsoTpError::NotIdle);
        }
        let len = data.len();

        if len <= cfg.max_single_frame_payload() {
            let pdu = Pdu::SingleFrame {
                len: len as u8,
                data,
            };
            transmit(&mut self.transport, cfg, id, &pdu)?;
            trace!("isotp: single frame sent, {len} bytes");
            self.tx_status = TransferState::Idle;
            self.events.on_send_done(SendReport {
                len,
                result: Ok(()),
            });
            return Ok(Progress::Completed);
        }

        let chunk = cfg.max_first_frame_payload();
        let pdu = Pdu::FirstFrame {
            len: len as u16,
            data: &data[..chunk],
        };
        transmit(&mut self.transport, cfg, id, &pdu)?;
        self.tx_buffer.as_mut()[..len].copy_from_slice(data);

        let deadline = clock.add(clock.now(), cfg.n_bs);
        self.tx_state = TxState::AwaitingFc {
            session: TxSession::new(id, len, chunk),
            deadline,
        };
        self.tx_status = TransferState::Active;
        debug!("isotp: first frame sent, {len} bytes, awaiting flow control");
        Ok(Progress::WaitingForFlowControl)
    }

    fn on_flow_control<C: Clock<Instant = I>>(
        &mut self,
        cfg: &LinkConfig,
        clock: &C,
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    ) {
        let TxState::AwaitingFc { mut session, .. } = self.tx_state else {
            trace!("isotp: flow control ignored, no send awaiting it");
            return;
        };
        match status {
            FlowStatus::ClearToSend => {
                session.grant(block_size, peer_st_min(st_min));
                trace!(
                    "isotp: clear to send, bs={} st_min={:?}",
                    session.block_size, session.st_min
                );
                self.tx_state = TxState::Sending {
                    session,
                    next_cf_at: None,
                };
            }
            FlowStatus::Wait => {
                session.wait_count = session.wait_count.saturating_add(1);
                if session.wait_count > cfg.wft_max {
                    self.finish_send(session.payload_len, Err(TransferError::WaitLimitExceeded));
                } else {
                    trace!("isotp: peer asked to wait ({})", session.wait_count);
                    self.tx_state = TxState::AwaitingFc {
                        session,
                        deadline: clock.add(clock.now(), cfg.n_bs),
                    };
                }
            }
            FlowStatus::Overflow => {
                self.finish_send(session.payload_len, Err(TransferError::Overflow));
            }
        }
    }

    fn on_invalid_flow_status(&mut self, nibble: u8) {
        match self.tx_state {
            TxState::AwaitingFc { session, .. } => {
                warn!("isotp: flow control with reserved status {nibble:#x}");
                self.finish_send(session.payload_len, Err(TransferError::InvalidFlowStatus));
            }
            TxState::Idle | TxState::Sending { .. } => {
                trace!("isotp: stray flow control with reserved status {nibble:#x}");
            }
        }
    }

    fn on_data_pdu<C: Clock<Instant = I>>(&mut self, cfg: &LinkConfig, clock: &C, pdu: Pdu<'_>) {
        let step = self.rx.on_pdu(&self.rx_flow_control, pdu);
        if step.interrupted {
            warn!("isotp: reassembly interrupted by a new message");
            self.end_reassembly(TransferState::Idle);
            self.events.on_receive_failed(TransferError::UnexpectedPdu);
        }
        match step.outcome {
            RxOutcome::Ignored => trace!("isotp: frame ignored"),
            RxOutcome::InProgress => {
                self.rx_deadline = Some(clock.add(clock.now(), cfg.n_cr));
            }
            RxOutcome::FlowControl(reply) => {
                self.rx_status = TransferState::Active;
                self.rx_deadline = Some(clock.add(clock.now(), cfg.n_cr));
                self.send_flow_control(cfg, reply);
            }
            RxOutcome::Completed(len) => {
                self.end_reassembly(TransferState::Idle);
                debug!("isotp: received {len} bytes");
                if let Some(message) = self.rx.completed() {
                    self.events.on_receive_done(message);
                }
            }
            RxOutcome::Aborted { error, reply } => {
                warn!("isotp: reception aborted: {error}");
                self.end_reassembly(TransferState::Idle);
                if let Some(reply) = reply {
                    self.send_flow_control(cfg, reply);
                }
                self.events.on_receive_failed(error);
            }
        }
    }

    fn send_consecutive<C: Clock<Instant = I>>(
        &mut self,
        cfg: &LinkConfig,
        clock: &C,
        mut session: TxSession,
        next_cf_at: Option<I>,
        now: I,
    ) -> Result<Progress, IsoTpError<T::Error>> {
        if let Some(at) = next_cf_at
            && now < at
        {
            return Ok(Progress::InFlight);
        }

        let chunk = min(session.remaining(), cfg.max_consecutive_frame_payload());
        let end = session.offset + chunk;
        let pdu = Pdu::ConsecutiveFrame {
            sn: session.next_sn,
            data: &self.tx_buffer.as_ref()[session.offset..end],
        };
        if let Err(err) = transmit(&mut self.transport, cfg, session.id, &pdu) {
            self.finish_send(session.payload_len, Err(TransferError::Transport));
            return Err(err);
        }
        trace!(
            "isotp: consecutive frame sn={} ({}/{} bytes)",
            session.next_sn, end, session.payload_len
        );
        session.offset = end;
        session.next_sn = (session.next_sn + 1) & 0x0F;

        if session.offset >= session.payload_len {
            self.finish_send(session.payload_len, Ok(()));
            return Ok(Progress::Completed);
        }

        if session.block_size > 0 {
            session.block_remaining = session.block_remaining.saturating_sub(1);
            if session.block_remaining == 0 {
                self.tx_state = TxState::AwaitingFc {
                    session,
                    deadline: clock.add(now, cfg.n_bs),
                };
                return Ok(Progress::WaitingForFlowControl);
            }
        }

        let next_cf_at = if session.st_min.is_zero() {
            None
        } else {
            Some(clock.add(now, session.st_min))
        };
        self.tx_state = TxState::Sending {
            session,
            next_cf_at,
        };
        Ok(Progress::InFlight)
    }

    fn finish_send(&mut self, len: usize, result: Result<(), TransferError>) {
        self.tx_state = TxState::Idle;
        self.tx_status = match result {
            Err(TransferError::Timeout(_)) => TransferState::TimedOut,
            _ => TransferState::Idle,
        };
        match result {
            Ok(()) => debug!("isotp: sent {len} bytes"),
            Err(err) => warn!("isotp: send of {len} bytes aborted: {err}"),
        }
        self.events.on_send_done(SendReport { len, result });
    }

    fn expire_reassembly(&mut self, now: I) {
        let Some(deadline) = self.rx_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        warn!(
            "isotp: reception timed out after {} bytes",
            self.rx.written()
        );
        self.rx.reset();
        self.end_reassembly(TransferState::TimedOut);
        self.events
            .on_receive_failed(TransferError::Timeout(TimeoutKind::NCr));
    }

    fn end_reassembly(&mut self, status: TransferState) {
        self.rx_deadline = None;
        self.rx_status = status;
        // A deferred flow control belongs to the transfer that just ended.
        self.pending_fc = None;
    }

    fn send_flow_control(&mut self, cfg: &LinkConfig, reply: FlowControlReply) {
        match transmit(&mut self.transport, cfg, cfg.tx_id, &flow_control_pdu(reply)) {
            Ok(()) => {
                trace!("isotp: flow control sent: {reply:?}");
                self.pending_fc = None;
            }
            Err(IsoTpError::LinkError(err)) => {
                debug!("isotp: flow control deferred: {err:?}");
                self.pending_fc = Some(reply);
            }
            Err(err) => warn!("isotp: flow control dropped: {err:?}"),
        }
    }

    fn retry_flow_control(&mut self, cfg: &LinkConfig) {
        if let Some(reply) = self.pending_fc {
            self.send_flow_control(cfg, reply);
        }
    }
}

fn flow_control_pdu(reply: FlowControlReply) -> Pdu<'static> {
    Pdu::FlowControl {
        status: reply.status,
        block_size: reply.block_size,
        st_min: reply.st_min,
    }
}

fn transmit<T: FrameTransport>(
    transport: &mut T,
    cfg: &LinkConfig,
    id: Id,
    pdu: &Pdu<'_>,
) -> Result<(), IsoTpError<T::Error>> {
    let frame: T::Frame =
        encode(id, pdu, cfg.padding, cfg.frame_len).map_err(|_| IsoTpError::InvalidArgument)?;
    transport.try_send(&frame).map_err(IsoTpError::LinkError)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::cell::Cell;
    use core::time::Duration;
    use std::rc::Rc;
    use std::vec::Vec;

    use embedded_can::StandardId;
    use embedded_can_mock::MockFrame;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<MockFrame>,
        refuse: usize,
    }

    impl FrameTransport for Recorder {
        type Frame = MockFrame;
        type Error = ();

        fn try_send(&mut self, frame: &MockFrame) -> Result<(), ()> {
            if self.refuse > 0 {
                self.refuse -= 1;
                return Err(());
            }
            self.frames.push(*frame);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Log {
        sent: Vec<SendReport>,
        received: Vec<Vec<u8>>,
        failed: Vec<TransferError>,
    }

    impl LinkEvents for Log {
        fn on_send_done(&mut self, report: SendReport) {
            self.sent.push(report);
        }

        fn on_receive_done(&mut self, payload: &[u8]) {
            self.received.push(payload.to_vec());
        }

        fn on_receive_failed(&mut self, error: TransferError) {
            self.failed.push(error);
        }
    }

    #[derive(Clone)]
    struct TestClock(Rc<Cell<u64>>);

    impl TestClock {
        fn advance(&self, dur: Duration) {
            self.0.set(self.0.get() + dur.as_micros() as u64);
        }
    }

    impl Clock for TestClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.0.get()
        }

        fn elapsed(&self, earlier: u64) -> Duration {
            Duration::from_micros(self.0.get() - earlier)
        }

        fn add(&self, instant: u64, dur: Duration) -> u64 {
            instant + dur.as_micros() as u64
        }
    }

    fn sid(raw: u16) -> Id {
        Id::Standard(StandardId::new(raw).unwrap())
    }

    fn link() -> (IsoTpLink<'static, Recorder, TestClock, Log>, TestClock) {
        let clock = TestClock(Rc::new(Cell::new(0)));
        let cfg = LinkConfig::default().with_buffer_sizes(64, 64);
        let link = IsoTpLink::new(cfg, Recorder::default(), clock.clone(), Log::default()).unwrap();
        (link, clock)
    }

    fn sent(link: &IsoTpLink<'static, Recorder, TestClock, Log>) -> Vec<Vec<u8>> {
        link.state.lock(|cell| {
            let state = cell.borrow();
            state.transport.frames.iter().map(|f| f.data().to_vec()).collect()
        })
    }

    #[test]
    fn single_frame_completes_synchronously() {
        let (link, _) = link();
        assert_eq!(link.send(&[1, 2, 3]).unwrap(), Progress::Completed);
        assert_eq!(sent(&link), vec![vec![0x03, 1, 2, 3]]);
        let reports = link.events(|log| log.sent.clone()).unwrap();
        assert_eq!(
            reports,
            vec![SendReport {
                len: 3,
                result: Ok(())
            }]
        );
    }

    #[test]
    fn rejects_empty_and_oversized_payloads() {
        let (link, _) = link();
        assert!(matches!(link.send(&[]), Err(IsoTpError::InvalidArgument)));
        assert!(matches!(link.send(&[0; 65]), Err(IsoTpError::Overflow)));
        assert!(sent(&link).is_empty());
    }

    #[test]
    fn segmented_send_follows_flow_control() {
        let (link, _) = link();
        let payload: Vec<u8> = (0..20).collect();
        assert_eq!(link.send(&payload).unwrap(), Progress::WaitingForFlowControl);
        assert_eq!(link.poll().unwrap(), Progress::WaitingForFlowControl);
        assert!(matches!(link.send(&[9]), Err(IsoTpError::NotIdle)));

        link.on_frame_received(&[0x30, 0x00, 0x00]);
        assert_eq!(link.poll().unwrap(), Progress::InFlight);
        assert_eq!(link.poll().unwrap(), Progress::Completed);
        assert_eq!(link.poll().unwrap(), Progress::Idle);

        let frames = sent(&link);
        assert_eq!(frames[0], vec![0x10, 20, 0, 1, 2, 3, 4, 5]);
        assert_eq!(frames[1], vec![0x21, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(frames[2], vec![0x22, 13, 14, 15, 16, 17, 18, 19]);
        assert_eq!(link.status().unwrap().send, TransferState::Idle);
    }

    #[test]
    fn flow_control_timeout_marks_send_timed_out() {
        let (link, clock) = link();
        link.send(&[0xAA; 10]).unwrap();
        clock.advance(Duration::from_millis(1001));
        assert_eq!(link.poll().unwrap(), Progress::Idle);
        assert_eq!(link.status().unwrap().send, TransferState::TimedOut);
        let reports = link.events(|log| log.sent.clone()).unwrap();
        assert_eq!(
            reports[0].result,
            Err(TransferError::Timeout(TimeoutKind::NBs))
        );
        assert_eq!(link.send(&[1]).unwrap(), Progress::Completed);
    }

    #[test]
    fn first_frame_gets_clear_to_send_and_message_is_extracted() {
        let (link, _) = link();
        link.on_frame_received(&[0x10, 0x09, 1, 2, 3, 4, 5, 6]);
        assert_eq!(sent(&link), vec![vec![0x30, 0x08, 0x00]]);
        assert_eq!(link.status().unwrap().receive, TransferState::Active);

        link.on_frame_received(&[0x21, 7, 8, 9, 0xCC, 0xCC, 0xCC, 0xCC]);
        let status = link.status().unwrap();
        assert!(status.message_ready);
        assert_eq!(status.receive, TransferState::Idle);

        let mut small = [0u8; 4];
        assert!(matches!(
            link.receive(&mut small),
            Err(IsoTpError::BufferTooSmall { needed: 9 })
        ));
        let mut out = [0u8; 16];
        assert_eq!(link.receive(&mut out).unwrap(), 9);
        assert_eq!(&out[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(matches!(link.receive(&mut out), Err(IsoTpError::NotFound)));
    }

    #[test]
    fn deferred_flow_control_is_retried_by_poll() {
        let (link, _) = link();
        link.state.lock(|cell| cell.borrow_mut().transport.refuse = 1);
        link.on_frame_received(&[0x10, 0x09, 1, 2, 3, 4, 5, 6]);
        assert!(sent(&link).is_empty());
        link.poll().unwrap();
        assert_eq!(sent(&link), vec![vec![0x30, 0x08, 0x00]]);
    }

    #[test]
    fn reentrant_call_is_rejected() {
        let (link, _) = link();
        let inner = link
            .locked(|_state| Ok::<_, IsoTpError<()>>(link.status()))
            .unwrap();
        assert!(matches!(inner, Err(IsoTpError::Busy)));
        assert!(link.status().is_ok());
    }

    #[test]
    fn on_frame_filters_by_identifier() {
        let (link, _) = link();
        let other = MockFrame::new(sid(0x123), &[0x01, 0x42]).unwrap();
        let ours = MockFrame::new(sid(0x7E8), &[0x01, 0x42]).unwrap();
        assert!(!link.on_frame(&other));
        assert!(!link.status().unwrap().message_ready);
        assert!(link.on_frame(&ours));
        assert!(link.status().unwrap().message_ready);
    }
}
