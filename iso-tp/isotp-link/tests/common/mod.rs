#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_can::{Id, StandardId};
use embedded_can_mock::{BusHandle, MockCan};
use isotp_link::{
    Clock, IsoTpLink, LinkConfig, LinkEvents, NbCan, Progress, SendReport, TransferError,
};

pub type TestLink = IsoTpLink<'static, NbCan<MockCan>, ManualClock, Recorder>;

/// Clock that only moves when a test advances it.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn advance(&self, dur: Duration) {
        self.0.fetch_add(dur.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn elapsed(&self, earlier: u64) -> Duration {
        Duration::from_micros(self.now().saturating_sub(earlier))
    }

    fn add(&self, instant: u64, dur: Duration) -> u64 {
        instant.saturating_add(dur.as_micros() as u64)
    }
}

/// Everything the link reported, shared with the test body.
#[derive(Default)]
pub struct Events {
    pub sent: Vec<SendReport>,
    pub received: Vec<Vec<u8>>,
    pub failed: Vec<TransferError>,
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Events>>);

impl Recorder {
    pub fn sent(&self) -> Vec<SendReport> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().received.clone()
    }

    pub fn failed(&self) -> Vec<TransferError> {
        self.0.lock().unwrap().failed.clone()
    }
}

impl LinkEvents for Recorder {
    fn on_send_done(&mut self, report: SendReport) {
        self.0.lock().unwrap().sent.push(report);
    }

    fn on_receive_done(&mut self, payload: &[u8]) {
        self.0.lock().unwrap().received.push(payload.to_vec());
    }

    fn on_receive_failed(&mut self, error: TransferError) {
        self.0.lock().unwrap().failed.push(error);
    }
}

pub fn sid(raw: u16) -> Id {
    Id::Standard(StandardId::new(raw).unwrap())
}

pub fn cfg(tx: u16, rx: u16) -> LinkConfig {
    LinkConfig {
        tx_id: sid(tx),
        rx_id: sid(rx),
        tx_buffer_size: 4095,
        rx_buffer_size: 4095,
        block_size: 0,
        st_min: Duration::ZERO,
        wft_max: 1,
        n_bs: Duration::from_millis(1000),
        n_cr: Duration::from_millis(1000),
        padding: None,
        frame_len: 8,
    }
}

/// One side of a conversation: the link plus the node queue feeding it.
pub struct Endpoint {
    pub link: TestLink,
    pub can: MockCan,
    pub events: Recorder,
}

impl Endpoint {
    pub fn new(bus: &BusHandle, cfg: LinkConfig, clock: &ManualClock) -> Self {
        let can = MockCan::new_with_bus(bus, vec![]).unwrap();
        let events = Recorder::default();
        let link = IsoTpLink::new(cfg, NbCan::new(can.clone()), clock.clone(), events.clone())
            .unwrap();
        Self { link, can, events }
    }

    /// Deliver every queued frame to the link; returns how many were delivered.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(frame) = self.can.try_recv() {
            self.link.on_frame(&frame);
            count += 1;
        }
        count
    }
}

/// Tester (0x7E0 -> 0x7E8) and ECU (0x7E8 -> 0x7E0) on one bus.
pub struct Pair {
    pub bus: BusHandle,
    pub clock: ManualClock,
    pub tester: Endpoint,
    pub ecu: Endpoint,
}

impl Pair {
    pub fn new() -> Self {
        Self::with(|cfg| cfg)
    }

    pub fn with(tweak: impl Fn(LinkConfig) -> LinkConfig) -> Self {
        let bus = BusHandle::new();
        let clock = ManualClock::default();
        let tester = Endpoint::new(&bus, tweak(cfg(0x7E0, 0x7E8)), &clock);
        let ecu = Endpoint::new(&bus, tweak(cfg(0x7E8, 0x7E0)), &clock);
        Self {
            bus,
            clock,
            tester,
            ecu,
        }
    }

    /// Move frames and poll both links until nothing moves.
    pub fn pump(&self) {
        for _ in 0..10_000 {
            let moved = self.tester.drain() + self.ecu.drain();
            let tester = self.tester.link.poll().unwrap();
            let ecu = self.ecu.link.poll().unwrap();
            if moved == 0 && tester == Progress::Idle && ecu == Progress::Idle {
                return;
            }
        }
        panic!("links did not settle");
    }
}
