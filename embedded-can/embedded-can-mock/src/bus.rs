use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_can::{Frame as _, Id};

use crate::{MockError, MockFrame};

/// Upper bound on nodes attached to one bus.
pub const MAX_NODES: usize = 32;

struct Node {
    filters: Vec<Id>,
    queue: VecDeque<MockFrame>,
}

impl Node {
    fn accepts(&self, id: Id) -> bool {
        self.filters.is_empty() || self.filters.contains(&id)
    }
}

#[derive(Default)]
struct Bus {
    nodes: Vec<Node>,
    log: Vec<MockFrame>,
    refuse_transmits: usize,
}

/// Shared handle to an in-memory CAN bus.
///
/// Every frame transmitted by one node is queued on every other node whose acceptance filter
/// matches, and appended to a bus-wide log that tests can inspect.
#[derive(Clone, Default)]
pub struct BusHandle {
    inner: Arc<Mutex<Bus>>,
}

impl BusHandle {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Bus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every frame transmitted so far, in order.
    pub fn frames(&self) -> Vec<MockFrame> {
        self.lock().log.clone()
    }

    /// Forget the transmit log.
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Make the next `count` transmissions (from any node) fail with `WouldBlock`.
    pub fn refuse_next_transmits(&self, count: usize) {
        self.lock().refuse_transmits = count;
    }

    fn attach(&self, filters: Vec<Id>) -> Result<usize, MockError> {
        let mut bus = self.lock();
        if bus.nodes.len() >= MAX_NODES {
            return Err(MockError::TooManyNodes);
        }
        bus.nodes.push(Node {
            filters,
            queue: VecDeque::new(),
        });
        Ok(bus.nodes.len() - 1)
    }
}

/// One node attached to a [`BusHandle`].
///
/// Clones share the same receive queue, so one clone can be handed to a transmitter while another
/// drains incoming frames.
#[derive(Clone)]
pub struct MockCan {
    bus: BusHandle,
    node: usize,
}

impl MockCan {
    /// Attach a node to `bus`. An empty filter list accepts every identifier.
    pub fn new_with_bus(bus: &BusHandle, filters: Vec<Id>) -> Result<Self, MockError> {
        let node = bus.attach(filters)?;
        Ok(Self {
            bus: bus.clone(),
            node,
        })
    }

    /// Number of frames waiting in this node's receive queue.
    pub fn pending(&self) -> usize {
        self.bus.lock().nodes[self.node].queue.len()
    }

    /// Pop the next received frame, if any.
    pub fn try_recv(&self) -> Option<MockFrame> {
        self.bus.lock().nodes[self.node].queue.pop_front()
    }
}

impl embedded_can::nb::Can for MockCan {
    type Frame = MockFrame;
    type Error = MockError;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        let mut bus = self.bus.lock();
        if bus.refuse_transmits > 0 {
            bus.refuse_transmits -= 1;
            return Err(nb::Error::WouldBlock);
        }
        bus.log.push(*frame);
        let id = frame.id();
        for (idx, node) in bus.nodes.iter_mut().enumerate() {
            if idx != self.node && node.accepts(id) {
                node.queue.push_back(*frame);
            }
        }
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.try_recv().ok_or(nb::Error::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::nb::Can;
    use embedded_can::{Frame, StandardId};

    #[test]
    fn frames_reach_other_nodes_only() {
        let bus = BusHandle::new();
        let mut a = MockCan::new_with_bus(&bus, vec![]).unwrap();
        let mut b = MockCan::new_with_bus(&bus, vec![]).unwrap();

        let frame = MockFrame::standard(0x7E0, &[0x02, 0x10, 0x01]).unwrap();
        a.transmit(&frame).unwrap();

        assert_eq!(b.receive().unwrap(), frame);
        assert!(matches!(a.receive(), Err(nb::Error::WouldBlock)));
        assert_eq!(bus.frames(), vec![frame]);
    }

    #[test]
    fn filters_drop_unmatched_ids() {
        let bus = BusHandle::new();
        let mut a = MockCan::new_with_bus(&bus, vec![]).unwrap();
        let wanted = Id::Standard(StandardId::new(0x7E8).unwrap());
        let b = MockCan::new_with_bus(&bus, vec![wanted]).unwrap();

        a.transmit(&MockFrame::standard(0x7E0, &[1]).unwrap()).unwrap();
        a.transmit(&MockFrame::standard(0x7E8, &[2]).unwrap()).unwrap();

        assert_eq!(b.pending(), 1);
        assert_eq!(b.try_recv().unwrap().data(), &[2]);
    }

    #[test]
    fn refused_transmits_report_would_block() {
        let bus = BusHandle::new();
        let mut a = MockCan::new_with_bus(&bus, vec![]).unwrap();
        bus.refuse_next_transmits(1);

        let frame = MockFrame::standard(0x100, &[0xAA]).unwrap();
        assert!(matches!(a.transmit(&frame), Err(nb::Error::WouldBlock)));
        assert!(a.transmit(&frame).is_ok());
        assert_eq!(bus.frames().len(), 1);
    }

    #[test]
    fn attach_is_bounded() {
        let bus = BusHandle::new();
        for _ in 0..MAX_NODES {
            MockCan::new_with_bus(&bus, vec![]).unwrap();
        }
        assert!(matches!(
            MockCan::new_with_bus(&bus, vec![]),
            Err(MockError::TooManyNodes)
        ));
    }
}
