//! Event ports
//!
//! A port is a bounded FIFO connecting any number of senders with one dispatcher. The
//! sending side can live in any thread (e.g. the thread emulating a CAN receive
//! interrupt); the receiving side is owned by the dispatcher and drained once per tick.

use crate::types::{DispatcherError, EventKind, Result, SenderHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Address of an event in a port queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAddress {
    /// External event, addressed by the platform's sender handle
    Sender(SenderHandle),
    /// Internal event, addressed by the index of the internal event source
    Internal(usize),
}

/// An event in a port queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub address: EventAddress,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<QueuedEvent>,
    bytes: usize,
    max_usage: usize,
    max_usage_bytes: usize,
    lost_events: u64,
}

#[derive(Debug)]
struct PortQueue {
    capacity: usize,
    max_payload_size: usize,
    state: Mutex<QueueState>,
}

/// Create a connected pair of sender and receiver port
pub fn event_port(
    capacity: usize,
    max_payload_size: usize,
) -> (EventSenderPort, EventReceiverPort) {
    let queue = Arc::new(PortQueue {
        capacity: capacity.max(1),
        max_payload_size,
        state: Mutex::new(QueueState {
            events: VecDeque::with_capacity(capacity.max(1)),
            bytes: 0,
            max_usage: 0,
            max_usage_bytes: 0,
            lost_events: 0,
        }),
    });

    (
        EventSenderPort {
            queue: Arc::clone(&queue),
        },
        EventReceiverPort { queue },
    )
}

/// Sending end of a port
#[derive(Debug, Clone)]
pub struct EventSenderPort {
    queue: Arc<PortQueue>,
}

impl EventSenderPort {
    /// Post an event of an external event source
    pub fn post_external(
        &self,
        sender_handle: SenderHandle,
        kind: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.post(EventAddress::Sender(sender_handle), kind, payload)
    }

    /// Post an event of an internal event source
    pub fn post_internal(
        &self,
        idx_internal_source: usize,
        kind: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.post(EventAddress::Internal(idx_internal_source), kind, payload)
    }

    fn post(&self, address: EventAddress, kind: u32, payload: &[u8]) -> Result<()> {
        let kind = EventKind::custom(kind)?;
        if payload.len() > self.queue.max_payload_size {
            return Err(DispatcherError::PayloadTooLarge {
                size: payload.len(),
                max: self.queue.max_payload_size,
            });
        }

        let mut state = self.queue.state.lock();
        if state.events.len() >= self.queue.capacity {
            state.lost_events += 1;
            return Err(DispatcherError::QueueFull(self.queue.capacity));
        }

        state.bytes += payload.len();
        state.events.push_back(QueuedEvent {
            address,
            kind,
            payload: payload.to_vec(),
        });
        state.max_usage = state.max_usage.max(state.events.len());
        state.max_usage_bytes = state.max_usage_bytes.max(state.bytes);
        Ok(())
    }

    /// Number of events, which couldn't be posted because the queue was full
    pub fn lost_events(&self) -> u64 {
        self.queue.state.lock().lost_events
    }
}

/// Receiving end of a port, owned by a dispatcher
#[derive(Debug)]
pub struct EventReceiverPort {
    queue: Arc<PortQueue>,
}

impl EventReceiverPort {
    /// Take the event at the head of the queue
    pub fn read_from_head(&self) -> Option<QueuedEvent> {
        let mut state = self.queue.state.lock();
        let event = state.events.pop_front()?;
        state.bytes -= event.payload.len();
        Some(event)
    }

    /// Number of currently queued events
    pub fn len(&self) -> usize {
        self.queue.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }

    /// The maximum number of queued events ever seen
    pub fn max_usage(&self) -> usize {
        self.queue.state.lock().max_usage
    }

    /// The maximum number of queued payload bytes ever seen
    pub fn max_usage_bytes(&self) -> usize {
        self.queue.state.lock().max_usage_bytes
    }

    /// Number of events, which couldn't be posted because the queue was full
    pub fn lost_events(&self) -> u64 {
        self.queue.state.lock().lost_events
    }

    /// Create another sender feeding this port
    pub fn sender(&self) -> EventSenderPort {
        EventSenderPort {
            queue: Arc::clone(&self.queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = event_port(4, 8);
        tx.post_external(0x10, 1, &[1]).unwrap();
        tx.post_internal(2, 5, &[]).unwrap();

        let first = rx.read_from_head().unwrap();
        assert_eq!(first.address, EventAddress::Sender(0x10));
        assert_eq!(first.kind, EventKind::Custom(1));
        assert_eq!(first.payload, vec![1]);

        let second = rx.read_from_head().unwrap();
        assert_eq!(second.address, EventAddress::Internal(2));
        assert!(rx.read_from_head().is_none());
    }

    #[test]
    fn test_queue_full_counts_lost_events() {
        let (tx, rx) = event_port(2, 8);
        tx.post_external(1, 0, &[0; 3]).unwrap();
        tx.post_external(1, 0, &[0; 5]).unwrap();
        assert_eq!(tx.post_external(1, 0, &[]), Err(DispatcherError::QueueFull(2)));

        assert_eq!(rx.lost_events(), 1);
        assert_eq!(rx.max_usage(), 2);
        assert_eq!(rx.max_usage_bytes(), 8);

        rx.read_from_head();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.max_usage(), 2);
    }

    #[test]
    fn test_post_rejects_bad_events() {
        let (tx, rx) = event_port(2, 4);
        assert_eq!(
            tx.post_external(1, 0, &[0; 5]),
            Err(DispatcherError::PayloadTooLarge { size: 5, max: 4 })
        );
        assert!(matches!(
            tx.post_external(1, u32::MAX, &[]),
            Err(DispatcherError::InvalidEventKind(_))
        ));
        assert!(rx.is_empty());
        assert_eq!(rx.lost_events(), 0);
    }

    #[test]
    fn test_senders_from_other_threads() {
        let (tx, rx) = event_port(100, 0);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tx = rx.sender();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        tx.post_external(i, 0, &[]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(tx);
        assert_eq!(rx.len(), 40);
    }
}
