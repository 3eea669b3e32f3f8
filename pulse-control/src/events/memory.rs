//! Broadcast EventEmitter implementation
//!
//! BroadcastEmitter keeps every event in a Vec for replay and fans them out
//! to live subscribers over a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::ControlEvent;
use super::bus::{EventEmitter, EventSeq};

/// In-memory emitter with history
pub struct BroadcastEmitter {
    /// Emitted events with sequence numbers
    events: Mutex<Vec<(EventSeq, ControlEvent)>>,
    next_seq: AtomicU64,
    tx: broadcast::Sender<(EventSeq, ControlEvent)>,
}

impl BroadcastEmitter {
    /// Create an emitter with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            tx,
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<(EventSeq, ControlEvent)> {
        self.tx.subscribe()
    }

    /// Events with a sequence number of at least `seq`
    pub fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, ControlEvent)> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    /// Every event emitted so far, in order
    pub fn history(&self) -> Vec<ControlEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Current sequence number (high water mark)
    pub fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: ControlEvent) -> EventSeq {
        // Sequence and history are updated together so replay order matches
        // sequence order under concurrent emitters.
        let mut events = self.events.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        events.push((seq, event.clone()));
        drop(events);

        // No receivers is fine
        let _ = self.tx.send((seq, event));
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(count: u64) -> ControlEvent {
        ControlEvent::MetricSubscription {
            namespace: vec!["cpu".into(), "load".into()],
            count,
        }
    }

    #[test]
    fn emit_returns_increasing_sequence() {
        let emitter = BroadcastEmitter::new(16);
        assert_eq!(emitter.emit(sub(1)), 0);
        assert_eq!(emitter.emit(sub(2)), 1);
        assert_eq!(emitter.current_seq(), 2);
    }

    #[test]
    fn history_preserves_order() {
        let emitter = BroadcastEmitter::new(16);
        emitter.emit(sub(1));
        emitter.emit(sub(2));

        assert_eq!(emitter.history(), vec![sub(1), sub(2)]);
        assert_eq!(emitter.events_from(1), vec![(1, sub(2))]);
    }

    #[tokio::test]
    async fn subscribers_receive_live_events() {
        let emitter = BroadcastEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(sub(1));
        let (seq, event) = rx.recv().await.unwrap();
        assert_eq!(seq, 0);
        assert_eq!(event, sub(1));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let emitter = BroadcastEmitter::default();
        emitter.emit(sub(1));
        assert_eq!(emitter.history().len(), 1);
    }
}
