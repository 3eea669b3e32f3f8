//! EventEmitter trait definition

use super::ControlEvent;

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Sink for control plane events
///
/// Emission is synchronous and fire-and-forget: the manager calls `emit`
/// after a state change has been applied and never waits on consumers.
pub trait EventEmitter: Send + Sync {
    /// Emit an event, returns its sequence number
    fn emit(&self, event: ControlEvent) -> EventSeq;
}

/// Emitter that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: ControlEvent) -> EventSeq {
        0
    }
}
