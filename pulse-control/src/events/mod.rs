//! Event system for the control plane

pub mod bus;
pub mod memory;
pub mod types;

pub use bus::{EventEmitter, EventSeq, NullEmitter};
pub use memory::BroadcastEmitter;
pub use types::ControlEvent;
