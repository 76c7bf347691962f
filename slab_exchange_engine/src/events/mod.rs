//! Fire-and-forget outbound events.
//!
//! Notifications, real-time broadcasts and settlement hooks are emitted as asynchronous messages on an outbound
//! channel that the core never awaits results from. A failure to deliver is logged and dropped; it is never surfaced
//! as a settlement failure.

mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
