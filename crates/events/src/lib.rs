//! Domain events and the per-user event stream.
//!
//! Events are produced by outbox job handlers and consumed by live streaming
//! connections. The stream is in-process only: it does not survive a restart,
//! durability lives in the outbox.

pub mod event;
pub mod in_memory;
pub mod stream;

pub use event::{
    ChatClosedEvent, CoreEventFields, Event, EventError, EventType, MessageBlockedEvent,
    MessageSentEvent, NewChatEvent, NewMessageEvent,
};
pub use in_memory::{InMemoryEventStream, StreamSettings};
pub use stream::{EventStream, StreamError, Subscription};
