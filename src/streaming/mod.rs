//! Stream events, sinks, and the event bus.
//!
//! The engine emits [`StreamEvent`]s while executing; a flume channel carries
//! them to an [`EventBus`] background listener that broadcasts to pluggable
//! [`StreamSink`]s. Which events are emitted is governed by the configured
//! [`StreamMode`] and optional node-subset filter, applied engine-side before
//! anything enters the channel.

mod bus;
mod event;
mod sink;

pub use bus::{EventBus, EventBusError};
pub use event::{EventEmitter, StreamEvent, StreamEventKind, StreamMode};
pub use sink::{ChannelSink, MemorySink, StdOutSink, StreamSink};
