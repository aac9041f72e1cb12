//! Pluggable stream sinks.

use std::sync::{Arc, Mutex};

use super::event::StreamEvent;

/// Receives broadcast events from the bus listener.
///
/// Sinks must never block for long; the listener delivers to every sink in
/// turn on one background task.
pub trait StreamSink: Send + Sync {
    fn accept(&self, event: &StreamEvent);
}

/// Writes each event as a JSON line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdOutSink;

impl StreamSink for StdOutSink {
    fn accept(&self, event: &StreamEvent) {
        println!("{}", event.to_json_value());
    }
}

/// Buffers events in memory, mainly for tests and inspection.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    #[must_use]
    pub fn collected(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StreamSink for MemorySink {
    fn accept(&self, event: &StreamEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events into a caller-owned flume channel, e.g. to bridge the bus
/// into an async consumer. Delivery stops silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: flume::Sender<StreamEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: flume::Sender<StreamEvent>) -> Self {
        Self { sender }
    }
}

impl StreamSink for ChannelSink {
    fn accept(&self, event: &StreamEvent) {
        let _ = self.sender.send(event.clone());
    }
}
