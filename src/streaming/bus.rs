//! The event bus: a flume channel fanned out to sinks by a background task.

use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use super::event::{EventEmitter, StreamEvent};
use super::sink::StreamSink;

#[derive(Debug, Error, Diagnostic)]
pub enum EventBusError {
    /// The bus channel has been dropped; no listener will ever receive this
    /// event.
    #[error("event bus channel is closed")]
    #[diagnostic(code(harmonyspace::streaming::closed))]
    Closed,
}

/// Owns the event channel and the sinks it broadcasts to.
///
/// [`listen_for_events`](Self::listen_for_events) spawns the background
/// delivery task; dropping the bus signals it to drain and stop.
pub struct EventBus {
    sender: flume::Sender<StreamEvent>,
    receiver: flume::Receiver<StreamEvent>,
    sinks: Arc<Mutex<Vec<Box<dyn StreamSink>>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            sinks: Arc::new(Mutex::new(Vec::new())),
            shutdown: None,
        }
    }

    /// Bus with a single pre-registered sink.
    #[must_use]
    pub fn with_sink(sink: Box<dyn StreamSink>) -> Self {
        let bus = Self::new();
        bus.add_sink(sink);
        bus
    }

    pub fn add_sink(&self, sink: Box<dyn StreamSink>) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(sink);
        }
    }

    /// Emitter handle feeding this bus.
    #[must_use]
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter::new(self.sender.clone())
    }

    /// Spawn the background delivery task. Events already queued and events
    /// sent later are delivered to every registered sink in order until the
    /// shutdown signal fires, after which the queue is drained and the task
    /// exits.
    pub fn listen_for_events(&mut self) -> tokio::task::JoinHandle<()> {
        let receiver = self.receiver.clone();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = receiver.recv_async() => match event {
                        Ok(event) => deliver(&sinks, &event),
                        Err(_) => break,
                    },
                    _ = &mut shutdown_rx => {
                        // Drain whatever is already queued, then stop.
                        while let Ok(event) = receiver.try_recv() {
                            deliver(&sinks, &event);
                        }
                        break;
                    }
                }
            }
            debug!("event bus listener stopped");
        })
    }
}

fn deliver(sinks: &Arc<Mutex<Vec<Box<dyn StreamSink>>>>, event: &StreamEvent) {
    if let Ok(sinks) = sinks.lock() {
        for sink in sinks.iter() {
            sink.accept(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queued", &self.receiver.len())
            .field("listening", &self.shutdown.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::event::StreamEventKind;
    use crate::streaming::sink::MemorySink;

    #[tokio::test]
    async fn delivers_queued_events_to_sinks() {
        let sink = MemorySink::new();
        let mut bus = EventBus::with_sink(Box::new(sink.clone()));
        let emitter = bus.emitter();
        emitter
            .emit(StreamEvent::now("wf", StreamEventKind::Terminated))
            .unwrap();

        let handle = bus.listen_for_events();
        drop(bus);
        handle.await.unwrap();

        assert_eq!(sink.len(), 1);
    }
}
