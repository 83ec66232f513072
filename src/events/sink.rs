use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{StatusKind, TagRead};

/// Consumer end of one outbound channel. Fire-and-forget: no acknowledgement.
pub trait EventSink<T>: Send + Sync {
    fn send(&self, event: T);
}

/// A channel that a consumer may listen on or cancel at any time.
/// Events arriving while nothing listens are dropped.
pub struct SinkSlot<T> {
    name: &'static str,
    sink: RwLock<Option<Arc<dyn EventSink<T>>>>,
}

impl<T> SinkSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, sink: RwLock::new(None) }
    }

    pub fn listen(&self, sink: Arc<dyn EventSink<T>>) {
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        log::debug!("{} sink attached", self.name);
    }

    pub fn cancel(&self) {
        if self.sink.write().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            log::debug!("{} sink cancelled", self.name);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub(crate) fn deliver(&self, event: T) {
        let sink = self.sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        match sink {
            Some(sink) => sink.send(event),
            None => log::trace!("No {} sink attached, event dropped", self.name),
        }
    }
}

/// The three outbound channels
pub struct EventSinks {
    pub tags: SinkSlot<TagRead>,
    pub status: SinkSlot<StatusKind>,
    pub errors: SinkSlot<String>,
}

impl EventSinks {
    pub fn new() -> Self {
        Self {
            tags: SinkSlot::new("tag"),
            status: SinkSlot::new("status"),
            errors: SinkSlot::new("error"),
        }
    }

    pub fn cancel_all(&self) {
        self.tags.cancel();
        self.status.cancel();
        self.errors.cancel();
    }
}

impl Default for EventSinks {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink that forwards into a tokio channel, for stream-style consumers
pub struct ChannelSink<T> {
    tx: UnboundedSender<T>,
}

impl<T: Send + 'static> ChannelSink<T> {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl<T: Send + 'static> EventSink<T> for ChannelSink<T> {
    fn send(&self, event: T) {
        // Receiver gone means the consumer stopped listening
        let _ = self.tx.send(event);
    }
}
