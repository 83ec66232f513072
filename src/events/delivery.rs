use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::{EventSinks, OutboundEvent};

/// Starts the single delivery task. It runs until every publisher is dropped
/// or the returned handle is aborted.
pub fn spawn_delivery(
    rx: UnboundedReceiver<OutboundEvent>,
    sinks: Arc<EventSinks>,
) -> JoinHandle<()> {
    tokio::spawn(deliver_events(rx, sinks))
}

async fn deliver_events(mut rx: UnboundedReceiver<OutboundEvent>, sinks: Arc<EventSinks>) {
    log::debug!("Event delivery started");
    while let Some(event) = rx.recv().await {
        match event {
            OutboundEvent::Tag(tag) => sinks.tags.deliver(tag),
            OutboundEvent::Status(kind) => sinks.status.deliver(kind),
            OutboundEvent::Error(message) => sinks.errors.deliver(message),
        }
    }
    log::debug!("Event delivery stopped");
}
