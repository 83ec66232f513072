//! Outbound notifications: what the reader reports, and how it gets to consumers.
//!
//! Producers (driver callbacks, commands) push [`OutboundEvent`]s onto one
//! ordered queue through an [`EventPublisher`]. A single delivery task drains
//! the queue and is the only writer to the attached sinks.

pub mod bridge;
pub mod delivery;
pub mod sink;

pub use bridge::EventBridge;
pub use delivery::spawn_delivery;
pub use sink::{ChannelSink, EventSink, EventSinks, SinkSlot};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    PowerOn,
    Connected,
    Disconnected,
    ScanStopped,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::PowerOn => "POWER_ON",
            StatusKind::Connected => "CONNECTED",
            StatusKind::Disconnected => "DISCONNECTED",
            StatusKind::ScanStopped => "SCAN_STOPPED",
        }
    }
}

/// One accepted tag report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRead {
    #[serde(rename = "tagId")]
    pub identifier: String,
    #[serde(rename = "rssi")]
    pub signal_strength: i32,
    #[serde(rename = "memId")]
    pub memory_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Tag(TagRead),
    Status(StatusKind),
    Error(String),
}

/// Producer handle onto the ordered event queue
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: UnboundedSender<OutboundEvent>,
}

impl EventPublisher {
    pub fn new(tx: UnboundedSender<OutboundEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Never blocks. Events published after delivery stopped are discarded.
    pub fn publish(&self, event: OutboundEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("Event queue closed, dropping {:?}", e.0);
        }
    }

    pub fn status(&self, kind: StatusKind) {
        self.publish(OutboundEvent::Status(kind));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(OutboundEvent::Error(message.into()));
    }
}
