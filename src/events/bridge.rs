//! Adapts driver callbacks into outbound events.
//!
//! Runs on whatever thread the vendor library calls back from. Work done here
//! is bounded: read the record, one short session lock, one unbounded send.

use std::panic::{self, AssertUnwindSafe};

use super::{EventPublisher, OutboundEvent, StatusKind, TagRead};
use crate::device::session::{lock_session, SharedSession};
use crate::device::TagId;
use crate::driver::{DriverResult, TagListener, TagRecord};

pub struct EventBridge {
    session: SharedSession,
    events: EventPublisher,
}

impl EventBridge {
    pub fn new(session: SharedSession, events: EventPublisher) -> Self {
        Self { session, events }
    }
}

/// Pulls the fields out of a driver record. `None` when the tag has no identifier.
fn extract(record: &dyn TagRecord) -> DriverResult<Option<(TagId, i32, Option<String>)>> {
    let Some(id) = record.epc_id()?.as_deref().and_then(TagId::normalize) else {
        return Ok(None);
    };
    let rssi = record.rssi()?;
    let mem_id = record.mem_id()?.map(|m| m.to_uppercase());
    Ok(Some((id, rssi, mem_id)))
}

impl TagListener for EventBridge {
    fn on_tag(&self, record: &dyn TagRecord) {
        let extracted = match panic::catch_unwind(AssertUnwindSafe(|| extract(record))) {
            Ok(Ok(Some(fields))) => fields,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                log::warn!("Dropping malformed tag report: {:#}", e);
                self.events.error(format!("Tag processing error: {}", e));
                return;
            }
            Err(_) => {
                log::error!("Tag report extraction panicked");
                self.events.error("Tag processing error: driver record panicked");
                return;
            }
        };
        let (id, rssi, mem_id) = extracted;

        // Publishing under the lock keeps queue order identical to filter order
        let mut session = lock_session(&self.session);
        if !session.admit(&id) {
            log::trace!("Duplicate tag {} filtered", id);
            return;
        }
        self.events.publish(OutboundEvent::Tag(TagRead {
            identifier: id.into_string(),
            signal_strength: rssi,
            memory_id: mem_id,
        }));
    }

    /// The callback carries no scan identity, so a late one cannot be told
    /// apart from a fresh one. Scan state is owned by `stopScan`; this only reports.
    fn on_scan_stopped(&self) {
        log::debug!("Driver reported scan stopped");
        self.events.status(StatusKind::ScanStopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::session::DeviceSession;
    use crate::device::ScanState;
    use crate::driver::mock::MalformedTag;
    use crate::driver::RawTag;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn bridge(unique_only: bool) -> (EventBridge, SharedSession, UnboundedReceiver<OutboundEvent>) {
        let session = DeviceSession::shared();
        {
            let mut s = lock_session(&session);
            s.power_up();
            s.begin_connect().unwrap();
            s.finish_connect(true);
            s.begin_scan(crate::device::ScanMode::Continuous, unique_only).unwrap();
        }
        let (publisher, rx) = EventPublisher::channel();
        (EventBridge::new(session.clone(), publisher), session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn tag_ids(events: &[OutboundEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::Tag(t) => Some(t.identifier.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unique_only_drops_case_variants() {
        let (bridge, _session, mut rx) = bridge(true);
        for epc in ["AA", "aa", "BB"] {
            bridge.on_tag(&RawTag::new(epc, -40));
        }
        assert_eq!(tag_ids(&drain(&mut rx)), vec!["AA", "BB"]);
    }

    #[test]
    fn test_all_reads_pass_when_not_unique() {
        let (bridge, _session, mut rx) = bridge(false);
        for epc in ["bb", "AA", "bb", ""] {
            bridge.on_tag(&RawTag::new(epc, -40));
        }
        assert_eq!(tag_ids(&drain(&mut rx)), vec!["BB", "AA", "BB"]);
    }

    #[test]
    fn test_mem_id_is_uppercased() {
        let (bridge, _session, mut rx) = bridge(false);
        bridge.on_tag(&RawTag::new("e2", -70).with_mem_id("3000ab"));
        assert_eq!(
            drain(&mut rx),
            vec![OutboundEvent::Tag(TagRead {
                identifier: "E2".to_string(),
                signal_strength: -70,
                memory_id: Some("3000AB".to_string()),
            })]
        );
    }

    #[test]
    fn test_missing_identifier_is_discarded() {
        let (bridge, session, mut rx) = bridge(true);
        bridge.on_tag(&RawTag::default());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(lock_session(&session).seen_count(), 0);
    }

    #[test]
    fn test_malformed_record_goes_to_error_channel() {
        let (bridge, _session, mut rx) = bridge(false);
        bridge.on_tag(&MalformedTag);
        bridge.on_tag(&RawTag::new("CC", -50));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], OutboundEvent::Error(m) if m.starts_with("Tag processing error: ")));
        assert_eq!(tag_ids(&events), vec!["CC"]);
    }

    #[test]
    fn test_stop_callback_only_reports() {
        let (bridge, session, mut rx) = bridge(false);
        lock_session(&session).confirm_scan(crate::device::ScanMode::Continuous).unwrap();

        bridge.on_scan_stopped();
        assert_eq!(
            lock_session(&session).scan_state(),
            ScanState::Scanning(crate::device::ScanMode::Continuous)
        );
        assert_eq!(drain(&mut rx), vec![OutboundEvent::Status(StatusKind::ScanStopped)]);
    }
}
