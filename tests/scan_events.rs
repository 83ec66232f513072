use std::sync::Arc;
use std::time::Duration;

use rfid_scanner_lib::device::{ScanMode, ScanState};
use rfid_scanner_lib::driver::mock::{DriverCall, MockDriver, MockPowerRail, MockReport};
use rfid_scanner_lib::driver::{MemoryBank, RawTag};
use rfid_scanner_lib::{
    ChannelSink, CommandOutcome, MethodCall, ScannerConfig, ScannerPlugin, StatusKind, TagRead,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

struct Rig {
    plugin: ScannerPlugin,
    driver: Arc<MockDriver>,
    tags: UnboundedReceiver<TagRead>,
    status: UnboundedReceiver<StatusKind>,
    errors: UnboundedReceiver<String>,
}

async fn connected_rig() -> Rig {
    let driver = Arc::new(MockDriver::new());
    let power = Arc::new(MockPowerRail::new());
    let config = ScannerConfig { settle_delay_ms: 0, ..ScannerConfig::default() };
    let plugin = ScannerPlugin::attach(config, driver.clone(), power).unwrap();

    let (tags, tag_rx) = ChannelSink::<TagRead>::new();
    let (status, status_rx) = ChannelSink::<StatusKind>::new();
    let (errors, error_rx) = ChannelSink::<String>::new();
    plugin.sinks().tags.listen(tags);
    plugin.sinks().status.listen(status);
    plugin.sinks().errors.listen(errors);

    assert!(plugin.handle(MethodCall::bare("init")).await.is_success());
    assert!(plugin.handle(MethodCall::bare("connect")).await.is_success());

    let mut rig = Rig { plugin, driver, tags: tag_rx, status: status_rx, errors: error_rx };
    assert_eq!(next(&mut rig.status).await, StatusKind::PowerOn);
    assert_eq!(next(&mut rig.status).await, StatusKind::Connected);
    rig
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event timed out")
        .expect("channel closed")
}

async fn start(rig: &Rig, mode: &str, unique_only: bool) -> CommandOutcome {
    rig.plugin
        .handle(MethodCall::new(
            "startScan",
            json!({ "mode": mode, "uniqueOnly": unique_only }),
        ))
        .await
}

/// Replays `reports` followed by a stop callback and waits for the stop to
/// arrive, so every earlier tag has reached the sink.
async fn replay(rig: &mut Rig, mut reports: Vec<MockReport>) -> Vec<String> {
    reports.push(MockReport::Stopped);
    rig.driver.emit(reports).join().unwrap();
    assert_eq!(next(&mut rig.status).await, StatusKind::ScanStopped);

    let mut ids = Vec::new();
    while let Ok(tag) = rig.tags.try_recv() {
        ids.push(tag.identifier);
    }
    ids
}

fn tags(ids: &[&str]) -> Vec<MockReport> {
    ids.iter().map(|id| MockReport::Tag(RawTag::new(*id, -48))).collect()
}

#[tokio::test]
async fn test_unique_scan_dedups_case_insensitively() {
    let mut rig = connected_rig().await;
    assert!(start(&rig, "CONTINUOUS", true).await.is_success());
    assert_eq!(rig.driver.count(&DriverCall::StartRead), 1);

    let ids = replay(&mut rig, tags(&["AA", "aa", "BB"])).await;
    assert_eq!(ids, vec!["AA", "BB"]);
}

#[tokio::test]
async fn test_non_unique_scan_keeps_every_read_in_order() {
    let mut rig = connected_rig().await;
    assert!(start(&rig, "CONTINUOUS", false).await.is_success());

    let ids = replay(&mut rig, tags(&["c1", "A0", "c1", "", "b2", "A0"])).await;
    assert_eq!(ids, vec!["C1", "A0", "C1", "B2", "A0"]);
}

#[tokio::test]
async fn test_tag_event_fields() {
    let mut rig = connected_rig().await;
    start(&rig, "SINGLE", false).await;
    assert_eq!(rig.driver.count(&DriverCall::ScanRfid), 1);

    rig.driver
        .emit(vec![MockReport::Tag(RawTag::new("e280abcd", -63).with_mem_id("e2003412"))])
        .join()
        .unwrap();
    let read = next(&mut rig.tags).await;
    assert_eq!(
        read,
        TagRead {
            identifier: "E280ABCD".to_string(),
            signal_strength: -63,
            memory_id: Some("E2003412".to_string()),
        }
    );
}

#[tokio::test]
async fn test_invalid_mode_touches_no_driver() {
    let rig = connected_rig().await;
    let before = rig.driver.calls().len();

    for mode in ["BURST", "single", ""] {
        let outcome = start(&rig, mode, false).await;
        assert_eq!(
            outcome,
            CommandOutcome::failure("INVALID_MODE", "Mode must be SINGLE or CONTINUOUS")
        );
    }
    assert_eq!(rig.driver.calls().len(), before);
    assert_eq!(rig.plugin.manager().snapshot().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_default_mode_is_continuous() {
    let rig = connected_rig().await;
    assert!(rig.plugin.handle(MethodCall::bare("startScan")).await.is_success());
    assert_eq!(
        rig.plugin.manager().snapshot().scan,
        ScanState::Scanning(ScanMode::Continuous)
    );
}

#[tokio::test]
async fn test_second_start_while_scanning_is_rejected() {
    let rig = connected_rig().await;
    start(&rig, "CONTINUOUS", false).await;
    assert_eq!(start(&rig, "SINGLE", false).await.code(), Some("INVALID_STATE"));
    assert_eq!(rig.driver.count(&DriverCall::ScanRfid), 0);
}

#[tokio::test]
async fn test_driver_refusing_start_leaves_scan_idle() {
    let rig = connected_rig().await;
    rig.driver.set_start_code(17);

    let outcome = start(&rig, "CONTINUOUS", false).await;
    assert_eq!(
        outcome,
        CommandOutcome::failure("SCAN_FAILED", "StartRead returned error: 17")
    );
    assert_eq!(rig.plugin.manager().snapshot().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_failed_stop_does_not_block_restart() {
    let rig = connected_rig().await;
    rig.driver.set_stop_fires_callback(false);
    start(&rig, "CONTINUOUS", false).await;

    rig.driver.set_stop_code(3);
    let stopped = rig.plugin.handle(MethodCall::bare("stopScan")).await;
    assert_eq!(
        stopped,
        CommandOutcome::failure("SCAN_STOP_ERR", "StopRead returned error: 3")
    );
    assert_eq!(rig.plugin.manager().snapshot().scan, ScanState::Idle);

    assert!(start(&rig, "CONTINUOUS", false).await.is_success());
    assert_eq!(rig.driver.count(&DriverCall::StartRead), 2);
}

#[tokio::test]
async fn test_stop_emits_scan_stopped_and_keeps_seen_tags() {
    let mut rig = connected_rig().await;
    start(&rig, "CONTINUOUS", true).await;
    rig.driver.emit_tags(&["AA", "BB"]).join().unwrap();
    next(&mut rig.tags).await;
    next(&mut rig.tags).await;

    assert!(rig.plugin.handle(MethodCall::bare("stopScan")).await.is_success());
    assert_eq!(next(&mut rig.status).await, StatusKind::ScanStopped);
    assert_eq!(rig.plugin.manager().snapshot().seen_tags, 2);

    let again = rig.plugin.handle(MethodCall::bare("stopScan")).await;
    assert_eq!(again.code(), Some("INVALID_STATE"));
}

#[tokio::test]
async fn test_clear_seen_tags_readmits() {
    let mut rig = connected_rig().await;
    start(&rig, "CONTINUOUS", true).await;
    rig.driver.emit_tags(&["AA"]).join().unwrap();
    assert_eq!(next(&mut rig.tags).await.identifier, "AA");

    let cleared = rig.plugin.handle(MethodCall::bare("clearSeenTags")).await;
    assert_eq!(cleared, CommandOutcome::success(true));

    let ids = replay(&mut rig, tags(&["aa", "AA"])).await;
    assert_eq!(ids, vec!["AA"]);
}

#[tokio::test]
async fn test_new_scan_resets_filter() {
    let mut rig = connected_rig().await;
    rig.driver.set_stop_fires_callback(false);
    start(&rig, "CONTINUOUS", true).await;
    assert_eq!(replay(&mut rig, tags(&["AA"])).await, vec!["AA"]);
    assert!(rig.plugin.handle(MethodCall::bare("stopScan")).await.is_success());

    start(&rig, "CONTINUOUS", true).await;
    assert_eq!(replay(&mut rig, tags(&["AA"])).await, vec!["AA"]);
}

#[tokio::test]
async fn test_stop_callback_leaves_scan_running() {
    let mut rig = connected_rig().await;
    start(&rig, "SINGLE", false).await;
    rig.driver.emit(vec![MockReport::Stopped]).join().unwrap();
    assert_eq!(next(&mut rig.status).await, StatusKind::ScanStopped);

    assert_eq!(
        rig.plugin.manager().snapshot().scan,
        ScanState::Scanning(ScanMode::Single)
    );
    assert_eq!(start(&rig, "SINGLE", false).await.code(), Some("INVALID_STATE"));
    assert!(rig.plugin.handle(MethodCall::bare("stopScan")).await.is_success());
}

#[tokio::test]
async fn test_late_stop_callback_after_restart() {
    let mut rig = connected_rig().await;
    rig.driver.set_stop_fires_callback(false);
    assert!(start(&rig, "CONTINUOUS", false).await.is_success());
    assert!(rig.plugin.handle(MethodCall::bare("stopScan")).await.is_success());
    assert!(start(&rig, "CONTINUOUS", false).await.is_success());

    // Callback of the first stop arrives once the second scan is running
    rig.driver.emit(vec![MockReport::Stopped]).join().unwrap();
    assert_eq!(next(&mut rig.status).await, StatusKind::ScanStopped);
    assert_eq!(
        rig.plugin.manager().snapshot().scan,
        ScanState::Scanning(ScanMode::Continuous)
    );

    assert!(rig.plugin.handle(MethodCall::bare("stopScan")).await.is_success());
    assert_eq!(rig.driver.count(&DriverCall::StartRead), 2);
    assert_eq!(rig.driver.count(&DriverCall::StopRead), 2);
}

async fn slow_start(rig: &Rig) -> tokio::task::JoinHandle<CommandOutcome> {
    rig.driver.delay("StartRead", Duration::from_millis(200));
    let gateway = rig.plugin.gateway().clone();
    let started = tokio::spawn(async move {
        gateway
            .handle(MethodCall::new("startScan", json!({ "mode": "CONTINUOUS" })))
            .await
    });
    while rig.driver.count(&DriverCall::StartRead) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    started
}

#[tokio::test]
async fn test_scan_counts_as_running_only_once_driver_accepts() {
    let rig = connected_rig().await;
    let started = slow_start(&rig).await;

    assert_eq!(
        rig.plugin.manager().snapshot().scan,
        ScanState::Starting(ScanMode::Continuous)
    );
    let stopped = rig.plugin.handle(MethodCall::bare("stopScan")).await;
    assert_eq!(stopped.code(), Some("INVALID_STATE"));
    assert_eq!(rig.driver.count(&DriverCall::StopRead), 0);

    assert!(started.await.unwrap().is_success());
    assert_eq!(
        rig.plugin.manager().snapshot().scan,
        ScanState::Scanning(ScanMode::Continuous)
    );
}

#[tokio::test]
async fn test_session_reset_during_start_stops_driver_scan() {
    let rig = connected_rig().await;
    let started = slow_start(&rig).await;

    rig.plugin.detach();
    assert_eq!(started.await.unwrap().code(), Some("INVALID_STATE"));
    assert_eq!(rig.driver.count(&DriverCall::StopRead), 1);
    assert_eq!(rig.plugin.manager().snapshot().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_malformed_report_goes_to_error_channel() {
    let mut rig = connected_rig().await;
    start(&rig, "CONTINUOUS", false).await;

    let mut reports = vec![MockReport::Malformed];
    reports.extend(tags(&["DD"]));
    let ids = replay(&mut rig, reports).await;
    assert_eq!(ids, vec!["DD"]);

    let error = next(&mut rig.errors).await;
    assert!(error.starts_with("Tag processing error:"), "got {:?}", error);
}

#[tokio::test]
async fn test_set_power() {
    let rig = connected_rig().await;
    assert!(rig.plugin.handle(MethodCall::bare("setPower")).await.is_success());
    assert_eq!(rig.driver.count(&DriverCall::SetRfPower(20)), 1);

    rig.driver.set_power_code(4);
    let outcome = rig
        .plugin
        .handle(MethodCall::new("setPower", json!({ "powerLevel": 30 })))
        .await;
    assert_eq!(outcome, CommandOutcome::failure("SET_POWER_FAILED", "Error: 4"));
}

#[tokio::test]
async fn test_read_null_response_is_read_failed() {
    let rig = connected_rig().await;
    rig.driver.set_read_response(None);

    let outcome = rig
        .plugin
        .handle(MethodCall::new("readTagData", json!({ "tagId": "" })))
        .await;
    assert_eq!(outcome, CommandOutcome::failure("READ_FAILED", "Read returned null"));
    assert_eq!(
        rig.driver.count(&DriverCall::ReadData {
            epc: String::new(),
            bank: MemoryBank::Reserved,
            word_ptr: 0,
            length: 0,
            password: "00000000".to_string(),
        }),
        1,
        "read must still reach the driver"
    );
}

#[tokio::test]
async fn test_read_returns_data() {
    let rig = connected_rig().await;
    rig.driver.set_read_response(Some("3000E2801160"));

    let outcome = rig
        .plugin
        .handle(MethodCall::new(
            "readTagData",
            json!({ "tagId": "E280", "memoryBank": 1, "wordPtr": 2, "length": 6, "password": null }),
        ))
        .await;
    assert_eq!(outcome, CommandOutcome::success("3000E2801160"));
}

#[tokio::test]
async fn test_read_argument_validation() {
    let rig = connected_rig().await;
    let before = rig.driver.calls().len();

    for args in [
        json!({ "memoryBank": 7 }),
        json!({ "wordPtr": -2 }),
        json!({ "password": "xyz" }),
    ] {
        let outcome = rig.plugin.handle(MethodCall::new("readTagData", args)).await;
        assert_eq!(outcome.code(), Some("INVALID_ARGUMENT"));
    }
    assert_eq!(rig.driver.calls().len(), before);
}

#[tokio::test]
async fn test_write_tag_data() {
    let rig = connected_rig().await;
    let args = json!({ "tagId": "E280", "memoryBank": 3, "dataHex": "BEEF", "password": "0A0B0C0D" });

    assert!(rig
        .plugin
        .handle(MethodCall::new("writeTagData", args.clone()))
        .await
        .is_success());
    assert_eq!(
        rig.driver.count(&DriverCall::WriteData {
            data_hex: "BEEF".to_string(),
            epc: "E280".to_string(),
            bank: MemoryBank::User,
            word_ptr: 0,
            password: "0A0B0C0D".to_string(),
        }),
        1
    );

    rig.driver.set_write_code(9);
    let outcome = rig.plugin.handle(MethodCall::new("writeTagData", args)).await;
    assert_eq!(outcome, CommandOutcome::failure("WRITE_FAILED", "Error: 9"));
}

#[tokio::test]
async fn test_write_epc() {
    let rig = connected_rig().await;
    let args = json!({ "newEpc": "E2801160600002" });
    assert!(rig
        .plugin
        .handle(MethodCall::new("writeEPC", args.clone()))
        .await
        .is_success());

    rig.driver.fail_with_fault("WriteEPC_G2", "tag moved away");
    let outcome = rig.plugin.handle(MethodCall::new("writeEPC", args)).await;
    assert_eq!(outcome.code(), Some("WRITE_EPC_EXCEPTION"));

    let missing = rig.plugin.handle(MethodCall::new("writeEPC", Value::Null)).await;
    assert_eq!(missing.code(), Some("INVALID_ARGUMENT"));
}

#[tokio::test]
async fn test_memory_commands_require_connection() {
    let rig = connected_rig().await;
    rig.plugin.handle(MethodCall::bare("disconnect")).await;

    let read = rig.plugin.handle(MethodCall::bare("readTagData")).await;
    assert_eq!(read.code(), Some("INVALID_STATE"));
    let power = rig.plugin.handle(MethodCall::bare("setPower")).await;
    assert_eq!(power.code(), Some("INVALID_STATE"));
}

#[tokio::test]
async fn test_slow_read_holds_off_power_and_disconnect() {
    let rig = connected_rig().await;
    rig.driver.set_read_response(Some("E280"));
    rig.driver.delay("ReadData_G2", Duration::from_millis(200));

    let gateway = rig.plugin.gateway().clone();
    let read = tokio::spawn(async move {
        gateway
            .handle(MethodCall::new("readTagData", json!({ "tagId": "E280" })))
            .await
    });
    while !rig.driver.calls().iter().any(|c| matches!(c, DriverCall::ReadData { .. })) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let gateway = rig.plugin.gateway().clone();
    let power = tokio::spawn(async move {
        gateway
            .handle(MethodCall::new("setPower", json!({ "powerLevel": 25 })))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let disconnected = rig.plugin.handle(MethodCall::bare("disconnect")).await;

    assert_eq!(read.await.unwrap(), CommandOutcome::success("E280"));
    assert!(power.await.unwrap().is_success());
    assert!(disconnected.is_success());
    assert_eq!(rig.driver.max_in_flight(), 1, "driver calls overlapped");

    let calls = rig.driver.calls();
    let read_at = calls.iter().position(|c| matches!(c, DriverCall::ReadData { .. }));
    let power_at = calls.iter().position(|c| *c == DriverCall::SetRfPower(25));
    let disconnect_at = calls.iter().position(|c| *c == DriverCall::Disconnect);
    assert!(read_at < power_at, "{:?}", calls);
    assert!(power_at < disconnect_at, "{:?}", calls);
}
