//! In-process stand-ins for the vendor driver and the power rail.
//!
//! Used by the test suites and by hosts that want to exercise the bridge
//! without a reader attached. Callbacks are fired from freshly spawned
//! threads, the same way the vendor library delivers them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;

use super::power::{PowerError, PowerRail, PowerState};
use super::{
    DriverResult, InventoryParams, MemoryBank, ReaderDriver, RawTag, TagListener, TagRecord,
    DRIVER_OK,
};

/// One recorded invocation of the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Connect { port: String, baud: u32 },
    Disconnect,
    SetCallBack,
    GetInventoryParameter,
    SetInventoryParameter(InventoryParams),
    SetRfPower(i32),
    StartRead,
    ScanRfid,
    StopRead,
    ReadData { epc: String, bank: MemoryBank, word_ptr: u32, length: u8, password: String },
    WriteData { data_hex: String, epc: String, bank: MemoryBank, word_ptr: u32, password: String },
    WriteEpc { new_epc: String, password: String },
}

/// Tag report whose payload cannot be decoded
#[derive(Debug, Clone, Default)]
pub struct MalformedTag;

impl TagRecord for MalformedTag {
    fn epc_id(&self) -> DriverResult<Option<String>> {
        Err(anyhow::anyhow!("truncated EPC frame"))
    }

    fn rssi(&self) -> DriverResult<i32> {
        Err(anyhow::anyhow!("truncated EPC frame"))
    }

    fn mem_id(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }
}

/// Anything the mock can replay through the registered listener
pub enum MockReport {
    Tag(RawTag),
    Malformed,
    Stopped,
}

struct MockState {
    calls: Vec<DriverCall>,
    connect_codes: VecDeque<i32>,
    power_code: i32,
    start_code: i32,
    single_code: i32,
    stop_code: i32,
    write_code: i32,
    write_epc_code: i32,
    set_params_code: i32,
    read_response: Option<String>,
    params: InventoryParams,
    faults: HashMap<&'static str, String>,
    panics: HashSet<&'static str>,
    delays: HashMap<&'static str, Duration>,
    listener: Option<Arc<dyn TagListener>>,
    stop_fires_callback: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            connect_codes: VecDeque::new(),
            power_code: DRIVER_OK,
            start_code: DRIVER_OK,
            single_code: DRIVER_OK,
            stop_code: DRIVER_OK,
            write_code: DRIVER_OK,
            write_epc_code: DRIVER_OK,
            set_params_code: DRIVER_OK,
            read_response: Some(String::new()),
            params: InventoryParams::default(),
            faults: HashMap::new(),
            panics: HashSet::new(),
            delays: HashMap::new(),
            listener: None,
            stop_fires_callback: true,
        }
    }
}

/// Scriptable [`ReaderDriver`] that records every call.
pub struct MockDriver {
    state: Mutex<MockState>,
    connect_held: Mutex<bool>,
    connect_gate: Condvar,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Marks one driver call as running until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            connect_held: Mutex::new(false),
            connect_gate: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return codes for successive connect attempts; once drained, connect succeeds
    pub fn script_connect(&self, codes: impl IntoIterator<Item = i32>) {
        self.state().connect_codes = codes.into_iter().collect();
    }

    pub fn set_power_code(&self, code: i32) {
        self.state().power_code = code;
    }

    pub fn set_start_code(&self, code: i32) {
        self.state().start_code = code;
    }

    pub fn set_single_code(&self, code: i32) {
        self.state().single_code = code;
    }

    pub fn set_stop_code(&self, code: i32) {
        self.state().stop_code = code;
    }

    pub fn set_write_code(&self, code: i32) {
        self.state().write_code = code;
    }

    pub fn set_write_epc_code(&self, code: i32) {
        self.state().write_epc_code = code;
    }

    pub fn set_params_code(&self, code: i32) {
        self.state().set_params_code = code;
    }

    pub fn set_read_response(&self, response: Option<&str>) {
        self.state().read_response = response.map(str::to_string);
    }

    /// Whether `stop_read` triggers the stop callback (it does by default)
    pub fn set_stop_fires_callback(&self, enabled: bool) {
        self.state().stop_fires_callback = enabled;
    }

    /// Make the named operation return an `anyhow` fault
    pub fn fail_with_fault(&self, operation: &'static str, message: &str) {
        self.state().faults.insert(operation, message.to_string());
    }

    /// Make the named operation panic
    pub fn panic_on(&self, operation: &'static str) {
        self.state().panics.insert(operation);
    }

    /// Make the named operation take `delay` before answering
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.state().delays.insert(operation, delay);
    }

    /// Highest number of driver calls seen running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Block connect calls until [`MockDriver::release_connect`]
    pub fn hold_connect(&self) {
        *self.connect_held.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn release_connect(&self) {
        *self.connect_held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.connect_gate.notify_all();
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    pub fn connect_calls(&self) -> Vec<u32> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Connect { baud, .. } => Some(*baud),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &DriverCall) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    pub fn current_params(&self) -> InventoryParams {
        self.state().params.clone()
    }

    pub fn has_listener(&self) -> bool {
        self.state().listener.is_some()
    }

    /// Replay reports through the registered listener on a background thread,
    /// in order. Reports are dropped if no listener is registered.
    pub fn emit(&self, reports: Vec<MockReport>) -> JoinHandle<()> {
        let listener = self.state().listener.clone();
        thread::spawn(move || {
            let Some(listener) = listener else { return };
            for report in reports {
                match report {
                    MockReport::Tag(tag) => listener.on_tag(&tag),
                    MockReport::Malformed => listener.on_tag(&MalformedTag),
                    MockReport::Stopped => listener.on_scan_stopped(),
                }
            }
        })
    }

    /// Convenience for `emit` with plain identifiers
    pub fn emit_tags(&self, epcs: &[&str]) -> JoinHandle<()> {
        let reports = epcs
            .iter()
            .map(|epc| MockReport::Tag(RawTag::new(*epc, -55)))
            .collect();
        self.emit(reports)
    }

    fn enter(&self, operation: &'static str, call: DriverCall) -> DriverResult<InFlight<'_>> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let (fault, panics, delay) = {
            let mut state = self.state();
            state.calls.push(call);
            (
                state.faults.get(operation).cloned(),
                state.panics.contains(operation),
                state.delays.get(operation).copied(),
            )
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if panics {
            panic!("{} exploded in mock driver", operation);
        }
        match fault {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(guard),
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderDriver for MockDriver {
    fn connect(&self, port: &str, baud: u32, _log_level: u8) -> DriverResult<i32> {
        let _call = self.enter("Connect", DriverCall::Connect { port: port.to_string(), baud })?;
        let mut held = self.connect_held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self.connect_gate.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        drop(held);
        Ok(self.state().connect_codes.pop_front().unwrap_or(DRIVER_OK))
    }

    fn disconnect(&self) -> DriverResult<i32> {
        let _call = self.enter("Disconnect", DriverCall::Disconnect)?;
        Ok(DRIVER_OK)
    }

    fn set_callback(&self, listener: Arc<dyn TagListener>) -> DriverResult<()> {
        let _call = self.enter("SetCallBack", DriverCall::SetCallBack)?;
        self.state().listener = Some(listener);
        Ok(())
    }

    fn inventory_params(&self) -> DriverResult<InventoryParams> {
        let _call = self.enter("GetInventoryParameter", DriverCall::GetInventoryParameter)?;
        Ok(self.state().params.clone())
    }

    fn set_inventory_params(&self, params: &InventoryParams) -> DriverResult<i32> {
        let _call = self.enter("SetInventoryParameter", DriverCall::SetInventoryParameter(params.clone()))?;
        let mut state = self.state();
        if state.set_params_code == DRIVER_OK {
            state.params = params.clone();
        }
        Ok(state.set_params_code)
    }

    fn set_rf_power(&self, level: i32) -> DriverResult<i32> {
        let _call = self.enter("SetRfPower", DriverCall::SetRfPower(level))?;
        Ok(self.state().power_code)
    }

    fn start_read(&self) -> DriverResult<i32> {
        let _call = self.enter("StartRead", DriverCall::StartRead)?;
        Ok(self.state().start_code)
    }

    fn scan_once(&self) -> DriverResult<i32> {
        let _call = self.enter("ScanRfid", DriverCall::ScanRfid)?;
        Ok(self.state().single_code)
    }

    fn stop_read(&self) -> DriverResult<i32> {
        let _call = self.enter("StopRead", DriverCall::StopRead)?;
        let (code, fire) = {
            let state = self.state();
            (state.stop_code, state.stop_fires_callback)
        };
        if fire {
            self.emit(vec![MockReport::Stopped]);
        }
        Ok(code)
    }

    fn read_data(
        &self,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        length: u8,
        password: &str,
    ) -> DriverResult<Option<String>> {
        let _call = self.enter(
            "ReadData_G2",
            DriverCall::ReadData {
                epc: epc.to_string(),
                bank,
                word_ptr,
                length,
                password: password.to_string(),
            },
        )?;
        Ok(self.state().read_response.clone())
    }

    fn write_data(
        &self,
        data_hex: &str,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        password: &str,
    ) -> DriverResult<i32> {
        let _call = self.enter(
            "WriteData_G2",
            DriverCall::WriteData {
                data_hex: data_hex.to_string(),
                epc: epc.to_string(),
                bank,
                word_ptr,
                password: password.to_string(),
            },
        )?;
        Ok(self.state().write_code)
    }

    fn write_epc(&self, new_epc: &str, password: &str) -> DriverResult<i32> {
        let _call = self.enter(
            "WriteEPC_G2",
            DriverCall::WriteEpc { new_epc: new_epc.to_string(), password: password.to_string() },
        )?;
        Ok(self.state().write_epc_code)
    }
}

/// Power rail that records every transition
#[derive(Default)]
pub struct MockPowerRail {
    transitions: Mutex<Vec<PowerState>>,
    failing: Mutex<bool>,
}

impl MockPowerRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    pub fn transitions(&self) -> Vec<PowerState> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last(&self) -> Option<PowerState> {
        self.transitions().last().copied()
    }
}

#[async_trait]
impl PowerRail for MockPowerRail {
    async fn set(&self, state: PowerState) -> Result<(), PowerError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(PowerError::Unavailable("mock rail disabled".to_string()));
        }
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner).push(state);
        Ok(())
    }
}
