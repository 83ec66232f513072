//! Capability interface over the vendor reader driver.
//!
//! The vendor library is synchronous and may block for the length of a serial
//! exchange. It reports tags (and the end of an inventory) through a single
//! registered listener, invoked from its own background thread. Everything
//! above this module talks to the driver through [`DriverFacade`], which turns
//! raw return codes, `anyhow` faults and panics into [`DriverError`].

pub mod claim;
pub mod mock;
pub mod power;

pub use claim::DriverClaim;
pub use power::{PowerError, PowerRail, PowerState, SysfsPowerRail};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Return code the vendor library uses for success.
pub const DRIVER_OK: i32 = 0;

/// Raw result of a vendor call. `Err` means the library itself faulted.
pub type DriverResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("{operation} returned error: {code}")]
    Code { operation: &'static str, code: i32 },

    #[error("{operation} failed: {message}")]
    Fault { operation: &'static str, message: String },

    #[error("{operation} panicked inside the driver")]
    Panicked { operation: &'static str },
}

impl DriverError {
    /// Numeric driver code, when the failure came from a return code
    pub fn code(&self) -> Option<i32> {
        match self {
            DriverError::Code { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the driver faulted rather than reporting a code
    pub fn is_fault(&self) -> bool {
        !matches!(self, DriverError::Code { .. })
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Tag memory banks as numbered by the Gen2 air protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryBank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

impl MemoryBank {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(MemoryBank::Reserved),
            1 => Some(MemoryBank::Epc),
            2 => Some(MemoryBank::Tid),
            3 => Some(MemoryBank::User),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Inventory parameters as held by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryParams {
    /// Anti-collision session index (S0..S3)
    pub session: u8,
    pub q_value: u8,
    pub target: u8,
    /// Inventory round duration, in units of 100ms
    pub scan_time: u8,
}

impl Default for InventoryParams {
    fn default() -> Self {
        Self { session: 0, q_value: 4, target: 0, scan_time: 10 }
    }
}

/// A tag report as handed over by the vendor callback.
///
/// Accessors are fallible: the payload is decoded lazily by the vendor
/// library and a malformed frame only shows up when a field is read.
pub trait TagRecord {
    fn epc_id(&self) -> DriverResult<Option<String>>;
    fn rssi(&self) -> DriverResult<i32>;
    fn mem_id(&self) -> DriverResult<Option<String>>;
}

/// Plain, already-decoded tag report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTag {
    pub epc_id: Option<String>,
    pub rssi: i32,
    pub mem_id: Option<String>,
}

impl RawTag {
    pub fn new(epc_id: impl Into<String>, rssi: i32) -> Self {
        Self { epc_id: Some(epc_id.into()), rssi, mem_id: None }
    }

    pub fn with_mem_id(mut self, mem_id: impl Into<String>) -> Self {
        self.mem_id = Some(mem_id.into());
        self
    }
}

impl TagRecord for RawTag {
    fn epc_id(&self) -> DriverResult<Option<String>> {
        Ok(self.epc_id.clone())
    }

    fn rssi(&self) -> DriverResult<i32> {
        Ok(self.rssi)
    }

    fn mem_id(&self) -> DriverResult<Option<String>> {
        Ok(self.mem_id.clone())
    }
}

/// Receiver of driver callbacks. Invoked from a driver-owned thread.
pub trait TagListener: Send + Sync {
    fn on_tag(&self, record: &dyn TagRecord);
    fn on_scan_stopped(&self);
}

/// Operations exported by the vendor reader library.
///
/// Calls returning `i32` follow the vendor convention: [`DRIVER_OK`] on
/// success, anything else is a device error code.
pub trait ReaderDriver: Send + Sync + 'static {
    fn connect(&self, port: &str, baud: u32, log_level: u8) -> DriverResult<i32>;
    fn disconnect(&self) -> DriverResult<i32>;
    fn set_callback(&self, listener: Arc<dyn TagListener>) -> DriverResult<()>;
    fn inventory_params(&self) -> DriverResult<InventoryParams>;
    fn set_inventory_params(&self, params: &InventoryParams) -> DriverResult<i32>;
    fn set_rf_power(&self, level: i32) -> DriverResult<i32>;
    fn start_read(&self) -> DriverResult<i32>;
    fn scan_once(&self) -> DriverResult<i32>;
    fn stop_read(&self) -> DriverResult<i32>;
    fn read_data(
        &self,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        length: u8,
        password: &str,
    ) -> DriverResult<Option<String>>;
    fn write_data(
        &self,
        data_hex: &str,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        password: &str,
    ) -> DriverResult<i32>;
    fn write_epc(&self, new_epc: &str, password: &str) -> DriverResult<i32>;
}

/// Typed boundary around a [`ReaderDriver`].
#[derive(Clone)]
pub struct DriverFacade {
    driver: Arc<dyn ReaderDriver>,
}

impl DriverFacade {
    pub fn new(driver: Arc<dyn ReaderDriver>) -> Self {
        Self { driver }
    }

    pub fn connect(&self, port: &str, baud: u32, log_level: u8) -> Result<()> {
        self.code("Connect", |d| d.connect(port, baud, log_level))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.code("Disconnect", |d| d.disconnect())
    }

    pub fn register_listener(&self, listener: Arc<dyn TagListener>) -> Result<()> {
        self.guarded("SetCallBack", move |d| d.set_callback(listener))
    }

    pub fn inventory_params(&self) -> Result<InventoryParams> {
        self.guarded("GetInventoryParameter", |d| d.inventory_params())
    }

    pub fn set_inventory_params(&self, params: &InventoryParams) -> Result<()> {
        self.code("SetInventoryParameter", |d| d.set_inventory_params(params))
    }

    pub fn set_power(&self, level: i32) -> Result<()> {
        self.code("SetRfPower", |d| d.set_rf_power(level))
    }

    pub fn start_continuous_scan(&self) -> Result<()> {
        self.code("StartRead", |d| d.start_read())
    }

    pub fn single_scan(&self) -> Result<()> {
        self.code("ScanRfid", |d| d.scan_once())
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.code("StopRead", |d| d.stop_read())
    }

    pub fn read_memory(
        &self,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        length: u8,
        password: &str,
    ) -> Result<Option<String>> {
        self.guarded("ReadData_G2", |d| d.read_data(epc, bank, word_ptr, length, password))
    }

    pub fn write_memory(
        &self,
        data_hex: &str,
        epc: &str,
        bank: MemoryBank,
        word_ptr: u32,
        password: &str,
    ) -> Result<()> {
        self.code("WriteData_G2", |d| d.write_data(data_hex, epc, bank, word_ptr, password))
    }

    pub fn write_identifier(&self, new_epc: &str, password: &str) -> Result<()> {
        self.code("WriteEPC_G2", |d| d.write_epc(new_epc, password))
    }

    fn code<F>(&self, operation: &'static str, call: F) -> Result<()>
    where
        F: FnOnce(&dyn ReaderDriver) -> DriverResult<i32>,
    {
        match self.guarded(operation, call)? {
            DRIVER_OK => Ok(()),
            code => Err(DriverError::Code { operation, code }),
        }
    }

    fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(&dyn ReaderDriver) -> DriverResult<T>,
    {
        let driver = self.driver.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| call(driver))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log::error!("{} raised a driver fault: {:#}", operation, e);
                Err(DriverError::Fault { operation, message: format!("{:#}", e) })
            }
            Err(_) => {
                log::error!("{} panicked inside the driver", operation);
                Err(DriverError::Panicked { operation })
            }
        }
    }
}
