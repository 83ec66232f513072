use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::device::{
    parse_hex_payload, AccessPassword, ConnectionError, DeviceError, DeviceManager, ReadRequest,
    ScanMode, WriteRequest,
};
use crate::driver::{DriverError, MemoryBank};

/// A named command with loosely typed arguments, as sent by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self { method: method.into(), arguments }
    }

    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }
}

/// Exactly one of these answers every command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CommandOutcome {
    Success { value: Value },
    Failure { code: String, message: String },
}

impl CommandOutcome {
    pub fn success(value: impl Into<Value>) -> Self {
        CommandOutcome::Success { value: value.into() }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        CommandOutcome::Failure { code: code.to_string(), message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success { .. })
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            CommandOutcome::Failure { code, .. } => Some(code),
            CommandOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartScanArgs {
    pub mode: String,
    pub unique_only: bool,
}

impl Default for StartScanArgs {
    fn default() -> Self {
        Self { mode: ScanMode::Continuous.as_str().to_string(), unique_only: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetPowerArgs {
    pub power_level: i32,
}

impl Default for SetPowerArgs {
    fn default() -> Self {
        Self { power_level: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadTagArgs {
    pub tag_id: String,
    pub memory_bank: i64,
    pub word_ptr: i64,
    pub length: i64,
    pub password: String,
}

impl Default for ReadTagArgs {
    fn default() -> Self {
        Self {
            tag_id: String::new(),
            memory_bank: 0,
            word_ptr: 0,
            length: 0,
            password: AccessPassword::DEFAULT.to_string(),
        }
    }
}

impl ReadTagArgs {
    pub fn validate(self) -> crate::device::Result<ReadRequest> {
        Ok(ReadRequest {
            tag_id: self.tag_id,
            bank: memory_bank(self.memory_bank)?,
            word_ptr: in_range("wordPtr", self.word_ptr)?,
            length: in_range("length", self.length)?,
            password: AccessPassword::parse(&self.password)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteTagArgs {
    pub tag_id: String,
    pub memory_bank: i64,
    pub word_ptr: i64,
    pub data_hex: String,
    pub password: String,
}

impl Default for WriteTagArgs {
    fn default() -> Self {
        Self {
            tag_id: String::new(),
            memory_bank: 0,
            word_ptr: 0,
            data_hex: String::new(),
            password: AccessPassword::DEFAULT.to_string(),
        }
    }
}

impl WriteTagArgs {
    pub fn validate(self) -> crate::device::Result<WriteRequest> {
        Ok(WriteRequest {
            tag_id: self.tag_id,
            bank: memory_bank(self.memory_bank)?,
            word_ptr: in_range("wordPtr", self.word_ptr)?,
            data_hex: parse_hex_payload("dataHex", &self.data_hex)?,
            password: AccessPassword::parse(&self.password)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteEpcArgs {
    pub new_epc: String,
    pub password: String,
}

impl Default for WriteEpcArgs {
    fn default() -> Self {
        Self { new_epc: String::new(), password: AccessPassword::DEFAULT.to_string() }
    }
}

fn memory_bank(index: i64) -> crate::device::Result<MemoryBank> {
    MemoryBank::from_index(index).ok_or_else(|| {
        DeviceError::Validation(format!("memoryBank must be 0..=3, got {}", index))
    })
}

fn in_range<T: TryFrom<i64>>(field: &str, value: i64) -> crate::device::Result<T> {
    T::try_from(value)
        .map_err(|_| DeviceError::Validation(format!("{} out of range: {}", field, value)))
}

/// Decodes command arguments. A `null` argument counts as absent and takes its default.
fn parse_args<T>(arguments: Value) -> crate::device::Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let arguments = match arguments {
        Value::Null => return Ok(T::default()),
        Value::Object(map) => {
            Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect())
        }
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| DeviceError::Validation(format!("Invalid arguments: {}", e)))
}

/// Outcome codes for one command
struct ErrorCodes {
    failed: &'static str,
    exception: &'static str,
    /// Report driver codes as "Error: <code>" rather than naming the call
    bare_code: bool,
}

const INIT: ErrorCodes =
    ErrorCodes { failed: "INIT_EXCEPTION", exception: "INIT_EXCEPTION", bare_code: false };
const CONNECT: ErrorCodes =
    ErrorCodes { failed: "CONN_FAILED", exception: "CONN_EXCEPTION", bare_code: false };
const DISCONNECT: ErrorCodes =
    ErrorCodes { failed: "DISCONN_EXCEPTION", exception: "DISCONN_EXCEPTION", bare_code: false };
const START_SCAN: ErrorCodes =
    ErrorCodes { failed: "SCAN_FAILED", exception: "SCAN_START_ERR", bare_code: false };
const STOP_SCAN: ErrorCodes =
    ErrorCodes { failed: "SCAN_STOP_ERR", exception: "SCAN_STOP_ERR", bare_code: false };
const SET_POWER: ErrorCodes =
    ErrorCodes { failed: "SET_POWER_FAILED", exception: "SET_POWER_EXCEPTION", bare_code: true };
const READ: ErrorCodes =
    ErrorCodes { failed: "READ_FAILED", exception: "READ_EXCEPTION", bare_code: false };
const WRITE: ErrorCodes =
    ErrorCodes { failed: "WRITE_FAILED", exception: "WRITE_EXCEPTION", bare_code: true };
const WRITE_EPC: ErrorCodes =
    ErrorCodes { failed: "WRITE_EPC_FAILED", exception: "WRITE_EPC_EXCEPTION", bare_code: true };

impl ErrorCodes {
    fn outcome(&self, err: DeviceError) -> CommandOutcome {
        match err {
            DeviceError::Validation(message) => CommandOutcome::failure("INVALID_ARGUMENT", message),
            DeviceError::InvalidMode(_) => {
                CommandOutcome::failure("INVALID_MODE", "Mode must be SINGLE or CONTINUOUS")
            }
            err @ DeviceError::InvalidState { .. } => {
                CommandOutcome::failure("INVALID_STATE", err.to_string())
            }
            DeviceError::Driver(err) => self.driver(err),
            DeviceError::Connection(ConnectionError::Unreachable { code }) => {
                CommandOutcome::failure(
                    self.failed,
                    ConnectionError::Unreachable { code }.to_string(),
                )
            }
            DeviceError::Connection(ConnectionError::Driver(err)) => self.driver(err),
            err @ DeviceError::ReadEmpty => CommandOutcome::failure(self.failed, err.to_string()),
            err => CommandOutcome::failure(self.exception, err.to_string()),
        }
    }

    fn driver(&self, err: DriverError) -> CommandOutcome {
        match err.code() {
            Some(code) if self.bare_code => {
                CommandOutcome::failure(self.failed, format!("Error: {}", code))
            }
            Some(_) => CommandOutcome::failure(self.failed, err.to_string()),
            None => CommandOutcome::failure(self.exception, err.to_string()),
        }
    }

    fn answer<T: Into<Value>>(&self, result: crate::device::Result<T>) -> CommandOutcome {
        match result {
            Ok(value) => CommandOutcome::success(value),
            Err(e) => self.outcome(e),
        }
    }
}

/// Maps host commands onto the device manager
pub struct CommandGateway {
    manager: Arc<DeviceManager>,
}

impl CommandGateway {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        Self { manager }
    }

    /// Runs one call to completion
    pub async fn handle(&self, call: MethodCall) -> CommandOutcome {
        log::debug!("Command: {}", call.method);
        match call.method.as_str() {
            "init" => self.init().await,
            "connect" => self.connect().await,
            "disconnect" => self.disconnect().await,
            "startScan" => match parse_args(call.arguments) {
                Ok(args) => self.start_scan(args).await,
                Err(e) => START_SCAN.outcome(e),
            },
            "stopScan" => self.stop_scan(),
            "clearSeenTags" => self.clear_seen_tags(),
            "setPower" => match parse_args(call.arguments) {
                Ok(args) => self.set_power(args).await,
                Err(e) => SET_POWER.outcome(e),
            },
            "readTagData" => match parse_args(call.arguments) {
                Ok(args) => self.read_tag_data(args).await,
                Err(e) => READ.outcome(e),
            },
            "writeTagData" => match parse_args(call.arguments) {
                Ok(args) => self.write_tag_data(args).await,
                Err(e) => WRITE.outcome(e),
            },
            "writeEPC" => match parse_args(call.arguments) {
                Ok(args) => self.write_epc(args).await,
                Err(e) => WRITE_EPC.outcome(e),
            },
            "getStatus" => self.get_status(),
            other => {
                log::warn!("Unknown command: {}", other);
                CommandOutcome::failure("NOT_IMPLEMENTED", format!("{} is not implemented", other))
            }
        }
    }

    /// Runs `call` in the background and answers through `responder` exactly once
    pub fn dispatch<R>(self: &Arc<Self>, call: MethodCall, responder: R) -> JoinHandle<()>
    where
        R: FnOnce(CommandOutcome) + Send + 'static,
    {
        let gateway = self.clone();
        let method = call.method.clone();
        let command = tokio::spawn(async move { gateway.handle(call).await });
        tokio::spawn(async move {
            let outcome = match command.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Command {} did not complete: {}", method, e);
                    CommandOutcome::failure("INTERNAL_ERROR", e.to_string())
                }
            };
            responder(outcome);
        })
    }

    /// Power the reader up
    pub async fn init(&self) -> CommandOutcome {
        INIT.answer(self.manager.init().await.map(|_| true))
    }

    /// Open the serial link, falling back to the second baud rate once
    pub async fn connect(&self) -> CommandOutcome {
        CONNECT.answer(self.manager.connect().await.map(|_| true))
    }

    pub async fn disconnect(&self) -> CommandOutcome {
        DISCONNECT.answer(self.manager.disconnect().await.map(|_| true))
    }

    pub async fn start_scan(&self, args: StartScanArgs) -> CommandOutcome {
        let mode = match args.mode.parse::<ScanMode>() {
            Ok(mode) => mode,
            Err(e) => return START_SCAN.outcome(e),
        };
        START_SCAN.answer(self.manager.start_scan(mode, args.unique_only).await.map(|_| true))
    }

    pub fn stop_scan(&self) -> CommandOutcome {
        STOP_SCAN.answer(self.manager.stop_scan().map(|_| true))
    }

    pub fn clear_seen_tags(&self) -> CommandOutcome {
        self.manager.clear_seen_tags();
        CommandOutcome::success(true)
    }

    pub async fn set_power(&self, args: SetPowerArgs) -> CommandOutcome {
        SET_POWER.answer(self.manager.set_power(args.power_level).await.map(|_| true))
    }

    pub async fn read_tag_data(&self, args: ReadTagArgs) -> CommandOutcome {
        let request = match args.validate() {
            Ok(request) => request,
            Err(e) => return READ.outcome(e),
        };
        READ.answer(self.manager.read_tag_data(request).await)
    }

    pub async fn write_tag_data(&self, args: WriteTagArgs) -> CommandOutcome {
        let request = match args.validate() {
            Ok(request) => request,
            Err(e) => return WRITE.outcome(e),
        };
        WRITE.answer(self.manager.write_tag_data(request).await.map(|_| true))
    }

    pub async fn write_epc(&self, args: WriteEpcArgs) -> CommandOutcome {
        let validated = parse_hex_payload("newEpc", &args.new_epc)
            .and_then(|epc| Ok((epc, AccessPassword::parse(&args.password)?)));
        let (new_epc, password) = match validated {
            Ok(v) => v,
            Err(e) => return WRITE_EPC.outcome(e),
        };
        WRITE_EPC.answer(self.manager.write_epc(new_epc, password).await.map(|_| true))
    }

    /// Current session state, for diagnostics
    pub fn get_status(&self) -> CommandOutcome {
        match serde_json::to_value(self.manager.snapshot()) {
            Ok(value) => CommandOutcome::success(value),
            Err(e) => CommandOutcome::failure("INTERNAL_ERROR", e.to_string()),
        }
    }
}
