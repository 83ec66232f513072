use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceError;
use crate::driver::MemoryBank;

/// Power/connection lifecycle of the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    PoweredOff,
    PoweredOn,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::PoweredOff => "powered off",
            ConnectionState::PoweredOn => "powered on",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMode {
    Single,
    Continuous,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Single => "SINGLE",
            ScanMode::Continuous => "CONTINUOUS",
        }
    }
}

impl FromStr for ScanMode {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE" => Ok(ScanMode::Single),
            "CONTINUOUS" => Ok(ScanMode::Continuous),
            other => Err(DeviceError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Idle,
    /// Start requested, driver has not answered yet
    Starting(ScanMode),
    Scanning(ScanMode),
}

impl ScanState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanState::Scanning(_))
    }

    /// Starting or scanning
    pub fn is_active(&self) -> bool {
        !matches!(self, ScanState::Idle)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => f.write_str("idle"),
            ScanState::Starting(mode) => write!(f, "starting ({})", mode.as_str()),
            ScanState::Scanning(mode) => write!(f, "scanning ({})", mode.as_str()),
        }
    }
}

/// Point-in-time view of the session, returned by `getStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub scan: ScanState,
    pub unique_only: bool,
    pub seen_tags: usize,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_tag_at: Option<DateTime<Utc>>,
}

/// 4-byte Gen2 access password, carried as 8 hex digits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPassword(String);

impl AccessPassword {
    pub const DEFAULT: &'static str = "00000000";

    pub fn parse(raw: &str) -> Result<Self, DeviceError> {
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(raw, &mut bytes).map_err(|_| {
            DeviceError::Validation(format!(
                "password must be 8 hex digits, got {:?}",
                raw
            ))
        })?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccessPassword {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

/// Validates a non-empty hex payload such as tag data or a new EPC
pub fn parse_hex_payload(field: &str, raw: &str) -> Result<String, DeviceError> {
    if raw.is_empty() {
        return Err(DeviceError::Validation(format!("{} must not be empty", field)));
    }
    hex::decode(raw)
        .map_err(|e| DeviceError::Validation(format!("{} is not valid hex: {}", field, e)))?;
    Ok(raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub tag_id: String,
    pub bank: MemoryBank,
    pub word_ptr: u32,
    pub length: u8,
    pub password: AccessPassword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub tag_id: String,
    pub bank: MemoryBank,
    pub word_ptr: u32,
    pub data_hex: String,
    pub password: AccessPassword,
}
