//! Logical state of the one reader owned by this process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::filter::{TagFilter, TagId};
use super::models::{ConnectionState, ScanMode, ScanState, SessionSnapshot};
use super::{DeviceError, Result};

pub type SharedSession = Arc<Mutex<DeviceSession>>;

/// Locks the session. Never hold the guard across an `.await` or a driver call.
pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, DeviceSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a disconnect has to tear down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Teardown {
    pub was_connected: bool,
    pub was_scanning: bool,
}

#[derive(Debug)]
pub struct DeviceSession {
    connection: ConnectionState,
    scan: ScanState,
    filter: TagFilter,
    connected_at: Option<DateTime<Utc>>,
    last_tag_at: Option<DateTime<Utc>>,
}

impl DeviceSession {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::PoweredOff,
            scan: ScanState::Idle,
            filter: TagFilter::new(false),
            connected_at: None,
            last_tag_at: None,
        }
    }

    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan
    }

    pub fn unique_only(&self) -> bool {
        self.filter.unique_only()
    }

    pub fn seen_count(&self) -> usize {
        self.filter.seen_count()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            scan: self.scan,
            unique_only: self.filter.unique_only(),
            seen_tags: self.filter.seen_count(),
            connected_at: self.connected_at,
            last_tag_at: self.last_tag_at,
        }
    }

    fn reject(&self, command: &'static str) -> DeviceError {
        DeviceError::InvalidState {
            command,
            state: match self.connection {
                ConnectionState::Connected => format!("connected and {}", self.scan),
                other => other.to_string(),
            },
        }
    }

    // Connection transitions, driven by the negotiator only.

    /// Re-entrant: leaves an active or pending connection untouched
    pub(crate) fn power_up(&mut self) {
        match self.connection {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            _ => self.connection = ConnectionState::PoweredOn,
        }
    }

    pub(crate) fn begin_connect(&mut self) -> Result<()> {
        match self.connection {
            ConnectionState::PoweredOn | ConnectionState::Disconnected => {
                self.connection = ConnectionState::Connecting;
                Ok(())
            }
            _ => Err(self.reject("connect")),
        }
    }

    pub(crate) fn finish_connect(&mut self, connected: bool) {
        self.scan = ScanState::Idle;
        if connected {
            self.connection = ConnectionState::Connected;
            self.connected_at = Some(Utc::now());
        } else {
            self.connection = ConnectionState::Disconnected;
            self.connected_at = None;
        }
    }

    pub(crate) fn begin_disconnect(&self) -> Result<Teardown> {
        if self.connection == ConnectionState::Connecting {
            return Err(self.reject("disconnect"));
        }
        Ok(Teardown {
            was_connected: self.connection == ConnectionState::Connected,
            was_scanning: self.scan.is_active(),
        })
    }

    pub(crate) fn finish_disconnect(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.scan = ScanState::Idle;
        self.connected_at = None;
    }

    /// Back to the attach-time state
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    // Scan transitions.

    pub(crate) fn require_connected(&self, command: &'static str) -> Result<()> {
        if self.connection == ConnectionState::Connected {
            Ok(())
        } else {
            Err(self.reject(command))
        }
    }

    /// Claims the scanner for `mode` and starts a fresh dedup session.
    /// The scan only counts as running once [`DeviceSession::confirm_scan`]
    /// accepts the driver's answer; [`DeviceSession::abort_scan`] rolls it back.
    pub(crate) fn begin_scan(&mut self, mode: ScanMode, unique_only: bool) -> Result<()> {
        if self.connection != ConnectionState::Connected || self.scan.is_active() {
            return Err(self.reject("startScan"));
        }
        self.filter.reset(unique_only);
        self.scan = ScanState::Starting(mode);
        Ok(())
    }

    /// Fails if the session moved on (disconnect, detach) while the driver was starting
    pub(crate) fn confirm_scan(&mut self, mode: ScanMode) -> Result<()> {
        if self.connection == ConnectionState::Connected && self.scan == ScanState::Starting(mode) {
            self.scan = ScanState::Scanning(mode);
            Ok(())
        } else {
            Err(self.reject("startScan"))
        }
    }

    pub(crate) fn abort_scan(&mut self) {
        if let ScanState::Starting(_) = self.scan {
            self.scan = ScanState::Idle;
        }
    }

    pub(crate) fn require_scanning(&self) -> Result<()> {
        if self.scan.is_scanning() && self.connection == ConnectionState::Connected {
            Ok(())
        } else {
            Err(self.reject("stopScan"))
        }
    }

    /// Returns whether a scan was running
    pub(crate) fn scan_stopped(&mut self) -> bool {
        let was_scanning = self.scan.is_scanning();
        self.scan = ScanState::Idle;
        was_scanning
    }

    pub fn clear_seen(&mut self) {
        self.filter.clear();
    }

    pub(crate) fn admit(&mut self, id: &TagId) -> bool {
        let admitted = self.filter.admit(id);
        if admitted {
            self.last_tag_at = Some(Utc::now());
        }
        admitted
    }
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}
