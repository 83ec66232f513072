//! Power sequencing and connect negotiation.
//!
//! All connection-state transitions of the session go through here.

use std::sync::Arc;

use serde::Serialize;

use super::lane::DriverLane;
use super::session::{lock_session, SharedSession};
use super::{DeviceError, Result};
use crate::config::ScannerConfig;
use crate::driver::{DriverError, DriverFacade, PowerRail, PowerState, TagListener};
use crate::events::{EventPublisher, StatusKind};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Could not connect (Result: {code})")]
    Unreachable { code: i32 },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Connect timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("Connect aborted: {0}")]
    Aborted(String),
}

/// Outcome of a successful negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub baud: u32,
    pub used_fallback: bool,
}

pub struct ConnectionNegotiator {
    config: Arc<ScannerConfig>,
    session: SharedSession,
    facade: DriverFacade,
    power: Arc<dyn PowerRail>,
    lane: DriverLane,
    events: EventPublisher,
    listener: Arc<dyn TagListener>,
}

impl ConnectionNegotiator {
    pub fn new(
        config: Arc<ScannerConfig>,
        session: SharedSession,
        facade: DriverFacade,
        power: Arc<dyn PowerRail>,
        lane: DriverLane,
        events: EventPublisher,
        listener: Arc<dyn TagListener>,
    ) -> Self {
        Self { config, session, facade, power, lane, events, listener }
    }

    /// Switch the reader on and wait for it to settle
    pub async fn power_up(&self) -> Result<()> {
        log::debug!("Initializing RFID reader power");
        self.power.set(PowerState::Up).await?;
        tokio::time::sleep(self.config.settle_delay()).await;
        lock_session(&self.session).power_up();
        self.events.status(StatusKind::PowerOn);
        Ok(())
    }

    pub async fn connect(&self) -> Result<Connected> {
        lock_session(&self.session).begin_connect()?;
        log::info!("Connecting to {}...", self.config.port);

        let outcome = self.negotiate().await;
        lock_session(&self.session).finish_connect(outcome.is_ok());

        match outcome {
            Ok(connected) => {
                log::info!("Reader connected on {} at {} baud", self.config.port, connected.baud);
                self.events.status(StatusKind::Connected);
                Ok(connected)
            }
            Err(e) => {
                log::error!("Connect to {} failed: {}", self.config.port, e);
                if matches!(e, ConnectionError::Unreachable { .. }) {
                    self.events.status(StatusKind::Disconnected);
                }
                Err(e.into())
            }
        }
    }

    async fn negotiate(&self) -> std::result::Result<Connected, ConnectionError> {
        // A dead rail shows up as an unreachable reader below
        if let Err(e) = self.power.set(PowerState::Up).await {
            log::warn!("Power-up before connect failed: {}", e);
        }
        tokio::time::sleep(self.config.settle_delay()).await;

        let permit = self
            .lane
            .acquire()
            .await
            .map_err(|e| ConnectionError::Aborted(e.to_string()))?;

        let facade = self.facade.clone();
        let config = self.config.clone();
        let listener = self.listener.clone();
        let handshake = self.lane.run(permit, move || handshake(&facade, &config, listener));

        let joined = match self.config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
                ConnectionError::TimedOut { after_ms: limit.as_millis() as u64 }
            })?,
            None => handshake.await,
        };
        joined.map_err(|e| ConnectionError::Aborted(e.to_string()))?
    }

    /// Idempotent; safe to call in any state but `Connecting`.
    /// Waits for in-flight driver work before tearing the link down.
    pub async fn disconnect(&self) -> Result<()> {
        lock_session(&self.session).begin_disconnect()?;
        let permit = self
            .lane
            .acquire()
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))?;
        let teardown = lock_session(&self.session).begin_disconnect()?;

        let facade = self.facade.clone();
        self.lane
            .run(permit, move || {
                if teardown.was_scanning {
                    if let Err(e) = facade.stop_scan() {
                        log::warn!("Stopping scan during disconnect failed: {}", e);
                    }
                }
                if teardown.was_connected {
                    if let Err(e) = facade.disconnect() {
                        log::warn!("Driver disconnect failed: {}", e);
                    }
                }
            })
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))?;

        let powered_down = self.power.set(PowerState::Down).await;
        lock_session(&self.session).finish_disconnect();
        self.events.status(StatusKind::Disconnected);
        log::info!("Reader disconnected");

        powered_down.map_err(DeviceError::from)
    }

    pub fn reset(&self) {
        lock_session(&self.session).reset();
    }
}

/// Blocking part of the negotiation: baud probing, parameters, callback.
fn handshake(
    facade: &DriverFacade,
    config: &ScannerConfig,
    listener: Arc<dyn TagListener>,
) -> std::result::Result<Connected, ConnectionError> {
    let [primary, fallback] = config.baud_rates();

    let (baud, used_fallback) = match facade.connect(&config.port, primary, config.driver_log_level) {
        Ok(()) => (primary, false),
        Err(DriverError::Code { code, .. }) => {
            log::debug!("{} failed (Result: {}), trying {}...", primary, code, fallback);
            match facade.connect(&config.port, fallback, config.driver_log_level) {
                Ok(()) => (fallback, true),
                Err(DriverError::Code { code, .. }) => {
                    return Err(ConnectionError::Unreachable { code })
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    configure_inventory(facade, config.inventory_session);
    facade.register_listener(listener)?;

    Ok(Connected { baud, used_fallback })
}

/// Best effort: a reader that keeps its stored parameters is still usable
fn configure_inventory(facade: &DriverFacade, session: u8) {
    let applied = facade.inventory_params().and_then(|mut params| {
        params.session = session;
        facade.set_inventory_params(&params)
    });
    if let Err(e) = applied {
        log::warn!("Failed to set default params: {}", e);
    }
}
