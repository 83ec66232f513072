use std::sync::Arc;

use super::lane::DriverLane;
use super::negotiator::{ConnectionNegotiator, Connected};
use super::session::{lock_session, SharedSession};
use super::{DeviceError, ReadRequest, Result, ScanMode, SessionSnapshot, WriteRequest};
use super::models::AccessPassword;
use crate::config::ScannerConfig;
use crate::driver::{DriverFacade, PowerRail, TagListener};
use crate::events::EventPublisher;

/// Central reader management
/// Owns the session and routes every command to the driver with the right legality checks
pub struct DeviceManager {
    session: SharedSession,
    negotiator: ConnectionNegotiator,
    facade: DriverFacade,
    lane: DriverLane,
}

impl DeviceManager {
    pub fn new(
        config: Arc<ScannerConfig>,
        session: SharedSession,
        facade: DriverFacade,
        power: Arc<dyn PowerRail>,
        events: EventPublisher,
        listener: Arc<dyn TagListener>,
    ) -> Self {
        let lane = DriverLane::new();
        let negotiator = ConnectionNegotiator::new(
            config,
            session.clone(),
            facade.clone(),
            power,
            lane.clone(),
            events,
            listener,
        );
        Self { session, negotiator, facade, lane }
    }

    /// Power the reader up
    pub async fn init(&self) -> Result<()> {
        self.negotiator.power_up().await
    }

    pub async fn connect(&self) -> Result<Connected> {
        self.negotiator.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.negotiator.disconnect().await
    }

    /// Start an inventory in `mode`; `unique_only` enables the dedup filter
    pub async fn start_scan(&self, mode: ScanMode, unique_only: bool) -> Result<()> {
        log::debug!("Starting scan - Mode: {}, UniqueOnly: {}", mode.as_str(), unique_only);
        let permit = self.lane.acquire().await.map_err(|e| DeviceError::Task(e.to_string()))?;
        lock_session(&self.session).begin_scan(mode, unique_only)?;

        let facade = self.facade.clone();
        let started = self
            .lane
            .run(permit, move || match mode {
                ScanMode::Single => facade.single_scan(),
                ScanMode::Continuous => facade.start_continuous_scan(),
            })
            .await;

        match started {
            Ok(Ok(())) => {
                let confirmed = lock_session(&self.session).confirm_scan(mode);
                if confirmed.is_err() {
                    log::warn!("Session changed while the scan was starting, stopping it again");
                    if let Err(e) = self.facade.stop_scan() {
                        log::warn!("Stopping the orphaned scan failed: {}", e);
                    }
                }
                confirmed
            }
            Ok(Err(e)) => {
                lock_session(&self.session).abort_scan();
                Err(e.into())
            }
            Err(e) => {
                lock_session(&self.session).abort_scan();
                Err(DeviceError::Task(e.to_string()))
            }
        }
    }

    /// Best effort: the tracked scan state returns to idle even if the driver refuses
    pub fn stop_scan(&self) -> Result<()> {
        lock_session(&self.session).require_scanning()?;
        let stopped = self.facade.stop_scan();
        lock_session(&self.session).scan_stopped();
        if let Err(e) = &stopped {
            log::warn!("Stop scan reported an error, scan marked idle anyway: {}", e);
        }
        stopped.map_err(DeviceError::from)
    }

    pub fn clear_seen_tags(&self) {
        lock_session(&self.session).clear_seen();
        log::debug!("Cleared seen tags");
    }

    pub async fn set_power(&self, level: i32) -> Result<()> {
        let permit = self.lane.acquire().await.map_err(|e| DeviceError::Task(e.to_string()))?;
        lock_session(&self.session).require_connected("setPower")?;

        let facade = self.facade.clone();
        self.lane
            .run(permit, move || facade.set_power(level))
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))??;
        log::info!("RF power set to {}", level);
        Ok(())
    }

    pub async fn read_tag_data(&self, request: ReadRequest) -> Result<String> {
        let permit = self.lane.acquire().await.map_err(|e| DeviceError::Task(e.to_string()))?;
        lock_session(&self.session).require_connected("readTagData")?;

        let facade = self.facade.clone();
        let data = self
            .lane
            .run(permit, move || {
                facade.read_memory(
                    &request.tag_id,
                    request.bank,
                    request.word_ptr,
                    request.length,
                    request.password.as_str(),
                )
            })
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))??;

        data.ok_or(DeviceError::ReadEmpty)
    }

    pub async fn write_tag_data(&self, request: WriteRequest) -> Result<()> {
        let permit = self.lane.acquire().await.map_err(|e| DeviceError::Task(e.to_string()))?;
        lock_session(&self.session).require_connected("writeTagData")?;

        let facade = self.facade.clone();
        self.lane
            .run(permit, move || {
                facade.write_memory(
                    &request.data_hex,
                    &request.tag_id,
                    request.bank,
                    request.word_ptr,
                    request.password.as_str(),
                )
            })
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))??;
        Ok(())
    }

    pub async fn write_epc(&self, new_epc: String, password: AccessPassword) -> Result<()> {
        let permit = self.lane.acquire().await.map_err(|e| DeviceError::Task(e.to_string()))?;
        lock_session(&self.session).require_connected("writeEPC")?;

        let facade = self.facade.clone();
        self.lane
            .run(permit, move || facade.write_identifier(&new_epc, password.as_str()))
            .await
            .map_err(|e| DeviceError::Task(e.to_string()))??;
        log::info!("EPC rewritten");
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock_session(&self.session).snapshot()
    }

    /// Drop all session state, as on plugin detach
    pub fn reset(&self) {
        self.negotiator.reset();
    }
}
