pub mod commands;
pub mod config;
pub mod device;
pub mod driver;
pub mod events;

use std::sync::{Arc, Mutex};

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;

pub use commands::{CommandGateway, CommandOutcome, MethodCall};
pub use config::ScannerConfig;
pub use device::{DeviceError, DeviceManager, ScanMode, SessionSnapshot};
pub use driver::{DriverClaim, PowerRail, ReaderDriver, SysfsPowerRail};
pub use events::{ChannelSink, EventSink, EventSinks, StatusKind, TagRead};

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Scanner plugin must be attached inside a tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),

    #[error("Reader driver is already attached to another session")]
    DriverInUse,
}

/// One attached reader: session, callback bridge, delivery task and command surface.
///
/// The driver stays claimed until the plugin is dropped, so a second plugin
/// cannot open a session on the same reader.
pub struct ScannerPlugin {
    manager: Arc<DeviceManager>,
    gateway: Arc<CommandGateway>,
    sinks: Arc<EventSinks>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    _claim: DriverClaim,
}

impl ScannerPlugin {
    pub fn attach(
        config: ScannerConfig,
        driver: Arc<dyn ReaderDriver>,
        power: Arc<dyn PowerRail>,
    ) -> Result<Self, AttachError> {
        Handle::try_current()?;
        let claim = DriverClaim::acquire(&driver).ok_or(AttachError::DriverInUse)?;

        let session = device::DeviceSession::shared();
        let (publisher, queue) = events::EventPublisher::channel();
        let sinks = Arc::new(EventSinks::new());
        let delivery = events::spawn_delivery(queue, sinks.clone());

        let bridge = Arc::new(events::EventBridge::new(session.clone(), publisher.clone()));
        let manager = Arc::new(DeviceManager::new(
            Arc::new(config),
            session,
            driver::DriverFacade::new(driver),
            power,
            publisher,
            bridge,
        ));
        let gateway = Arc::new(CommandGateway::new(manager.clone()));

        log::info!("RFID scanner plugin attached");
        Ok(Self {
            manager,
            gateway,
            sinks,
            delivery: Mutex::new(Some(delivery)),
            _claim: claim,
        })
    }

    /// Attach with the sysfs power rail named in `config`
    pub fn attach_sysfs(
        config: ScannerConfig,
        driver: Arc<dyn ReaderDriver>,
    ) -> Result<Self, AttachError> {
        let power = Arc::new(SysfsPowerRail::new(config.power_rail_path.clone()));
        Self::attach(config, driver, power)
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    pub fn sinks(&self) -> &Arc<EventSinks> {
        &self.sinks
    }

    pub fn manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    pub async fn handle(&self, call: MethodCall) -> CommandOutcome {
        self.gateway.handle(call).await
    }

    /// Resets the session, drops every sink and stops event delivery.
    /// Commands issued afterwards still answer but emit nothing.
    pub fn detach(&self) {
        self.manager.reset();
        self.sinks.cancel_all();
        let delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(delivery) = delivery {
            delivery.abort();
        }
        log::info!("RFID scanner plugin detached");
    }
}

impl Drop for ScannerPlugin {
    fn drop(&mut self) {
        let delivery = self.delivery.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(delivery) = delivery {
            delivery.abort();
        }
    }
}
