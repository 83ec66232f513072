use std::path::PathBuf;

use async_trait::async_trait;

/// Actuator codes understood by the pogo-pin power selector
pub const VCC_PSAM_DOWN: u8 = 6;
pub const VCC_PSAM_UP: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Up,
    Down,
}

impl PowerState {
    pub fn actuator_code(self) -> u8 {
        match self {
            PowerState::Up => VCC_PSAM_UP,
            PowerState::Down => VCC_PSAM_DOWN,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("Failed to drive power rail {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Power rail unavailable: {0}")]
    Unavailable(String),
}

/// Two-state power switch feeding the reader module.
#[async_trait]
pub trait PowerRail: Send + Sync {
    async fn set(&self, state: PowerState) -> Result<(), PowerError>;
}

/// Power rail driven through a sysfs control file.
pub struct SysfsPowerRail {
    path: PathBuf,
}

impl SysfsPowerRail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PowerRail for SysfsPowerRail {
    async fn set(&self, state: PowerState) -> Result<(), PowerError> {
        let code = state.actuator_code();
        tokio::fs::write(&self.path, code.to_string())
            .await
            .map_err(|source| PowerError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        log::debug!("Power control type: {}", code);
        Ok(())
    }
}
