//! Reader addressing and timing configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: &str = "/dev/ttyHS1";
pub const DEFAULT_PRIMARY_BAUD: u32 = 57_600;
pub const DEFAULT_FALLBACK_BAUD: u32 = 115_200;
pub const DEFAULT_POWER_RAIL_PATH: &str = "/sys/class/pigpig/pogo_vcc_sel/value";

/// Wait after power-up before the reader is addressed
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Serial device the reader is wired to
    pub port: String,
    pub primary_baud: u32,
    /// Tried once if the primary rate fails
    pub fallback_baud: u32,
    /// Third argument of the vendor connect call
    pub driver_log_level: u8,
    pub settle_delay_ms: u64,
    /// Anti-collision session written after connect
    pub inventory_session: u8,
    /// Upper bound on the whole connect negotiation; unbounded when unset
    pub connect_timeout_ms: Option<u64>,
    pub power_rail_path: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            primary_baud: DEFAULT_PRIMARY_BAUD,
            fallback_baud: DEFAULT_FALLBACK_BAUD,
            driver_log_level: 1,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            inventory_session: 1,
            connect_timeout_ms: None,
            power_rail_path: PathBuf::from(DEFAULT_POWER_RAIL_PATH),
        }
    }
}

impl ScannerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&contents)?;
        log::info!("Loaded scanner config from {} (port {})", path.display(), config.port);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port must not be empty".into()));
        }
        if self.primary_baud == 0 || self.fallback_baud == 0 {
            return Err(ConfigError::Invalid("baud rates must be non-zero".into()));
        }
        if self.inventory_session > 3 {
            return Err(ConfigError::Invalid(format!(
                "inventory session must be 0-3, got {}",
                self.inventory_session
            )));
        }
        Ok(())
    }

    /// Primary rate first, then the single fallback
    pub fn baud_rates(&self) -> [u32; 2] {
        [self.primary_baud, self.fallback_baud]
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
