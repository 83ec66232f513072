pub mod filter;
pub mod lane;
pub mod manager;
pub mod models;
pub mod negotiator;
pub mod session;

pub use filter::{TagFilter, TagId};
pub use lane::DriverLane;
pub use manager::DeviceManager;
pub use models::*;
pub use negotiator::{ConnectionError, ConnectionNegotiator, Connected};
pub use session::{DeviceSession, SharedSession};

use crate::driver::{DriverError, PowerError};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Mode must be SINGLE or CONTINUOUS, got {0:?}")]
    InvalidMode(String),

    #[error("{command} not allowed while {state}")]
    InvalidState { command: &'static str, state: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Power(#[from] PowerError),

    #[error("Read returned null")]
    ReadEmpty,

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
