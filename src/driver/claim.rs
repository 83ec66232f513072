//! Exclusive ownership of a driver instance.
//!
//! One driver instance stands for one physical reader, so at most one
//! session may drive it at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

use super::ReaderDriver;

static CLAIMED_DRIVERS: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn driver_key(driver: &Arc<dyn ReaderDriver>) -> usize {
    Arc::as_ptr(driver) as *const () as usize
}

/// Held for as long as a session owns the driver. Released on drop.
pub struct DriverClaim {
    key: usize,
    // Keeps the address from being reused while claimed
    _driver: Arc<dyn ReaderDriver>,
}

impl DriverClaim {
    /// `None` if another session already owns `driver`
    pub fn acquire(driver: &Arc<dyn ReaderDriver>) -> Option<Self> {
        let key = driver_key(driver);
        let mut claimed = CLAIMED_DRIVERS.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(key) {
            return None;
        }
        Some(Self { key, _driver: driver.clone() })
    }
}

impl Drop for DriverClaim {
    fn drop(&mut self) {
        CLAIMED_DRIVERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
