use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;

/// Serializes blocking driver work onto the blocking pool, one call at a time.
///
/// The serial reader can only service one exchange at once, so the lane has a
/// single permit. Callers take the permit before checking session legality so
/// the check and the driver call cannot interleave with another command.
#[derive(Clone)]
pub struct DriverLane {
    permits: Arc<Semaphore>,
}

impl DriverLane {
    pub fn new() -> Self {
        Self { permits: Arc::new(Semaphore::new(1)) }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.permits.clone().acquire_owned().await
    }

    /// Runs `work` on the blocking pool, releasing `permit` when it finishes
    pub async fn run<T, F>(&self, permit: OwnedSemaphorePermit, work: F) -> Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for DriverLane {
    fn default() -> Self {
        Self::new()
    }
}
