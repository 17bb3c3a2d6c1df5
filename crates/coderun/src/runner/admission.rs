//! Admission control
//!
//! A fixed number of slots bounds how many executions are in flight. A
//! request either gets a slot within the configured wait or is turned away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

/// Proof of admission, held for the whole execution
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Pool of execution slots
#[derive(Debug)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    wait: Option<Duration>,
}

impl SlotPool {
    /// Create a pool of `capacity` slots; `wait` bounds how long a request
    /// may queue, `None` rejects immediately when every slot is taken.
    pub fn new(capacity: usize, wait: Option<Duration>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait,
        }
    }

    /// Take a slot, or `None` if none freed up in time
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Option<Slot> {
        let permit = match self.wait {
            None => self.semaphore.clone().try_acquire_owned().ok(),
            Some(wait) => tokio::time::timeout(wait, self.semaphore.clone().acquire_owned())
                .await
                .ok()
                .and_then(Result::ok),
        };
        match permit {
            Some(permit) => {
                debug!(available = self.available(), "slot acquired");
                Some(Slot { _permit: permit })
            }
            None => {
                debug!(capacity = self.capacity, "no slot available");
                None
            }
        }
    }

    /// Get the number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
