//! Fixed-capacity, non-blocking admission pools.
//!
//! One pool per operation kind bounds the number of simultaneously
//! in-flight calls. Acquisition is try-acquire: a full pool rejects the
//! caller immediately, nothing queues. The permit releases on drop, so it
//! fires on every exit path the call can take.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error returned when an admission pool is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("admission pool at capacity")]
pub struct AdmissionError;

/// One unit of admitted capacity. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded pool of admission slots for one operation kind.
#[derive(Debug, Clone)]
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionPool {
    /// Creates a pool with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Attempts to take a slot without waiting.
    pub fn try_acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map(|permit| AdmissionPermit { _permit: permit })
            .map_err(|_| AdmissionError)
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
