//! Bounded admission of concurrently running workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding how many workers run at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
    limit: usize,
}

/// One admission slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `limit` workers at once.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            in_use: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> GatePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            // The semaphore is owned here and never closed.
            .unwrap_or_else(|_| unreachable!("concurrency gate semaphore closed"));
        self.in_use.fetch_add(1, Ordering::SeqCst);
        GatePermit {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        }
    }

    /// Maximum number of concurrent slots.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}
