//! Purpose: Fixed-size pool of blocking persistence workers.
//! Exports: `WorkerPool`, `Slot`, `PoolCloser`.
//! Role: Bounds concurrent store calls and pushes backpressure onto the submitter.
//! Invariants: At most `size` jobs run at once; each job holds one slot until it returns.
//! Invariants: Reserving waits while the pool is saturated; a closed pool rejects instead.
//! Invariants: The slot count is fixed at construction and never resized.
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::core::error::{Error, ErrorKind};

pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    tasks: JoinSet<()>,
}

/// Reserved capacity for exactly one job.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Shuts a pool down from outside the submitting task.
#[derive(Clone, Debug)]
pub struct PoolCloser {
    slots: Arc<Semaphore>,
}

impl PoolCloser {
    /// Rejects every pending and future reservation. Running jobs finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("worker count must be greater than zero")
                .with_hint("Use a positive value like 100."));
        }
        if size > Semaphore::MAX_PERMITS {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("worker count exceeds platform limits")
                .with_hint(format!("Use at most {} workers.", Semaphore::MAX_PERMITS)));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            tasks: JoinSet::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.size - self.slots.available_permits()
    }

    pub fn closer(&self) -> PoolCloser {
        PoolCloser {
            slots: Arc::clone(&self.slots),
        }
    }

    /// Waits for a free slot.
    pub async fn reserve(&self) -> Result<Slot, Error> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Busy)
                    .with_message("worker pool is closed")
                    .with_source(err)
            })?;
        Ok(Slot { _permit: permit })
    }

    /// Runs `job` on the blocking pool; the slot is released when it returns or panics.
    pub fn spawn<F>(&mut self, slot: Slot, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.reap();
        self.tasks.spawn_blocking(move || {
            let _slot = slot;
            job();
        });
    }

    /// Waits until every spawned job has finished.
    pub async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_join_failure(result);
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join_failure(result);
        }
    }
}

fn log_join_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "worker job did not complete");
    }
}
