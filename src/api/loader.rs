//! Purpose: Fan decoded records out to a bounded pool of persistence workers.
//! Exports: `RecordSource`, `Loader`, `LoadOutcome`, `LoadFailure`, `FailureKind`.
//! Role: Single puller between the decoder and the store; owns the worker pool.
//! Invariants: Records are submitted in decode order; completion order is unspecified.
//! Invariants: A failed or rejected record is reported once and never retried.
//! Invariants: `run` never fails once started and returns only after every job finished.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_stream::StreamExt;

use crate::api::store::RecordStore;
use crate::core::decode::{Decoder, RecordStream, StreamEnd};
use crate::core::error::Error;
use crate::core::pool::{PoolCloser, WorkerPool};
use crate::core::record::Keyed;

/// Anything that can hand the loader a consume-once record stream.
pub trait RecordSource<T> {
    fn load(self) -> RecordStream<T>;
}

impl<R, T> RecordSource<T> for Decoder<R, T>
where
    R: std::io::Read + Send + 'static,
    T: Keyed,
{
    fn load(self) -> RecordStream<T> {
        self.produce(None)
    }
}

impl<T> RecordSource<T> for RecordStream<T> {
    fn load(self) -> RecordStream<T> {
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The store rejected the record.
    Persist,
    /// The pool was closed; the record was dropped unsaved.
    Rejected,
    /// Decoding stopped early.
    Decode,
}

#[derive(Debug)]
pub struct LoadFailure<'a> {
    pub kind: FailureKind,
    pub record_id: Option<&'a str>,
    pub error: &'a Error,
}

type FailureHook = dyn Fn(&LoadFailure<'_>) + Send + Sync;

#[derive(Clone, Default)]
struct Reporter {
    hook: Option<Arc<FailureHook>>,
}

impl Reporter {
    fn report(&self, failure: &LoadFailure<'_>) {
        let record_id = failure.record_id.unwrap_or_default();
        match failure.kind {
            FailureKind::Persist => {
                tracing::error!(record_id, error = %failure.error, "failed to persist record");
            }
            FailureKind::Rejected => {
                tracing::error!(record_id, error = %failure.error, "worker pool rejected record; dropped");
            }
            FailureKind::Decode => {
                tracing::error!(record_id, error = %failure.error, "input decoding stopped early");
            }
        }
        if let Some(hook) = &self.hook {
            hook(failure);
        }
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    /// Records the decoder emitted.
    pub decoded: u64,
    pub submitted: u64,
    pub persisted: u64,
    pub failed: u64,
    pub rejected: u64,
    pub end: StreamEnd,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    failed: AtomicU64,
}

pub struct Loader<P, S> {
    source: P,
    store: Arc<S>,
    pool: WorkerPool,
    reporter: Reporter,
}

impl<P, S> Loader<P, S> {
    /// Fails only when a pool of `workers` slots cannot be built.
    pub fn new(source: P, store: S, workers: usize) -> Result<Self, Error> {
        let pool = WorkerPool::new(workers)?;
        Ok(Self {
            source,
            store: Arc::new(store),
            pool,
            reporter: Reporter::default(),
        })
    }

    /// Receives every failure report in addition to the log event.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoadFailure<'_>) + Send + Sync + 'static,
    {
        self.reporter.hook = Some(Arc::new(hook));
        self
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Handle that shuts the worker pool; later records are reported as rejected.
    pub fn closer(&self) -> PoolCloser {
        self.pool.closer()
    }

    pub async fn run<T>(self) -> LoadOutcome
    where
        P: RecordSource<T>,
        S: RecordStore<T>,
        T: Keyed,
    {
        let Loader {
            source,
            store,
            mut pool,
            reporter,
        } = self;
        let counters = Arc::new(Counters::default());
        let mut submitted = 0u64;
        let mut rejected = 0u64;

        tracing::info!(workers = pool.size(), "load started");
        let mut records = source.load();
        while let Some(record) = records.next().await {
            let slot = match pool.reserve().await {
                Ok(slot) => slot,
                Err(err) => {
                    rejected += 1;
                    let id = record.id();
                    let err = err.with_record(id);
                    reporter.report(&LoadFailure {
                        kind: FailureKind::Rejected,
                        record_id: Some(id),
                        error: &err,
                    });
                    continue;
                }
            };
            submitted += 1;
            let store = Arc::clone(&store);
            let counters = Arc::clone(&counters);
            let reporter = reporter.clone();
            pool.spawn(slot, move || match store.save(&record) {
                Ok(()) => {
                    counters.persisted.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    let id = record.id();
                    let err = err.with_record(id);
                    reporter.report(&LoadFailure {
                        kind: FailureKind::Persist,
                        record_id: Some(id),
                        error: &err,
                    });
                }
            });
        }

        let summary = records.finish().await;
        if let Some(err) = summary.end.error() {
            reporter.report(&LoadFailure {
                kind: FailureKind::Decode,
                record_id: err.record(),
                error: err,
            });
        }
        pool.drain().await;

        let outcome = LoadOutcome {
            decoded: summary.records,
            submitted,
            persisted: counters.persisted.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected,
            end: summary.end,
        };
        tracing::info!(
            decoded = outcome.decoded,
            persisted = outcome.persisted,
            failed = outcome.failed,
            rejected = outcome.rejected,
            end = outcome.end.label(),
            "load finished"
        );
        outcome
    }
}
