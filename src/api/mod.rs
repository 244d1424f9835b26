//! Purpose: Define the public Rust API boundary for portstream.
//! Exports: Decoder, loader, stores, record model and error types.
//! Role: Stable surface for the CLI and embedding callers.
//! Invariants: This module is the only public path to the pipeline primitives.

mod loader;
mod store;

pub use crate::core::cancel::CancelSignal;
pub use crate::core::decode::{DecodeSummary, Decoder, RecordStream, StreamEnd};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::pool::PoolCloser;
pub use crate::core::progress::{Progress, ProgressLogger, ProgressReader};
pub use crate::core::record::{Keyed, Location, Record};
pub use loader::{FailureKind, LoadFailure, LoadOutcome, Loader, RecordSource};
pub use store::{JsonlStore, MemoryStore, RecordStore};
