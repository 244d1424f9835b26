//! Purpose: Library crate behind the `portstream` CLI and integration tests.
//! Exports: `api` (decoder, loader, stores) and `core` (pipeline internals).
//! Role: Streams one large keyed JSON object into a store through a bounded worker pool.
//! Invariants: Only construction can fail; a running load reports problems instead of returning them.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
