//! Streaming building blocks.
//!
//! - [`aggregator`] - Groups orders into combined shipments per batch window.
//! - [`processor`] - The per-call loops behind the streaming RPCs.
//! - [`coordinator`] - Runs a loop on its own task behind a response stream.

pub mod aggregator;
pub mod coordinator;
pub mod processor;
