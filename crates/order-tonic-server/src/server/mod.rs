//! Server-side components of the order management service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/env configuration.
//! - [`store`] - Shared in-memory order storage.
//! - [`streaming`] - Feed loops, shipment aggregation and response streaming.
//! - [`service`] - The `OrderManagement` gRPC service and its lifecycle.
//! - [`telemetry`] - Logging, tracing and metrics setup.
//!
//! These components are wired together in the server's `main.rs`.

pub mod config;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
