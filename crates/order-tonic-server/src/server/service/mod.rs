//! gRPC service implementation and call lifecycle.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`OrderService`).
//! - [`lifecycle`] - Admission control, in-flight accounting and graceful
//!   shutdown.

pub mod handler;
pub mod lifecycle;
