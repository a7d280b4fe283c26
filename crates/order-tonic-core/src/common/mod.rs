//! Shared definitions used by both the gRPC server and its clients.
//!
//! - [`error`] - Service error type and its mapping onto `tonic::Status`.
//! - [`types`] - Aggregation constants and helpers on the generated messages.
//! - [`proto`] - Generated protobuf messages, client and server bindings.

pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/order.proto`.
///
/// `google.protobuf.StringValue` maps to `String`, so scalar requests such as
/// `GetOrder` take a bare order id.
pub mod proto {
    tonic::include_proto!("order");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("order_descriptor");
}
