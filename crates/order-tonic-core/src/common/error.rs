//! Error types for the order management service.
//!
//! This module defines the central `Error` enum shared by every RPC handler.
//! It implements `From<Error>` for `tonic::Status` so handlers can bubble
//! errors up with `?` and have them reach the client as a single terminal
//! status.
//!
//! ## Error Cases
//! - `NotFound`: The requested order id is not in the store.
//! - `Transport`: A receive on an inbound stream failed. The original status
//!   is passed through untouched.
//! - `ChannelError`: The response channel towards the client closed, usually
//!   because the client went away.
//! - `MalformedInput`: Reserved for request validation. No handler emits it
//!   today.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the order management service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// No order is stored under the given id.
    #[error("Order does not exist: {id}")]
    NotFound { id: String },

    /// Receiving from a client stream failed.
    #[error("Transport error: {0}")]
    Transport(#[from] Status),

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request failed validation.
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { id } => Status::not_found(format!("Order does not exist: {id}")),
            Error::Transport(status) => status,
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::MalformedInput { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
