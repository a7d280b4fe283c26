//! gRPC service implementation for order management.
//!
//! This module defines [`OrderService`], the concrete implementation of the
//! [`OrderManagement`] service from `order.proto`. It covers all four gRPC
//! interaction patterns over a shared [`OrderStore`]:
//!
//! - unary: `SayHello`, `AddOrder`, `GetOrder`
//! - server-streaming: `SearchOrders`
//! - client-streaming: `UpdateOrders`
//! - bidirectional-streaming: `ProcessOrders`
//!
//! Server-streaming responses are produced by feed loops running on their
//! own task (see [`spawn_feed`]), so a slow client only ever blocks its own
//! call.

use crate::server::{
    config::ServerConfig,
    service::lifecycle::Lifecycle,
    store::OrderStore,
    streaming::{
        coordinator::{ResponseStream, spawn_feed},
        processor::{apply_updates, feed_matches, feed_shipments},
    },
    telemetry::{
        attach_remote_context, increment_orders_stored, increment_requests,
        increment_stream_errors,
    },
};
use order_tonic_core::{
    Error,
    proto::{CombinedShipment, Hello, Order, order_management_server::OrderManagement},
};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

/// In-memory order management service.
///
/// Cloning is cheap: every clone shares the same store and lifecycle.
#[derive(Clone)]
pub struct OrderService {
    config: ServerConfig,
    store: Arc<OrderStore>,
    lifecycle: Arc<Lifecycle>,
}

impl OrderService {
    /// Creates a service with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        let lifecycle = Lifecycle::new(config.shutdown_timeout);
        Self {
            config,
            store: Arc::new(OrderStore::new()),
            lifecycle: Arc::new(lifecycle),
        }
    }

    /// Initiates a graceful shutdown.
    ///
    /// New calls are refused immediately. In-flight streams get the
    /// configured timeout to finish before they are cancelled.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
    }
}

#[tonic::async_trait]
impl OrderManagement for OrderService {
    type SearchOrdersStream = ResponseStream<Order>;
    type ProcessOrdersStream = ResponseStream<CombinedShipment>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(name = %req.get_ref().name)))]
    async fn say_hello(&self, req: Request<Hello>) -> Result<Response<String>, Status> {
        attach_remote_context(req.metadata());
        self.lifecycle.ensure_accepting()?;
        increment_requests("SayHello");

        Ok(Response::new(format!("Hello {}", req.into_inner().name)))
    }

    /// Stores the order, replacing any previous order with the same id.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(order_id = %req.get_ref().id)))]
    async fn add_order(&self, req: Request<Order>) -> Result<Response<String>, Status> {
        attach_remote_context(req.metadata());
        self.lifecycle.ensure_accepting()?;
        increment_requests("AddOrder");

        let order = req.into_inner();
        let id = order.id.clone();
        self.store.put(order);
        increment_orders_stored(1);

        #[cfg(feature = "tracing")]
        tracing::info!("Order Added. ID : {}", id);

        Ok(Response::new(format!("Order Added: {id}")))
    }

    /// Fetches one order. Unknown ids fail with `NOT_FOUND` naming the id.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(order_id = %req.get_ref())))]
    async fn get_order(&self, req: Request<String>) -> Result<Response<Order>, Status> {
        attach_remote_context(req.metadata());
        self.lifecycle.ensure_accepting()?;
        increment_requests("GetOrder");

        let order = self.store.get(req.get_ref())?;
        Ok(Response::new(order))
    }

    /// Streams every stored order with an item containing the query.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(query = %req.get_ref())))]
    async fn search_orders(
        &self,
        req: Request<String>,
    ) -> Result<Response<Self::SearchOrdersStream>, Status> {
        attach_remote_context(req.metadata());
        let guard = self.lifecycle.admit()?;
        increment_requests("SearchOrders");

        let query = req.into_inner();
        let store = Arc::clone(&self.store);
        let stream = spawn_feed(
            self.config.stream_buffer_size,
            guard,
            self.lifecycle.shutdown_token(),
            move |resp_tx| feed_matches(query, store, resp_tx),
        );

        Ok(Response::new(stream))
    }

    /// Applies every streamed order, then replies once with the updated ids.
    ///
    /// An upload still open when the shutdown drain window closes is
    /// abandoned with `UNAVAILABLE`; orders applied before that point stay.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn update_orders(
        &self,
        req: Request<Streaming<Order>>,
    ) -> Result<Response<String>, Status> {
        attach_remote_context(req.metadata());
        let _guard = self.lifecycle.admit()?;
        increment_requests("UpdateOrders");

        let shutdown = self.lifecycle.shutdown_token();
        let summary = tokio::select! {
            res = apply_updates(req.into_inner(), Arc::clone(&self.store)) => res,
            () = shutdown.cancelled() => Err(Error::ServiceShutdown),
        };

        match summary {
            Ok(summary) => Ok(Response::new(summary)),
            Err(e) => {
                increment_stream_errors();
                #[cfg(feature = "tracing")]
                tracing::warn!("Update stream failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Groups streamed order ids into combined shipments by destination.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(batch_size = self.config.batch_size)))]
    async fn process_orders(
        &self,
        req: Request<Streaming<String>>,
    ) -> Result<Response<Self::ProcessOrdersStream>, Status> {
        attach_remote_context(req.metadata());
        let guard = self.lifecycle.admit()?;
        increment_requests("ProcessOrders");

        let inbound = req.into_inner();
        let store = Arc::clone(&self.store);
        let batch_size = self.config.batch_size;
        let stream = spawn_feed(
            self.config.stream_buffer_size,
            guard,
            self.lifecycle.shutdown_token(),
            move |resp_tx| feed_shipments(inbound, store, batch_size, resp_tx),
        );

        Ok(Response::new(stream))
    }
}
