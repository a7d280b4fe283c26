//! Process-wide, in-memory order storage.
//!
//! [`OrderStore`] is the only state shared between concurrently running RPC
//! handlers. Every access goes through a `parking_lot::RwLock`, so concurrent
//! writers never lose updates; writers to the same id race and the last one
//! wins. Nothing is ever evicted: orders live as long as the process.

use order_tonic_core::{Error, Result, proto::Order, types::OrderId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `order`, replacing any order already stored under its id.
    pub fn put(&self, order: Order) {
        self.orders.write().insert(order.id.clone(), order);
    }

    /// Returns a copy of the order stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no order has that id.
    pub fn get(&self, id: &str) -> Result<Order> {
        self.orders
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Returns a one-shot snapshot of every stored order.
    ///
    /// The lock is only held while the snapshot is taken, so callers may
    /// await between items without blocking writers. Iteration order is
    /// unspecified.
    pub fn all(&self) -> impl Iterator<Item = Order> + Send + use<> {
        // Capacity is a hint only; the map may change between the two reads.
        let mut snapshot = Vec::with_capacity(self.len());
        snapshot.extend(self.orders.read().values().cloned());
        snapshot.into_iter()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}
