//! Per-stream grouping of orders into combined shipments.
//!
//! A [`ShipmentAggregator`] is created for every `ProcessOrders` call and is
//! owned by that call's feed task. Orders are grouped by their destination
//! (see [`Order::destination`]); each destination seen in the current window
//! gets one [`CombinedShipment`] whose order list preserves arrival order.
//!
//! ## Windowing
//!
//! The aggregator uses fixed windows of exactly `batch_size` orders: the
//! counter starts at zero, is bumped after each ingest, and is reset to zero
//! by [`ShipmentAggregator::flush`]. Whatever remains when the inbound stream
//! ends is handed out once by [`ShipmentAggregator::drain`], which consumes
//! the aggregator so nothing can be emitted twice.

use order_tonic_core::proto::{CombinedShipment, Order};
use std::collections::HashMap;

/// Observable phase of a batch window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    /// Nothing buffered.
    Idle,
    /// At least one order buffered, window not yet full.
    Accumulating,
    /// Window full; the next step must be a flush.
    Flushing,
}

#[derive(Debug)]
pub struct ShipmentAggregator {
    batch_size: usize,
    batched: usize,
    // destination -> index into `shipments`, so flushes come out in the
    // order destinations were first seen.
    slots: HashMap<String, usize>,
    shipments: Vec<CombinedShipment>,
}

impl ShipmentAggregator {
    /// Creates an idle aggregator.
    ///
    /// `batch_size` must be non-zero. This is only asserted in debug builds;
    /// `ServerConfig` rejects zero at startup, so a release build never sees
    /// it. A zero size would make every ingest flush.
    pub fn new(batch_size: usize) -> Self {
        debug_assert!(batch_size > 0, "batch size must be non-zero");
        Self {
            batch_size,
            batched: 0,
            slots: HashMap::new(),
            shipments: Vec::new(),
        }
    }

    /// Routes `order` into the shipment for its destination, opening a new
    /// shipment if this is the first order for that destination in the
    /// window.
    pub fn ingest(&mut self, order: Order) {
        let destination = order.destination();
        let slot = match self.slots.get(destination) {
            Some(&slot) => slot,
            None => {
                let slot = self.shipments.len();
                self.shipments
                    .push(CombinedShipment::for_destination(destination));
                self.slots.insert(destination.to_string(), slot);
                slot
            }
        };
        self.shipments[slot].order_list.push(order);
        self.batched += 1;
    }

    /// `true` once the window holds `batch_size` orders.
    pub fn should_flush(&self) -> bool {
        self.batched >= self.batch_size
    }

    /// Hands out every open shipment and returns to [`BatchState::Idle`].
    pub fn flush(&mut self) -> Vec<CombinedShipment> {
        self.slots.clear();
        self.batched = 0;
        core::mem::take(&mut self.shipments)
    }

    /// Hands out whatever is left at end of input.
    pub fn drain(mut self) -> Vec<CombinedShipment> {
        self.flush()
    }

    pub fn state(&self) -> BatchState {
        if self.batched == 0 {
            BatchState::Idle
        } else if self.should_flush() {
            BatchState::Flushing
        } else {
            BatchState::Accumulating
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_tonic_core::proto::Address;

    fn order(id: &str, destination: &str) -> Order {
        Order {
            id: id.to_string(),
            addresses: vec![Address {
                address: destination.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn ids(shipment: &CombinedShipment) -> Vec<&str> {
        shipment.order_list.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn full_window_of_one_destination_yields_one_shipment() {
        let mut agg = ShipmentAggregator::new(3);
        assert_eq!(agg.state(), BatchState::Idle);

        agg.ingest(order("1", "NY"));
        agg.ingest(order("2", "NY"));
        assert_eq!(agg.state(), BatchState::Accumulating);
        assert!(!agg.should_flush());

        agg.ingest(order("3", "NY"));
        assert_eq!(agg.state(), BatchState::Flushing);
        assert!(agg.should_flush());

        let shipments = agg.flush();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].id, "cmb - NY");
        assert_eq!(shipments[0].status, "Processed!");
        assert_eq!(ids(&shipments[0]), ["1", "2", "3"]);

        assert_eq!(agg.state(), BatchState::Idle);
        assert!(agg.drain().is_empty());
    }

    #[test]
    fn shipments_come_out_in_first_seen_order() {
        let mut agg = ShipmentAggregator::new(4);
        agg.ingest(order("1", "LA"));
        agg.ingest(order("2", "NY"));
        agg.ingest(order("3", "LA"));
        agg.ingest(order("4", "SF"));

        let shipments = agg.flush();
        let names: Vec<_> = shipments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(names, ["cmb - LA", "cmb - NY", "cmb - SF"]);
        assert_eq!(ids(&shipments[0]), ["1", "3"]);
    }

    #[test]
    fn windows_are_a_fixed_size() {
        let mut agg = ShipmentAggregator::new(2);
        let mut flushed = Vec::new();
        for i in 0..6 {
            agg.ingest(order(&i.to_string(), "NY"));
            if agg.should_flush() {
                flushed.push(agg.flush());
            }
        }
        assert_eq!(flushed.len(), 3);
        for window in &flushed {
            assert_eq!(window.len(), 1);
            assert_eq!(window[0].order_list.len(), 2);
        }
    }

    #[test]
    fn drain_emits_partial_window() {
        let mut agg = ShipmentAggregator::new(3);
        agg.ingest(order("1", "A"));
        agg.ingest(order("2", "A"));
        let shipments = agg.drain();
        assert_eq!(shipments.len(), 1);
        assert_eq!(ids(&shipments[0]), ["1", "2"]);
    }

    #[test]
    fn orders_without_address_share_the_empty_destination() {
        let mut agg = ShipmentAggregator::new(3);
        agg.ingest(Order {
            id: "x".to_string(),
            ..Default::default()
        });
        agg.ingest(Order {
            id: "y".to_string(),
            ..Default::default()
        });
        let shipments = agg.drain();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].id, "cmb - ");
        assert_eq!(ids(&shipments[0]), ["x", "y"]);
    }
}
