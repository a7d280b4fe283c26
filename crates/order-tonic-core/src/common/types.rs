//! # Aggregation Constants and Message Helpers
//!
//! Shared naming and sizing rules for combined shipments, plus small helpers
//! on the generated [`Order`] and [`CombinedShipment`] messages so the server
//! and any client agree on how orders are routed.
//!
//! ## Routing
//!
//! An order is routed by the `address` field of its first [`Address`]. Orders
//! without any address route under the empty string, so they still end up in
//! a (shared) shipment instead of being dropped.
//!
//! [`Address`]: crate::proto::Address

use crate::proto::{CombinedShipment, Order};

/// Identifier of an order, as carried by `google.protobuf.StringValue`.
pub type OrderId = String;

/// Number of orders collected before every open shipment is flushed.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Prefix prepended to the destination address to form a shipment id.
pub const SHIPMENT_ID_PREFIX: &str = "cmb - ";

/// Status label attached to every combined shipment the server emits.
pub const SHIPMENT_STATUS_PROCESSED: &str = "Processed!";

impl Order {
    /// Returns the routing key of this order: its first destination address,
    /// or `""` when the order has none.
    pub fn destination(&self) -> &str {
        self.addresses
            .first()
            .map(|address| address.address.as_str())
            .unwrap_or_default()
    }

    /// Returns `true` if any item description contains `query`
    /// (case-sensitive).
    pub fn matches(&self, query: &str) -> bool {
        self.items.iter().any(|item| item.contains(query))
    }
}

impl CombinedShipment {
    /// Creates an empty, processed shipment for `destination`.
    pub fn for_destination(destination: &str) -> Self {
        Self {
            id: format!("{SHIPMENT_ID_PREFIX}{destination}"),
            status: SHIPMENT_STATUS_PROCESSED.to_string(),
            order_list: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Address;

    fn order(id: &str, addresses: &[&str], items: &[&str]) -> Order {
        Order {
            id: id.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
            addresses: addresses
                .iter()
                .map(|a| Address {
                    address: a.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn destination_is_first_address() {
        let o = order("1", &["NY", "LA"], &[]);
        assert_eq!(o.destination(), "NY");
    }

    #[test]
    fn destination_defaults_to_empty() {
        let o = order("1", &[], &[]);
        assert_eq!(o.destination(), "");
    }

    #[test]
    fn matches_is_case_sensitive_substring() {
        let o = order("1", &["NY"], &["Google Pixel", "book"]);
        assert!(o.matches("Pixel"));
        assert!(o.matches("oo"));
        assert!(!o.matches("pixel"));
        assert!(!o.matches("laptop"));
    }

    #[test]
    fn shipment_naming() {
        let s = CombinedShipment::for_destination("San Jose, CA");
        assert_eq!(s.id, "cmb - San Jose, CA");
        assert_eq!(s.status, "Processed!");
        assert!(s.order_list.is_empty());
    }
}
