//! Feed loops behind the streaming RPCs.
//!
//! Each function here owns one call's worth of work. Inbound client streams
//! are consumed with an explicit loop over `next()`: `Some(Ok(_))` is the
//! next item, `Some(Err(_))` aborts with the received status, and `None` is
//! the single exit into the end-of-input step. Outbound items go through a
//! bounded `mpsc` channel; a failed send means the client is gone and the
//! loop stops with [`Error::ChannelError`].
//!
//! The loops are generic over the inbound stream so they can be driven by
//! `tonic::Streaming` in production and by in-memory streams in tests.

use crate::server::{
    store::OrderStore,
    streaming::aggregator::{BatchState, ShipmentAggregator},
    telemetry::{increment_orders_stored, record_shipment_dispatched},
};
use futures::{Stream, StreamExt};
use order_tonic_core::{
    Error,
    proto::{CombinedShipment, Order},
    types::OrderId,
};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::mpsc;
use tonic::Status;

/// Streams every stored order that matches `query` into `resp_tx`.
///
/// Works on a snapshot of the store, so orders written while the search is
/// running may or may not be included. Each matching order is sent once,
/// however many of its items match.
pub async fn feed_matches(
    query: String,
    store: Arc<OrderStore>,
    resp_tx: mpsc::Sender<Result<Order, Status>>,
) -> order_tonic_core::Result<()> {
    if store.is_empty() {
        return Ok(());
    }

    for order in store.all().filter(|order| order.matches(&query)) {
        #[cfg(feature = "tracing")]
        tracing::debug!(order_id = %order.id, "Search hit");

        if let Err(e) = resp_tx.send(Ok(order)).await {
            return Err(Error::ChannelError {
                context: format!("Failed to forward search result: {e}"),
            });
        }
    }
    Ok(())
}

/// Applies a client stream of order updates to the store.
///
/// Returns the summary sent back to the client once the inbound stream ends:
/// the distinct updated ids in first-arrival order.
pub async fn apply_updates<S>(
    inbound: S,
    store: Arc<OrderStore>,
) -> order_tonic_core::Result<String>
where
    S: Stream<Item = Result<Order, Status>>,
{
    futures::pin_mut!(inbound);

    let mut seen = HashSet::new();
    let mut updated: Vec<OrderId> = Vec::new();

    loop {
        match inbound.next().await {
            Some(Ok(order)) => {
                #[cfg(feature = "tracing")]
                tracing::info!(order_id = %order.id, "Order updated");

                if seen.insert(order.id.clone()) {
                    updated.push(order.id.clone());
                }
                store.put(order);
                increment_orders_stored(1);
            }
            Some(Err(status)) => return Err(Error::Transport(status)),
            None => break,
        }
    }

    Ok(format!(
        "Orders processed Updated Order IDs : {}",
        updated.join(", ")
    ))
}

/// Groups a client stream of order ids into combined shipments.
///
/// After every ingested order the window is checked; a full window is
/// flushed to `resp_tx` immediately. When the inbound stream ends, the
/// partial window is drained and sent before returning.
///
/// # Errors
///
/// - [`Error::NotFound`] if an id does not resolve in the store. Shipments
///   still buffered at that point are discarded.
/// - [`Error::Transport`] if receiving from the client fails.
/// - [`Error::ChannelError`] if the client stopped listening.
pub async fn feed_shipments<S>(
    inbound: S,
    store: Arc<OrderStore>,
    batch_size: usize,
    resp_tx: mpsc::Sender<Result<CombinedShipment, Status>>,
) -> order_tonic_core::Result<()>
where
    S: Stream<Item = Result<OrderId, Status>>,
{
    futures::pin_mut!(inbound);

    let mut aggregator = ShipmentAggregator::new(batch_size);

    loop {
        match inbound.next().await {
            Some(Ok(order_id)) => {
                let order = store.get(&order_id)?;

                #[cfg(feature = "tracing")]
                tracing::debug!(order_id = %order_id, destination = %order.destination(), "Order routed");

                aggregator.ingest(order);
                if aggregator.should_flush() {
                    dispatch(aggregator.flush(), &resp_tx).await?;
                    debug_assert_eq!(aggregator.state(), BatchState::Idle);
                }
            }
            Some(Err(status)) => return Err(Error::Transport(status)),
            None => break,
        }
    }

    dispatch(aggregator.drain(), &resp_tx).await
}

async fn dispatch(
    shipments: Vec<CombinedShipment>,
    resp_tx: &mpsc::Sender<Result<CombinedShipment, Status>>,
) -> order_tonic_core::Result<()> {
    for shipment in shipments {
        #[cfg(feature = "tracing")]
        tracing::info!("Shipping : {} -> {}", shipment.id, shipment.order_list.len());

        let orders = shipment.order_list.len();
        if let Err(e) = resp_tx.send(Ok(shipment)).await {
            return Err(Error::ChannelError {
                context: format!("Failed to forward shipment: {e}"),
            });
        }
        record_shipment_dispatched(orders);
    }
    Ok(())
}
