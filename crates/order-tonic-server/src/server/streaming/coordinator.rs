use crate::server::{service::lifecycle::StreamGuard, telemetry::increment_stream_errors};
use core::{future::Future, pin::Pin};
use order_tonic_core::Error;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Response stream type shared by every server-streaming RPC.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Runs a feed loop on its own task and returns the client-facing stream.
///
/// `make_feed` receives the sending half of a bounded channel (capacity
/// `buffer`) and returns the loop that fills it. The returned stream yields
/// whatever the loop sends and ends when the loop finishes.
///
/// # Behavior
///
/// - The `guard` is held until the task exits, keeping the call counted as
///   in flight.
/// - If `shutdown` fires first, the loop is dropped and the client receives
///   `UNAVAILABLE`.
/// - Any other error is forwarded as the terminal status, except
///   [`Error::ChannelError`]: that means the client already hung up, so there
///   is nobody to tell.
pub fn spawn_feed<T, F, Fut>(
    buffer: usize,
    guard: StreamGuard,
    shutdown: CancellationToken,
    make_feed: F,
) -> ResponseStream<T>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<Result<T, Status>>) -> Fut,
    Fut: Future<Output = order_tonic_core::Result<()>> + Send + 'static,
{
    let (resp_tx, resp_rx) = mpsc::channel::<Result<T, Status>>(buffer);
    let feed = make_feed(resp_tx.clone());

    let fut = async move {
        let _guard = guard;
        let outcome = tokio::select! {
            res = feed => res,
            () = shutdown.cancelled() => Err(Error::ServiceShutdown),
        };

        match outcome {
            Ok(()) => {}
            Err(Error::ChannelError { context: _context }) => {
                increment_stream_errors();
                #[cfg(feature = "tracing")]
                tracing::debug!("Client went away: {}", _context);
            }
            Err(e) => {
                increment_stream_errors();
                #[cfg(feature = "tracing")]
                tracing::warn!("Stream failed: {}", e);

                // Best effort: the client may have disconnected as well.
                if let Err(_e) = resp_tx.send(Err(e.into())).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Failed to forward err: {}", _e);
                }
            }
        }
    };

    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(tracing::Span::current())
    };

    tokio::spawn(fut);

    Box::pin(ReceiverStream::new(resp_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::lifecycle::Lifecycle;
    use core::time::Duration;
    use futures::StreamExt;
    use std::sync::Arc;

    fn lifecycle() -> Arc<Lifecycle> {
        Arc::new(Lifecycle::new(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn items_then_clean_end() {
        let lifecycle = lifecycle();
        let guard = lifecycle.admit().unwrap();
        let stream = spawn_feed(2, guard, lifecycle.shutdown_token(), |tx| async move {
            for i in 0..3_u32 {
                tx.send(Ok(i)).await.map_err(|e| Error::ChannelError {
                    context: e.to_string(),
                })?;
            }
            Ok::<(), Error>(())
        });

        let items: Vec<u32> = stream.map(Result::unwrap).collect().await;
        assert_eq!(items, [0, 1, 2]);
        // The guard is released once the task has finished.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lifecycle.streams_inflight(), 0);
    }

    #[tokio::test]
    async fn errors_become_the_terminal_status() {
        let lifecycle = lifecycle();
        let guard = lifecycle.admit().unwrap();
        let stream = spawn_feed(2, guard, lifecycle.shutdown_token(), |tx| async move {
            let _ = tx.send(Ok(1_u32)).await;
            Err::<(), _>(Error::NotFound {
                id: "ghost".to_string(),
            })
        });

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        let status = items[1].as_ref().unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn shutdown_cancels_a_stuck_feed() {
        let lifecycle = lifecycle();
        let guard = lifecycle.admit().unwrap();
        let mut stream = spawn_feed(
            2,
            guard,
            lifecycle.shutdown_token(),
            |_tx: mpsc::Sender<Result<u32, Status>>| async move {
                futures::future::pending::<()>().await;
                Ok::<(), Error>(())
            },
        );

        lifecycle.shutdown().await;

        let status: Status = stream.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(stream.next().await.is_none());
    }
}
