//! Admission control and graceful shutdown for the order service.
//!
//! [`Lifecycle`] tracks whether the service still accepts calls and how many
//! streaming calls are in flight. Each admitted stream holds a
//! [`StreamGuard`] until its feed task finishes, so the count stays correct
//! on success, failure and client cancellation alike.

use crate::server::telemetry::{
    decrement_streams_inflight, increment_streams_inflight, record_stream_duration,
};
use core::time::Duration;
use order_tonic_core::Error;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Lifecycle {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl Lifecycle {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            streams_inflight: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Fails with [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn ensure_accepting(&self) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    /// Registers a new streaming call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if the service is shutting down.
    pub fn admit(self: &Arc<Self>) -> Result<StreamGuard, Error> {
        self.ensure_accepting()?;
        self.streams_inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Ok(StreamGuard {
            lifecycle: Arc::clone(self),
            started: Instant::now(),
        })
    }

    pub fn streams_inflight(&self) -> usize {
        self.streams_inflight.load(Ordering::Acquire)
    }

    /// Token cancelled once the drain window is over. Feed tasks race their
    /// work against it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Stops admitting calls, waits up to the shutdown timeout for in-flight
    /// streams to finish, then cancels whatever is still running.
    pub async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drained = timeout(self.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight streams drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} streams still active)",
                    self.streams_inflight()
                );
            }
        }

        self.shutdown_token.cancel();
    }
}

/// Keeps a streaming call counted as in flight until dropped.
#[derive(Debug)]
pub struct StreamGuard {
    lifecycle: Arc<Lifecycle>,
    started: Instant,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.lifecycle
            .streams_inflight
            .fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
        record_stream_duration(self.started.elapsed().as_millis() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_track_inflight_streams() {
        let lifecycle = Arc::new(Lifecycle::new(Duration::from_millis(10)));
        let a = lifecycle.admit().unwrap();
        let b = lifecycle.admit().unwrap();
        assert_eq!(lifecycle.streams_inflight(), 2);
        drop(a);
        assert_eq!(lifecycle.streams_inflight(), 1);
        drop(b);
        assert_eq!(lifecycle.streams_inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work_and_cancels_stragglers() {
        let lifecycle = Arc::new(Lifecycle::new(Duration::from_millis(20)));
        let token = lifecycle.shutdown_token();
        let _straggler = lifecycle.admit().unwrap();

        lifecycle.shutdown().await;

        assert!(token.is_cancelled());
        assert!(matches!(lifecycle.admit(), Err(Error::ServiceShutdown)));
        assert!(matches!(
            lifecycle.ensure_accepting(),
            Err(Error::ServiceShutdown)
        ));
    }

    #[tokio::test]
    async fn shutdown_waits_for_streams_to_finish() {
        let lifecycle = Arc::new(Lifecycle::new(Duration::from_secs(5)));
        let guard = lifecycle.admit().unwrap();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        let started = Instant::now();
        lifecycle.shutdown().await;
        assert_eq!(lifecycle.streams_inflight(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
