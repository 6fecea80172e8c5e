//! Retried, at-least-once delivery of batches to a single peer.
//!
//! Each batch is delivered by its own task, so an unreachable peer never
//! holds up other peers or the next batch for the same peer. Receivers
//! deduplicate, which makes redelivery of the same batch harmless.

use crate::message::Payload;
use crate::network::NetworkTransport;
use arbor_core::{NodeId, Value};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Delivers batches by retrying `request` until the peer acknowledges.
pub struct ReliableSender<T: NetworkTransport> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: NetworkTransport> Clone for ReliableSender<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
        }
    }
}

impl<T: NetworkTransport> ReliableSender<T> {
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver `batch` to `peer`, retrying the identical payload with no cap
    /// until it is acknowledged. Returns the number of attempts made.
    ///
    /// Attempts start at most once per timeout period: an attempt that fails
    /// early waits out the rest of its slot before the next one.
    pub async fn deliver(&self, peer: &NodeId, batch: Vec<Value>) -> u32 {
        let size = batch.len();
        let payload = Payload::BroadcastBatch { message: batch };
        let mut attempt: u32 = 1;

        loop {
            let started = Instant::now();
            match self
                .transport
                .request(peer, payload.clone(), self.timeout)
                .await
            {
                Ok(_) => {
                    tracing::debug!(%peer, size, attempt, "delivered batch");
                    return attempt;
                }
                Err(error) => {
                    tracing::warn!(%peer, size, attempt, %error, "batch delivery failed, retrying");
                    tokio::time::sleep_until(started + self.timeout).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// In-flight delivery tasks.
///
/// Tasks are fire-and-forget while the node runs; they are only joined at
/// shutdown, through [`Deliveries::drain`].
#[derive(Clone, Default)]
pub struct Deliveries {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Deliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a delivery task. Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Number of deliveries not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait up to `grace` for every delivery to finish, then abort the rest.
    /// Returns how many deliveries were abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());

        let joined = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_ok() {
            return 0;
        }

        let abandoned = tasks.len();
        tasks.shutdown().await;
        abandoned
    }
}
