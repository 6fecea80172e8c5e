//! Per-peer batching with a bounded flush latency.
//!
//! One batcher runs for every peer in the node's peer set:
//!
//! ```text
//! Idle --first value--> Accumulating --deadline--> flush, Idle
//!                         |    ^
//!                         +----+ more values (deadline unchanged)
//! ```
//!
//! The deadline is anchored to the first value of the batch, so a steady
//! stream of arrivals cannot postpone a flush past `window`.

use crate::network::NetworkTransport;
use crate::sender::{Deliveries, ReliableSender};
use arbor_core::{NodeId, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Outcome of handing a value to a batcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The queue stayed full for the whole bound, or the batcher is gone.
    Dropped,
}

/// Producer side of a batcher's bounded queue.
#[derive(Clone, Debug)]
pub struct PeerQueue {
    peer: NodeId,
    tx: mpsc::Sender<Value>,
}

impl PeerQueue {
    /// Bounded queue for `peer` and the receiving end a batcher drains.
    pub fn channel(peer: NodeId, capacity: usize) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (PeerQueue { peer, tx }, rx)
    }

    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    /// Queue `value` for this peer.
    ///
    /// A full queue blocks the caller for at most `bound`; past that the
    /// value is dropped for this peer and a warning is logged. A queue that
    /// stays full that long means the batcher is starved, and buffering
    /// without limit would only hide it.
    pub async fn enqueue(&self, value: Value, bound: Duration) -> Enqueued {
        let value = match self.tx.try_send(value) {
            Ok(()) => return Enqueued::Queued,
            Err(TrySendError::Full(value)) => value,
            Err(TrySendError::Closed(value)) => {
                tracing::debug!(peer = %self.peer, value, "batcher closed, value not queued");
                return Enqueued::Dropped;
            }
        };

        match self.tx.send_timeout(value, bound).await {
            Ok(()) => Enqueued::Queued,
            Err(SendTimeoutError::Timeout(value)) => {
                tracing::warn!(
                    peer = %self.peer,
                    value,
                    waited = ?bound,
                    "batcher queue full, dropping value for peer"
                );
                Enqueued::Dropped
            }
            Err(SendTimeoutError::Closed(value)) => {
                tracing::debug!(peer = %self.peer, value, "batcher closed, value not queued");
                Enqueued::Dropped
            }
        }
    }
}

/// Handle to a running batcher.
#[derive(Debug)]
pub struct BatcherHandle {
    queue: PeerQueue,
    task: JoinHandle<()>,
}

impl BatcherHandle {
    pub fn peer(&self) -> &NodeId {
        self.queue.peer()
    }

    pub fn queue(&self) -> &PeerQueue {
        &self.queue
    }

    /// Close the queue. The batcher flushes what it holds and stops; the
    /// returned handle resolves once it has.
    pub fn close(self) -> JoinHandle<()> {
        self.task
    }
}

/// Coalesces values for one peer into time-bounded batches.
pub struct Batcher<T: NetworkTransport> {
    peer: NodeId,
    inbox: mpsc::Receiver<Value>,
    window: Duration,
    sender: ReliableSender<T>,
    deliveries: Deliveries,
}

impl<T: NetworkTransport> Batcher<T> {
    /// Start a batcher for `peer` on the current runtime.
    pub fn spawn(
        peer: NodeId,
        capacity: usize,
        window: Duration,
        sender: ReliableSender<T>,
        deliveries: Deliveries,
    ) -> BatcherHandle {
        let (queue, inbox) = PeerQueue::channel(peer.clone(), capacity);
        let batcher = Batcher {
            peer,
            inbox,
            window,
            sender,
            deliveries,
        };
        let task = tokio::spawn(batcher.run());
        BatcherHandle { queue, task }
    }

    async fn run(mut self) {
        tracing::debug!(peer = %self.peer, window = ?self.window, "batcher started");
        loop {
            let Some(first) = self.inbox.recv().await else {
                break;
            };

            let deadline = Instant::now() + self.window;
            let mut batch = vec![first];
            let open = self.accumulate(&mut batch, deadline).await;
            self.flush(batch);

            if !open {
                break;
            }
        }
        tracing::debug!(peer = %self.peer, "batcher stopped");
    }

    /// Collect values until `deadline`. Returns `false` if the queue closed
    /// first, in which case the batch is flushed early.
    async fn accumulate(&mut self, batch: &mut Vec<Value>, deadline: Instant) -> bool {
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                () = &mut expiry => return true,
                next = self.inbox.recv() => match next {
                    Some(value) => batch.push(value),
                    None => return false,
                },
            }
        }
    }

    fn flush(&self, batch: Vec<Value>) {
        tracing::debug!(peer = %self.peer, size = batch.len(), "flushing batch");
        let sender = self.sender.clone();
        let peer = self.peer.clone();
        self.deliveries.spawn(async move {
            sender.deliver(&peer, batch).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::message::{Message, Payload};
    use crate::network::PendingReplies;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Acks every request and records when each batch arrived.
    struct RecordingTransport {
        id: NodeId,
        pending: PendingReplies,
        batches: Mutex<Vec<(Instant, Vec<Value>)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new("n0"),
                pending: PendingReplies::new(),
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<(Instant, Vec<Value>)> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl NetworkTransport for RecordingTransport {
        fn node_id(&self) -> &NodeId {
            &self.id
        }

        fn node_ids(&self) -> &[NodeId] {
            std::slice::from_ref(&self.id)
        }

        fn pending(&self) -> &PendingReplies {
            &self.pending
        }

        async fn emit(&self, _message: Message) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn request(
            &self,
            _dest: &NodeId,
            payload: Payload,
            _timeout: Duration,
        ) -> Result<Payload, NetworkError> {
            if let Payload::BroadcastBatch { message } = payload {
                self.batches.lock().push((Instant::now(), message));
            }
            Ok(Payload::BroadcastBatchOk)
        }
    }

    fn spawn_batcher(transport: &Arc<RecordingTransport>, window_ms: u64) -> BatcherHandle {
        let sender = ReliableSender::new(Arc::clone(transport), Duration::from_secs(1));
        Batcher::spawn(
            NodeId::new("n1"),
            16,
            Duration::from_millis(window_ms),
            sender,
            Deliveries::new(),
        )
    }

    const BOUND: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_anchored_to_first_value() {
        let transport = RecordingTransport::new();
        let batcher = spawn_batcher(&transport, 20);
        let start = Instant::now();

        assert_eq!(batcher.queue().enqueue(1, BOUND).await, Enqueued::Queued);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(batcher.queue().enqueue(2, BOUND).await, Enqueued::Queued);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        let (flushed_at, values) = &batches[0];
        assert_eq!(values, &vec![1, 2]);
        let latency = flushed_at.duration_since(start);
        assert!(latency >= Duration::from_millis(20), "flushed early: {:?}", latency);
        assert!(latency < Duration::from_millis(35), "deadline was reset: {:?}", latency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_values_start_a_new_batch() {
        let transport = RecordingTransport::new();
        let batcher = spawn_batcher(&transport, 20);

        batcher.queue().enqueue(1, BOUND).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        batcher.queue().enqueue(2, BOUND).await;
        batcher.queue().enqueue(3, BOUND).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        let values: Vec<Vec<Value>> = transport.batches().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![vec![1], vec![2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_batcher_sends_nothing() {
        let transport = RecordingTransport::new();
        let _batcher = spawn_batcher(&transport, 20);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(transport.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_partial_batch() {
        let transport = RecordingTransport::new();
        let batcher = spawn_batcher(&transport, 1_000);
        let start = Instant::now();

        batcher.queue().enqueue(7, BOUND).await;
        batcher.queue().enqueue(8, BOUND).await;
        tokio::task::yield_now().await;
        batcher.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![7, 8]);
        assert!(batches[0].0.duration_since(start) < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_then_drops() {
        let (queue, mut rx) = PeerQueue::channel(NodeId::new("n1"), 1);
        let start = Instant::now();

        assert_eq!(queue.enqueue(1, BOUND).await, Enqueued::Queued);
        assert_eq!(queue.enqueue(2, BOUND).await, Enqueued::Dropped);
        assert!(start.elapsed() >= BOUND);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(queue.enqueue(3, BOUND).await, Enqueued::Queued);
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_recovers_within_bound() {
        let (queue, mut rx) = PeerQueue::channel(NodeId::new("n1"), 1);
        queue.enqueue(1, BOUND).await;

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        assert_eq!(queue.enqueue(2, BOUND).await, Enqueued::Queued);
        assert_eq!(consumer.await.unwrap(), (Some(1), Some(2)));
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_dropped() {
        let (queue, rx) = PeerQueue::channel(NodeId::new("n1"), 4);
        drop(rx);

        assert_eq!(queue.enqueue(1, BOUND).await, Enqueued::Dropped);
    }
}
