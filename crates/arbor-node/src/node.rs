//! Broadcast orchestrator: request handlers and the state they share.
//!
//! The node owns the dedup store and the registry of per-peer batchers.
//! Handlers get at both through an `Arc<Node<T>>`; batchers and delivery
//! tasks own their per-peer state once spawned.

use crate::batcher::{Batcher, BatcherHandle, Enqueued, PeerQueue};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{Message, Payload};
use crate::network::{Inbox, NetworkTransport};
use crate::sender::{Deliveries, ReliableSender};
use crate::store::DedupStore;
use arbor_core::{NodeId, Tree, Value};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// A broadcast node.
pub struct Node<T: NetworkTransport> {
    transport: Arc<T>,
    config: NodeConfig,
    store: DedupStore,
    batchers: Mutex<Vec<BatcherHandle>>,
    deliveries: Deliveries,
}

impl<T: NetworkTransport> Node<T> {
    pub fn new(transport: Arc<T>, config: NodeConfig) -> Self {
        Self {
            transport,
            config,
            store: DedupStore::new(),
            batchers: Mutex::new(Vec::new()),
            deliveries: Deliveries::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.transport.node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current peer set.
    pub fn peers(&self) -> Vec<NodeId> {
        self.batchers
            .lock()
            .iter()
            .map(|b| b.peer().clone())
            .collect()
    }

    /// Deliveries still being retried.
    pub fn in_flight(&self) -> usize {
        self.deliveries.in_flight()
    }

    /// Everything observed so far, in first-seen order.
    pub fn read(&self) -> Vec<Value> {
        self.store.snapshot()
    }

    /// Store `values` and queue the new ones for every peer except `from`.
    /// Returns how many values were new.
    ///
    /// The dedup check for the whole batch runs under one lock acquisition.
    /// Fan-out happens after the lock is released and completes once every
    /// value is queued or dropped; delivery itself runs in the background.
    /// The whole request waits on full queues for at most the configured
    /// enqueue timeout.
    pub async fn broadcast(&self, from: &NodeId, values: impl IntoIterator<Item = Value>) -> usize {
        let fresh = self.store.observe_all(values);
        if fresh.is_empty() {
            return 0;
        }

        let targets: Vec<PeerQueue> = self
            .batchers
            .lock()
            .iter()
            .filter(|b| b.peer() != from)
            .map(|b| b.queue().clone())
            .collect();

        let dropped = fan_out(&targets, &fresh, self.config.enqueue_timeout()).await;

        tracing::debug!(
            %from,
            fresh = fresh.len(),
            peers = targets.len(),
            dropped,
            "fanned out new values"
        );
        fresh.len()
    }

    /// Derive the peer set from the membership list and start one batcher
    /// per peer, replacing any previous set. Returns the new peers.
    ///
    /// Everything already stored is delivered to each new peer, so values
    /// accepted before the peer set existed still travel on.
    ///
    /// # Panics
    ///
    /// Panics if this node is not part of the membership list.
    pub fn configure_topology(&self) -> Vec<NodeId> {
        let tree = Tree::new(self.transport.node_ids().to_vec(), self.config.branching);
        let peers = tree.neighbours(self.node_id());

        let sender = ReliableSender::new(Arc::clone(&self.transport), self.config.rpc_timeout());
        let batchers: Vec<BatcherHandle> = peers
            .iter()
            .map(|peer| {
                Batcher::spawn(
                    peer.clone(),
                    self.config.queue_capacity,
                    self.config.batch_window(),
                    sender.clone(),
                    self.deliveries.clone(),
                )
            })
            .collect();

        // Dropping the old handles closes their queues; those batchers flush
        // and stop on their own.
        let previous = std::mem::replace(&mut *self.batchers.lock(), batchers);
        if !previous.is_empty() {
            tracing::info!(replaced = previous.len(), "replacing peer set");
        }

        // Snapshot only after the swap: a value observed later is fanned out
        // to the new batchers by its own request.
        let backlog = self.store.snapshot();
        if !backlog.is_empty() {
            tracing::info!(size = backlog.len(), peers = peers.len(), "sending backlog to peers");
            for peer in &peers {
                let sender = sender.clone();
                let peer = peer.clone();
                let batch = backlog.clone();
                self.deliveries.spawn(async move {
                    sender.deliver(&peer, batch).await;
                });
            }
        }

        tracing::info!(
            node = %self.node_id(),
            branching = self.config.branching,
            peers = ?peers,
            "configured tree topology"
        );
        peers
    }

    /// Run the operation `request` asks for and reply to it.
    ///
    /// Requests without a `msg_id` are processed but not answered.
    pub async fn handle(&self, request: &Message) -> Result<()> {
        let reply = match &request.body.payload {
            Payload::Broadcast { message } => {
                self.broadcast(&request.src, [*message]).await;
                Payload::BroadcastOk
            }
            Payload::BroadcastBatch { message } => {
                self.broadcast(&request.src, message.iter().copied()).await;
                Payload::BroadcastBatchOk
            }
            Payload::Read => Payload::ReadOk {
                messages: self.read(),
            },
            Payload::Topology { .. } => {
                self.configure_topology();
                Payload::TopologyOk
            }
            Payload::Init { .. } => Payload::InitOk,
            other => return Err(NodeError::NotSupported(other.kind().to_string())),
        };

        if request.body.msg_id.is_some() {
            self.transport.reply(request, reply).await?;
        }
        Ok(())
    }

    /// [`Node::handle`], answering failures with an `error` reply.
    pub async fn dispatch(&self, request: Message) {
        let Err(error) = self.handle(&request).await else {
            return;
        };

        tracing::warn!(
            src = %request.src,
            kind = request.body.payload.kind(),
            %error,
            "request failed"
        );
        if request.body.msg_id.is_none() {
            return;
        }
        if let Err(e) = self.transport.reply(&request, Payload::from(&error)).await {
            tracing::warn!(src = %request.src, error = %e, "could not send error reply");
        }
    }

    /// Route inbound messages until `inbox` closes: replies go to their
    /// waiting requests, everything else is dispatched on its own task.
    ///
    /// Returns once the inbox has closed and every dispatched request has
    /// been answered.
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox) {
        let mut handlers = JoinSet::new();
        while let Some(message) = inbox.recv().await {
            let Some(request) = self.transport.pending().complete(message) else {
                continue;
            };
            while let Some(joined) = handlers.try_join_next() {
                propagate_panic(joined);
            }
            let node = Arc::clone(&self);
            handlers.spawn(async move { node.dispatch(request).await });
        }

        tracing::debug!(node = %self.node_id(), pending = handlers.len(), "inbox closed");
        while let Some(joined) = handlers.join_next().await {
            propagate_panic(joined);
        }
    }

    /// Stop every batcher after it flushes, then wait up to the configured
    /// grace period for in-flight deliveries. Returns how many deliveries
    /// were abandoned.
    pub async fn shutdown(&self) -> usize {
        let batchers = std::mem::take(&mut *self.batchers.lock());
        join_all(batchers.into_iter().map(BatcherHandle::close)).await;

        let abandoned = self.deliveries.drain(self.config.shutdown_grace()).await;
        if abandoned > 0 {
            tracing::warn!(abandoned, "abandoned undelivered batches at shutdown");
        } else {
            tracing::info!("shutdown complete");
        }
        abandoned
    }
}

/// Queue every value on every target, sharing one deadline across the whole
/// call. Returns how many (value, peer) pairs were dropped.
async fn fan_out(targets: &[PeerQueue], values: &[Value], bound: Duration) -> usize {
    let deadline = Instant::now() + bound;
    let mut dropped = 0;
    for value in values {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcomes = join_all(targets.iter().map(|queue| queue.enqueue(*value, remaining))).await;
        dropped += outcomes.iter().filter(|o| **o == Enqueued::Dropped).count();
    }
    dropped
}

/// A handler panic is a configuration fault (e.g. this node missing from
/// the membership list) and takes the serve loop down with it.
fn propagate_panic(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        }
    }
}
