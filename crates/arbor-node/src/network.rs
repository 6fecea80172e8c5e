//! Network transport abstractions for the broadcast node.
//!
//! A transport only has to put a [`Message`] on the wire ([`NetworkTransport::emit`]);
//! the three primitives the node is written against are provided on top of it:
//!
//! - `send` - fire and forget, no delivery guarantee
//! - `request` - one round trip, fails on timeout, transport error or an
//!   `error` reply
//! - `reply` - answer an inbound request along the reverse path

use crate::error::NetworkError;
use crate::message::{Body, Message, Payload};
use arbor_core::NodeId;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Requests waiting for their reply, keyed by `msg_id`.
#[derive(Debug, Default)]
pub struct PendingReplies {
    next_msg_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh message id, never registered for a reply.
    pub fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a message id and a receiver for its reply.
    pub fn register(&self) -> (u64, oneshot::Receiver<Message>) {
        let msg_id = self.next_msg_id();
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(msg_id, tx);
        (msg_id, rx)
    }

    /// Stop waiting for `msg_id`; a reply arriving later is dropped.
    pub fn forget(&self, msg_id: u64) {
        self.waiting.lock().remove(&msg_id);
    }

    /// Route an inbound message.
    ///
    /// Replies are consumed here, whether or not anyone still waits for them.
    /// Anything else is handed back to be dispatched as a request.
    pub fn complete(&self, message: Message) -> Option<Message> {
        let Some(in_reply_to) = message.body.in_reply_to else {
            return Some(message);
        };

        let waiter = self.waiting.lock().remove(&in_reply_to);
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                tracing::debug!(
                    src = %message.src,
                    in_reply_to,
                    kind = message.body.payload.kind(),
                    "dropping reply nobody is waiting for"
                );
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Identity of the local node.
    fn node_id(&self) -> &NodeId;

    /// Full cluster membership, in the same order on every node.
    fn node_ids(&self) -> &[NodeId];

    /// Reply correlation table.
    fn pending(&self) -> &PendingReplies;

    /// Put one message on the wire.
    async fn emit(&self, message: Message) -> Result<(), NetworkError>;

    /// Fire-and-forget send.
    async fn send(&self, dest: &NodeId, payload: Payload) -> Result<(), NetworkError> {
        let body = Body {
            msg_id: Some(self.pending().next_msg_id()),
            in_reply_to: None,
            payload,
        };
        self.emit(Message::new(self.node_id().clone(), dest.clone(), body))
            .await
    }

    /// Single round trip with an explicit timeout.
    async fn request(
        &self,
        dest: &NodeId,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, NetworkError> {
        let (msg_id, rx) = self.pending().register();
        let body = Body {
            msg_id: Some(msg_id),
            in_reply_to: None,
            payload,
        };

        if let Err(e) = self
            .emit(Message::new(self.node_id().clone(), dest.clone(), body))
            .await
        {
            self.pending().forget(msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => match reply.body.payload {
                Payload::Error { code, text } => Err(NetworkError::Rejected { code, text }),
                payload => Ok(payload),
            },
            Ok(Err(_)) => Err(NetworkError::Disconnected),
            Err(_) => {
                self.pending().forget(msg_id);
                Err(NetworkError::Timeout(timeout))
            }
        }
    }

    /// Answer `request` along the reverse path.
    async fn reply(&self, request: &Message, payload: Payload) -> Result<(), NetworkError> {
        self.emit(request.reply(payload)).await
    }
}

/// Inbound messages for one endpoint.
pub type Inbox = mpsc::UnboundedReceiver<Message>;

type Routes = Arc<RwLock<HashMap<NodeId, mpsc::UnboundedSender<Message>>>>;

/// Link faults injected by a [`MemoryNetwork`].
#[derive(Debug)]
struct LinkFaults {
    drop_rate: f64,
    rng: StdRng,
    cut: HashSet<(NodeId, NodeId)>,
}

impl LinkFaults {
    fn drops(&mut self, src: &NodeId, dest: &NodeId) -> bool {
        if self.cut.contains(&(src.clone(), dest.clone())) {
            return true;
        }
        self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate)
    }
}

/// In-memory network for tests and simulation.
///
/// Every joined transport gets an inbound channel; messages are routed by
/// `dest`. Links can lose messages at random or be cut entirely.
#[derive(Clone)]
pub struct MemoryNetwork {
    members: Arc<Vec<NodeId>>,
    routes: Routes,
    faults: Arc<Mutex<LinkFaults>>,
}

impl MemoryNetwork {
    /// Create a network whose cluster membership is `members`.
    pub fn new(members: Vec<NodeId>) -> Self {
        Self {
            members: Arc::new(members),
            routes: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(Mutex::new(LinkFaults {
                drop_rate: 0.0,
                rng: StdRng::seed_from_u64(0),
                cut: HashSet::new(),
            })),
        }
    }

    /// Drop each message with probability `rate`, reproducibly from `seed`.
    pub fn with_loss(self, rate: f64, seed: u64) -> Self {
        {
            let mut faults = self.faults.lock();
            faults.drop_rate = rate.clamp(0.0, 1.0);
            faults.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Attach `id`, which need not be a cluster member (clients join too).
    pub fn join(&self, id: impl Into<NodeId>) -> (Arc<MemoryTransport>, Inbox) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(id.clone(), tx);
        let transport = MemoryTransport {
            local_id: id,
            network: self.clone(),
            pending: PendingReplies::new(),
        };
        (Arc::new(transport), rx)
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&self, a: &NodeId, b: &NodeId) {
        let mut faults = self.faults.lock();
        faults.cut.insert((a.clone(), b.clone()));
        faults.cut.insert((b.clone(), a.clone()));
    }

    /// Restore every cut link.
    pub fn heal(&self) {
        self.faults.lock().cut.clear();
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    fn route(&self, message: Message) -> Result<(), NetworkError> {
        let tx = self.routes.read().get(&message.dest).cloned();
        let Some(tx) = tx else {
            return Err(NetworkError::PeerNotFound(message.dest.to_string()));
        };

        if self.faults.lock().drops(&message.src, &message.dest) {
            tracing::trace!(src = %message.src, dest = %message.dest, "link dropped message");
            return Ok(());
        }

        tx.send(message)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    local_id: NodeId,
    network: MemoryNetwork,
    pending: PendingReplies,
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    fn node_id(&self) -> &NodeId {
        &self.local_id
    }

    fn node_ids(&self) -> &[NodeId] {
        self.network.members()
    }

    fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    async fn emit(&self, message: Message) -> Result<(), NetworkError> {
        self.network.route(message)
    }
}

/// Create a network of `count` members named `n0..n{count-1}`, all joined.
pub fn create_network(count: usize) -> (MemoryNetwork, Vec<(Arc<MemoryTransport>, Inbox)>) {
    let members: Vec<NodeId> = (0..count).map(|i| NodeId::new(format!("n{}", i))).collect();
    let network = MemoryNetwork::new(members.clone());
    let endpoints = members.into_iter().map(|id| network.join(id)).collect();
    (network, endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_resolves_on_reply() {
        let (_network, mut endpoints) = create_network(2);
        let (b, mut b_rx) = endpoints.pop().unwrap();
        let (a, mut a_rx) = endpoints.pop().unwrap();

        tokio::spawn(async move {
            let request = b_rx.recv().await.unwrap();
            b.reply(&request, Payload::BroadcastOk).await.unwrap();
        });

        let a_clone = Arc::clone(&a);
        let response = tokio::spawn(async move {
            a_clone
                .request(&"n1".into(), Payload::Broadcast { message: 1 }, Duration::from_secs(1))
                .await
        });

        let reply = a_rx.recv().await.unwrap();
        assert!(a.pending().complete(reply).is_none());
        assert_eq!(response.await.unwrap().unwrap(), Payload::BroadcastOk);
        assert!(a.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_and_forgets() {
        let (network, mut endpoints) = create_network(2);
        let (a, _a_rx) = endpoints.remove(0);
        network.partition(&"n0".into(), &"n1".into());

        let result = a
            .request(&"n1".into(), Payload::Read, Duration::from_millis(100))
            .await;

        assert_eq!(result, Err(NetworkError::Timeout(Duration::from_millis(100))));
        assert!(a.pending().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let (_network, mut endpoints) = create_network(1);
        let (a, _rx) = endpoints.remove(0);

        let result = a.send(&"n7".into(), Payload::Read).await;
        assert_eq!(result, Err(NetworkError::PeerNotFound("n7".into())));
    }

    #[tokio::test]
    async fn test_error_reply_is_rejection() {
        let (_network, mut endpoints) = create_network(2);
        let (b, mut b_rx) = endpoints.pop().unwrap();
        let (a, mut a_rx) = endpoints.pop().unwrap();

        tokio::spawn(async move {
            let request = b_rx.recv().await.unwrap();
            b.reply(&request, Payload::error(crate::error::ErrorCode::NotSupported, "no"))
                .await
                .unwrap();
        });

        let a_clone = Arc::clone(&a);
        let response = tokio::spawn(async move {
            a_clone
                .request(&"n1".into(), Payload::Read, Duration::from_secs(1))
                .await
        });
        a.pending().complete(a_rx.recv().await.unwrap());

        assert_eq!(
            response.await.unwrap(),
            Err(NetworkError::Rejected { code: 10, text: "no".into() })
        );
    }

    #[test]
    fn test_late_reply_is_swallowed() {
        let pending = PendingReplies::new();
        let (msg_id, rx) = pending.register();
        pending.forget(msg_id);
        drop(rx);

        let late = Message::new(
            "n1".into(),
            "n0".into(),
            Body {
                msg_id: None,
                in_reply_to: Some(msg_id),
                payload: Payload::BroadcastOk,
            },
        );
        assert!(pending.complete(late).is_none());
    }

    #[test]
    fn test_lossy_link_is_reproducible() {
        let outcomes = |seed| {
            let network = MemoryNetwork::new(vec![]).with_loss(0.5, seed);
            let mut faults = network.faults.lock();
            let dropped: Vec<bool> = (0..32)
                .map(|_| faults.drops(&"a".into(), &"b".into()))
                .collect();
            dropped
        };
        assert_eq!(outcomes(7), outcomes(7));
    }
}
