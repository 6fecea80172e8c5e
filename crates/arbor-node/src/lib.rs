//! Arbor node - tree-fanout broadcast with batched, retried delivery
//!
//! A node stores every integer value it is told about and forwards new ones
//! to its neighbours in an implicit k-ary tree laid over the cluster
//! membership. Forwarding is batched per peer and retried until
//! acknowledged, so every value reaches every node once partitions heal.
//!
//! # Quick Start
//!
//! ```rust
//! use arbor_node::{create_network, Node, NodeConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let (_network, mut endpoints) = create_network(3);
//! let (transport, inbox) = endpoints.remove(0);
//!
//! let node = Arc::new(Node::new(transport, NodeConfig::default()));
//! node.configure_topology();
//! tokio::spawn(Arc::clone(&node).serve(inbox));
//!
//! node.broadcast(&"c1".into(), [42]).await;
//! assert_eq!(node.read(), vec![42]);
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`store`] - Deduplicating value store
//! - [`batcher`] - Per-peer batching with a bounded flush latency
//! - [`sender`] - Retried delivery of one batch to one peer
//! - [`node`] - Request handlers and the topology they fan out over
//! - [`network`] - Transport abstraction and an in-memory network
//! - [`stdio`] - Line-oriented runtime over stdin/stdout
//! - [`message`] - Wire format
//! - [`config`] - Tunables
//! - [`error`] - Error types

pub mod batcher;
pub mod config;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod sender;
pub mod stdio;
pub mod store;

// Re-exports for convenience
pub use batcher::{Batcher, BatcherHandle, Enqueued, PeerQueue};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{ErrorCode, NetworkError, NodeError, Result};
pub use message::{Body, Message, Payload};
pub use network::{create_network, Inbox, MemoryNetwork, MemoryTransport, NetworkTransport};
pub use node::Node;
pub use sender::{Deliveries, ReliableSender};
pub use stdio::{LineTransport, StdioTransport};
pub use store::DedupStore;

pub use arbor_core::{NodeId, Tree, Value};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{NodeConfig, NodeConfigBuilder};
    pub use crate::error::NodeError;
    pub use crate::network::{MemoryNetwork, NetworkTransport};
    pub use crate::node::Node;
    pub use arbor_core::{NodeId, Value};
}
