//! Node configuration.

use std::time::Duration;

/// Configuration for dissemination behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// Children per node in the fan-out tree.
    pub branching: usize,
    /// How long a batch stays open after its first value (in milliseconds).
    pub batch_window_ms: u64,
    /// Timeout for each delivery attempt (in milliseconds).
    pub rpc_timeout_ms: u64,
    /// Capacity of each per-peer batcher queue.
    pub queue_capacity: usize,
    /// How long an enqueue may block on a full queue before the value is
    /// dropped for that peer (in milliseconds).
    pub enqueue_timeout_ms: u64,
    /// How long shutdown waits for in-flight deliveries (in milliseconds).
    pub shutdown_grace_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            branching: 4,
            batch_window_ms: 20,
            rpc_timeout_ms: 1000,
            queue_capacity: 100,
            enqueue_timeout_ms: 1000,
            shutdown_grace_ms: 500,
        }
    }
}

impl NodeConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn branching(mut self, branching: usize) -> Self {
        self.config.branching = branching.max(1);
        self
    }

    pub fn batch_window(mut self, ms: u64) -> Self {
        self.config.batch_window_ms = ms;
        self
    }

    pub fn rpc_timeout(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    pub fn enqueue_timeout(mut self, ms: u64) -> Self {
        self.config.enqueue_timeout_ms = ms;
        self
    }

    pub fn shutdown_grace(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
