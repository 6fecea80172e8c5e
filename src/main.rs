//! # Arbor
//!
//! Broadcast node speaking newline-delimited JSON over stdin/stdout. Logs go
//! to stderr so they never interleave with protocol output.
//!
//! ```text
//! arbor --branching 4 --batch-window-ms 20 --log-level debug
//! ```

use arbor_node::{stdio, NodeConfigBuilder};
use clap::Parser;
use tokio::io::{stdin, stdout, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Tree-fanout broadcast node with batched, retried delivery")]
#[command(version)]
struct Cli {
    /// Children per node in the fan-out tree
    #[arg(long, default_value_t = 4)]
    branching: usize,

    /// How long a batch stays open after its first value
    #[arg(long, default_value_t = 20)]
    batch_window_ms: u64,

    /// Timeout for each delivery attempt
    #[arg(long, default_value_t = 1000)]
    rpc_timeout_ms: u64,

    /// Capacity of each per-peer queue
    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    /// How long a full queue may block a handler before the value is dropped
    #[arg(long, default_value_t = 1000)]
    enqueue_timeout_ms: u64,

    /// How long to wait for in-flight deliveries once input closes
    #[arg(long, default_value_t = 500)]
    shutdown_grace_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = NodeConfigBuilder::new()
        .branching(cli.branching)
        .batch_window(cli.batch_window_ms)
        .rpc_timeout(cli.rpc_timeout_ms)
        .queue_capacity(cli.queue_capacity)
        .enqueue_timeout(cli.enqueue_timeout_ms)
        .shutdown_grace(cli.shutdown_grace_ms)
        .build();
    tracing::debug!(?config, "starting node");

    let abandoned = stdio::run(BufReader::new(stdin()), stdout(), config).await?;
    tracing::info!(abandoned, "node stopped");
    Ok(())
}
