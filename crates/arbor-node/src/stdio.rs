//! Line-oriented runtime: one JSON message per line in, one per line out.
//!
//! The first message must be `init`, which tells the node who it is and who
//! else is in the cluster. After that, inbound lines are decoded and fed to
//! [`Node::serve`] until the input closes.

use crate::config::NodeConfig;
use crate::error::{NetworkError, NodeError, Result};
use crate::message::{decode, Message, Payload};
use crate::network::{Inbox, NetworkTransport, PendingReplies};
use crate::node::Node;
use arbor_core::NodeId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Transport writing newline-delimited JSON to `W`.
pub struct LineTransport<W> {
    node_id: NodeId,
    node_ids: Vec<NodeId>,
    pending: PendingReplies,
    writer: Mutex<W>,
}

/// The transport used by the binary.
pub type StdioTransport = LineTransport<tokio::io::Stdout>;

impl<W: AsyncWrite + Unpin + Send + 'static> LineTransport<W> {
    /// Read lines until `init` arrives, acknowledge it, and return the
    /// initialized transport.
    ///
    /// Requests arriving before `init` are answered with a
    /// temporarily-unavailable error.
    pub async fn handshake<R>(lines: &mut Lines<R>, mut writer: W) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let message = match decode(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable message before init");
                    if let Some(reply) = e.reply() {
                        write_line(&mut writer, &reply).await?;
                    }
                    continue;
                }
            };

            let Payload::Init { node_id, node_ids } = &message.body.payload else {
                tracing::warn!(
                    src = %message.src,
                    kind = message.body.payload.kind(),
                    "message before init"
                );
                if message.body.msg_id.is_some() {
                    let reply = message.reply(Payload::from(&NodeError::NotInitialized));
                    write_line(&mut writer, &reply).await?;
                }
                continue;
            };

            let transport = Self {
                node_id: node_id.clone(),
                node_ids: node_ids.clone(),
                pending: PendingReplies::new(),
                writer: Mutex::new(writer),
            };
            transport.reply(&message, Payload::InitOk).await?;
            tracing::info!(node = %node_id, members = node_ids.len(), "initialized");
            return Ok(transport);
        }

        Err(NodeError::NotInitialized)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> NetworkTransport for LineTransport<W> {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    async fn emit(&self, message: Message) -> std::result::Result<(), NetworkError> {
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, &message)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> std::io::Result<()> {
    let mut line = message.to_line().map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Decode `lines` into an inbox until EOF.
///
/// Lines that do not decode are logged and skipped; when the sender can be
/// identified it gets a malformed-request error.
pub fn spawn_reader<R, W>(mut lines: Lines<R>, transport: Arc<LineTransport<W>>) -> (Inbox, JoinHandle<()>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, inbox) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "input read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match decode(&line) {
                Ok(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable message");
                    if let Some(reply) = e.reply() {
                        if let Err(err) = transport.emit(reply).await {
                            tracing::warn!(error = %err, "could not send error reply");
                        }
                    }
                }
            }
        }
        tracing::debug!("input closed");
    });
    (inbox, task)
}

/// Run a node over `reader`/`writer` until the input closes, then shut it
/// down. Returns the number of deliveries abandoned at shutdown.
///
/// Acknowledgements arrive on the same input, so once it closes no delivery
/// can complete. The shutdown grace period only gives the batches flushed
/// at shutdown time to reach the output; whatever is still waiting for an
/// acknowledgement afterwards is abandoned and counted.
pub async fn run<R, W>(reader: R, writer: W, config: NodeConfig) -> Result<usize>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    let transport = Arc::new(LineTransport::handshake(&mut lines, writer).await?);
    let (inbox, reader_task) = spawn_reader(lines, Arc::clone(&transport));

    let node = Arc::new(Node::new(transport, config));
    Arc::clone(&node).serve(inbox).await;
    if let Err(e) = reader_task.await {
        tracing::warn!(error = %e, "reader task failed");
    }

    Ok(node.shutdown().await)
}
