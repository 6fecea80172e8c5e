//! Wire messages exchanged between nodes and clients.
//!
//! One JSON object per message:
//!
//! ```text
//! {"src": "n1", "dest": "n2", "body": {"type": "broadcast", "msg_id": 7, "message": 42}}
//! ```

use crate::error::{ErrorCode, NodeError};
use arbor_core::{NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An addressed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

/// Message body: correlation ids plus the typed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed payloads, discriminated by the `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Broadcast {
        message: Value,
    },
    BroadcastOk,
    BroadcastBatch {
        message: Vec<Value>,
    },
    BroadcastBatchOk,
    Read,
    ReadOk {
        messages: Vec<Value>,
    },
    /// Proposed neighbour map. Nodes derive their own tree, so the contents
    /// are accepted but never used.
    Topology {
        #[serde(default)]
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
    TopologyOk,
    Error {
        code: u32,
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Unknown,
}

impl Payload {
    /// The `type` discriminator, for logs and error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::BroadcastBatch { .. } => "broadcast_batch",
            Payload::BroadcastBatchOk => "broadcast_batch_ok",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Error { .. } => "error",
            Payload::Unknown => "unknown",
        }
    }

    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Payload::Error {
            code: code.code(),
            text: text.into(),
        }
    }
}

impl From<&NodeError> for Payload {
    fn from(err: &NodeError) -> Self {
        Payload::error(err.code(), err.to_string())
    }
}

impl Message {
    pub fn new(src: NodeId, dest: NodeId, body: Body) -> Self {
        Self { src, dest, body }
    }

    /// Build the reply to this message, addressed back to its sender.
    pub fn reply(&self, payload: Payload) -> Message {
        Message {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body {
                msg_id: None,
                in_reply_to: self.body.msg_id,
                payload,
            },
        }
    }

    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decode one wire line.
///
/// When the envelope is readable but the body is not, the error carries
/// enough of the envelope to answer the sender with an `error` reply.
pub fn decode(line: &str) -> Result<Message, DecodeError> {
    let raw: serde_json::Value =
        serde_json::from_str(line).map_err(|e| DecodeError::NotJson(e.to_string()))?;

    match serde_json::from_value::<Message>(raw.clone()) {
        Ok(message) => Ok(message),
        Err(err) => Err(DecodeError::Malformed {
            reply_to: recover_return_address(&raw),
            error: NodeError::from(err),
        }),
    }
}

/// Why a line could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// Not JSON at all; nobody to answer.
    NotJson(String),
    /// Valid JSON that is not a well-formed message.
    Malformed {
        reply_to: Option<(NodeId, NodeId, u64)>,
        error: NodeError,
    },
}

impl DecodeError {
    /// Error reply for the sender, if one can be addressed.
    pub fn reply(&self) -> Option<Message> {
        match self {
            DecodeError::NotJson(_) => None,
            DecodeError::Malformed { reply_to, error } => {
                let (src, dest, msg_id) = reply_to.clone()?;
                Some(Message {
                    src: dest,
                    dest: src,
                    body: Body {
                        msg_id: None,
                        in_reply_to: Some(msg_id),
                        payload: Payload::from(error),
                    },
                })
            }
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotJson(e) => write!(f, "not a JSON message: {}", e),
            DecodeError::Malformed { error, .. } => write!(f, "{}", error),
        }
    }
}

fn recover_return_address(raw: &serde_json::Value) -> Option<(NodeId, NodeId, u64)> {
    let src = raw.get("src")?.as_str()?;
    let dest = raw.get("dest")?.as_str()?;
    let msg_id = raw.get("body")?.get("msg_id")?.as_u64()?;
    Some((NodeId::new(src), NodeId::new(dest), msg_id))
}
