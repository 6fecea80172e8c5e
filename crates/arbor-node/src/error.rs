//! Error types for the broadcast node.

use std::time::Duration;
use thiserror::Error;

/// Protocol error codes carried in `error` replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Timeout = 0,
    NodeNotFound = 1,
    NotSupported = 10,
    TemporarilyUnavailable = 11,
    MalformedRequest = 12,
    Crash = 13,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Errors from the messaging substrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Peer rejected request with code {code}: {text}")]
    Rejected { code: u32, text: String },
}

/// Errors raised while handling a request.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Node has not been initialized")]
    NotInitialized,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Code to report back to the requester.
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::Malformed(_) => ErrorCode::MalformedRequest,
            NodeError::NotSupported(_) => ErrorCode::NotSupported,
            NodeError::NotInitialized => ErrorCode::TemporarilyUnavailable,
            NodeError::Network(NetworkError::Timeout(_)) => ErrorCode::Timeout,
            NodeError::Network(NetworkError::PeerNotFound(_)) => ErrorCode::NodeNotFound,
            NodeError::Network(_) | NodeError::Io(_) => ErrorCode::Crash,
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Malformed(err.to_string())
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
