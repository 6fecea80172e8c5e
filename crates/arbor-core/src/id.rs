//! Node identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, process-stable identifier of a node in the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_serializes_as_plain_string() {
        let id = NodeId::new("n3");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"n3\"");

        let back: NodeId = serde_json::from_str("\"c12\"").unwrap();
        assert_eq!(back.as_str(), "c12");
    }
}
