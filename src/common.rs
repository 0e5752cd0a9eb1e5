//! Shared identifiers and small value types used across every layer of the
//! agent: the gossip engine, the coordination engine, and the wire codec.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Maximum length of a node name, in bytes.
pub const MAX_NODE_NAME_LEN: usize = 128;

/// Maximum length of opaque node metadata, in bytes.
pub const MAX_NODE_META_LEN: usize = 512;

/// Maximum length of the cluster label, in bytes.
pub const MAX_LABEL_LEN: usize = 255;

/// Unique identifier for a node: its name. Addresses may change across
/// incarnations, but the name is the node's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
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

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// The six-part protocol/delegate version tuple carried by every node
///: the UDP/TCP wire protocol's min/max/current version,
/// and the delegate (application) protocol's min/max/current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub proto_min: u8,
    pub proto_max: u8,
    pub proto_cur: u8,
    pub delegate_min: u8,
    pub delegate_max: u8,
    pub delegate_cur: u8,
}

impl ProtocolVersion {
    /// Check whether `other` is compatible with us: their current protocol
    /// version must fall within our accepted [min,max] range and vice versa.
    pub fn compatible_with(&self, other: &ProtocolVersion) -> bool {
        let proto_ok = other.proto_cur >= self.proto_min
            && other.proto_cur <= self.proto_max
            && self.proto_cur >= other.proto_min
            && self.proto_cur <= other.proto_max;
        let delegate_ok = other.delegate_cur >= self.delegate_min
            && other.delegate_cur <= self.delegate_max;
        proto_ok && delegate_ok
    }
}

impl From<ProtocolVersion> for [u8; 6] {
    fn from(v: ProtocolVersion) -> Self {
        [v.proto_min, v.proto_max, v.proto_cur, v.delegate_min, v.delegate_max, v.delegate_cur]
    }
}

impl From<[u8; 6]> for ProtocolVersion {
    fn from(v: [u8; 6]) -> Self {
        Self {
            proto_min: v[0],
            proto_max: v[1],
            proto_cur: v[2],
            delegate_min: v[3],
            delegate_max: v[4],
            delegate_cur: v[5],
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self {
            proto_min: 0,
            proto_max: 5,
            proto_cur: 2,
            delegate_min: 0,
            delegate_max: 1,
            delegate_cur: 0,
        }
    }
}

/// A node's wire identity: name, advertised address, opaque application
/// metadata, and protocol version tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeId,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
    pub vsn: ProtocolVersion,
}

impl Node {
    pub fn new(name: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            meta: Vec::new(),
            vsn: ProtocolVersion::default(),
        }
    }

    /// Validate the name length and tag-metadata size bounds.
    pub fn validate(&self) -> Result<(), crate::error::AgentError> {
        if self.name.as_str().is_empty() || self.name.as_str().len() > MAX_NODE_NAME_LEN {
            return Err(crate::error::AgentError::Config(format!(
                "node name length {} exceeds {} byte limit",
                self.name.as_str().len(),
                MAX_NODE_NAME_LEN
            )));
        }
        if self.meta.len() > MAX_NODE_META_LEN {
            return Err(crate::error::AgentError::Config(format!(
                "node metadata length {} exceeds {} byte limit",
                self.meta.len(),
                MAX_NODE_META_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_compat_requires_overlap() {
        let a = ProtocolVersion {
            proto_min: 0,
            proto_max: 2,
            proto_cur: 2,
            delegate_min: 0,
            delegate_max: 1,
            delegate_cur: 1,
        };
        let b = ProtocolVersion {
            proto_min: 1,
            proto_max: 3,
            proto_cur: 3,
            delegate_min: 0,
            delegate_max: 1,
            delegate_cur: 0,
        };
        // a.proto_cur=2 must fall in b's [1,3] -> ok; b.proto_cur=3 must fall
        // in a's [0,2] -> fails.
        assert!(!a.compatible_with(&b));
    }

    #[test]
    fn node_validate_rejects_oversized_name() {
        let mut n = Node::new("x".repeat(MAX_NODE_NAME_LEN + 1), "127.0.0.1:0".parse().unwrap());
        n.meta.clear();
        assert!(n.validate().is_err());
    }
}
