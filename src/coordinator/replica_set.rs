//! Ordered set of storage nodes holding copies of one volume

use crate::coordinator::types::NodeEndpoint;
use serde::{Deserialize, Serialize};

/// Nodes believed to hold a live copy of a volume.
///
/// Order is preserved but carries no priority; every member is a peer.
/// Duplicate endpoints are dropped on insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaSet {
    nodes: Vec<NodeEndpoint>,
}

impl ReplicaSet {
    pub fn new<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeEndpoint>,
    {
        let mut set = Self::default();
        for node in nodes {
            set.add(node.into());
        }
        set
    }

    /// Add a node, returns false if it was already present
    pub fn add(&mut self, node: NodeEndpoint) -> bool {
        if self.contains(&node) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Remove a node, returns true if it was present
    pub fn remove(&mut self, node: &NodeEndpoint) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node);
        self.nodes.len() != before
    }

    pub fn contains(&self, node: &NodeEndpoint) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeEndpoint> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn as_slice(&self) -> &[NodeEndpoint] {
        &self.nodes
    }
}

impl<'a> IntoIterator for &'a ReplicaSet {
    type Item = &'a NodeEndpoint;
    type IntoIter = std::slice::Iter<'a, NodeEndpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
