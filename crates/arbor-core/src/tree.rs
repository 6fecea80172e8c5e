//! Implicit k-ary fan-out tree over a fixed membership list.
//!
//! Nodes are addressed by their position in the membership array, so the
//! tree needs no links of its own:
//!
//! ```text
//! parent(i)   = (i - 1) / b        (the root, position 0, is its own parent)
//! children(i) = [b*i + 1, b*i + b] clipped to the list
//! ```
//!
//! Every node must build its tree from the same ordering of the membership
//! list, otherwise the nodes disagree about who their neighbours are.

use crate::id::NodeId;
use std::collections::HashSet;

/// Static fan-out tree. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<NodeId>,
    branching: usize,
}

impl Tree {
    /// Build a tree over `nodes` with `branching` children per node.
    ///
    /// # Panics
    ///
    /// Panics if `branching` is zero or `nodes` contains duplicates. Both are
    /// configuration faults: membership is fixed and known up front.
    pub fn new(nodes: Vec<NodeId>, branching: usize) -> Self {
        assert!(branching > 0, "tree branching factor must be at least 1");
        let mut unique = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            assert!(unique.insert(node), "duplicate node {} in membership", node);
        }
        Self { nodes, branching }
    }

    /// Branching factor the tree was built with.
    pub fn branching(&self) -> usize {
        self.branching
    }

    /// Membership list in tree order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of `node` in the membership list, if it is a member.
    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }

    fn index_of(&self, node: &NodeId) -> usize {
        self.position(node)
            .unwrap_or_else(|| panic!("node {} is not a member of the tree", node))
    }

    /// Direct children of `node`, in membership order.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a member.
    pub fn children(&self, node: &NodeId) -> &[NodeId] {
        let index = self.index_of(node);
        let first = self
            .branching
            .saturating_mul(index)
            .saturating_add(1)
            .min(self.nodes.len());
        let end = first.saturating_add(self.branching).min(self.nodes.len());
        &self.nodes[first..end]
    }

    /// Parent of `node`. The root is its own parent.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a member.
    pub fn parent(&self, node: &NodeId) -> &NodeId {
        let index = self.index_of(node);
        if index == 0 {
            return &self.nodes[0];
        }
        &self.nodes[(index - 1) / self.branching]
    }

    pub fn is_root(&self, node: &NodeId) -> bool {
        self.index_of(node) == 0
    }

    /// Parent followed by children, with `node` itself filtered out.
    ///
    /// The root's self-parent never shows up here, so callers never open a
    /// link to themselves.
    pub fn neighbours(&self, node: &NodeId) -> Vec<NodeId> {
        let parent = self.parent(node);
        let mut peers = Vec::with_capacity(self.branching + 1);
        if parent != node {
            peers.push(parent.clone());
        }
        peers.extend(self.children(node).iter().cloned());
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(*n)).collect()
    }

    fn members(count: usize) -> Vec<NodeId> {
        (0..count).map(|i| NodeId::new(format!("n{}", i))).collect()
    }

    #[test]
    fn test_children_linear_chain() {
        let tree = Tree::new(members(4), 1);

        assert_eq!(tree.children(&"n0".into()), ids(&["n1"]).as_slice());
        assert_eq!(tree.children(&"n1".into()), ids(&["n2"]).as_slice());
        assert!(tree.children(&"n3".into()).is_empty());
    }

    #[test]
    fn test_children_binary() {
        let tree = Tree::new(members(4), 2);

        assert_eq!(tree.children(&"n0".into()), ids(&["n1", "n2"]).as_slice());
        assert_eq!(tree.children(&"n1".into()), ids(&["n3"]).as_slice());
        assert!(tree.children(&"n2".into()).is_empty());
        assert!(tree.children(&"n3".into()).is_empty());
    }

    #[test]
    fn test_children_ternary() {
        let tree = Tree::new(members(5), 3);
        assert_eq!(
            tree.children(&"n0".into()),
            ids(&["n1", "n2", "n3"]).as_slice()
        );

        let tree = Tree::new(members(6), 3);
        assert_eq!(tree.children(&"n1".into()), ids(&["n4", "n5"]).as_slice());
        assert!(tree.children(&"n2".into()).is_empty());
    }

    #[test]
    fn test_children_large_membership() {
        let tree = Tree::new(members(25), 2);
        assert_eq!(tree.children(&"n0".into()), ids(&["n1", "n2"]).as_slice());
        assert_eq!(tree.children(&"n11".into()), ids(&["n23", "n24"]).as_slice());
        assert!(tree.children(&"n12".into()).is_empty());
    }

    #[test]
    fn test_parent() {
        let tree = Tree::new(members(4), 2);

        assert_eq!(tree.parent(&"n0".into()).as_str(), "n0");
        assert_eq!(tree.parent(&"n1".into()).as_str(), "n0");
        assert_eq!(tree.parent(&"n3".into()).as_str(), "n1");
        assert!(tree.is_root(&"n0".into()));
        assert!(!tree.is_root(&"n3".into()));
    }

    #[test]
    fn test_neighbours_filter_self_at_root() {
        let tree = Tree::new(members(4), 2);

        assert_eq!(tree.neighbours(&"n0".into()), ids(&["n1", "n2"]));
        assert_eq!(tree.neighbours(&"n1".into()), ids(&["n0", "n3"]));
        assert_eq!(tree.neighbours(&"n3".into()), ids(&["n1"]));
    }

    #[test]
    fn test_single_node_has_no_neighbours() {
        let tree = Tree::new(members(1), 4);
        assert!(tree.children(&"n0".into()).is_empty());
        assert!(tree.neighbours(&"n0".into()).is_empty());
    }

    #[test]
    #[should_panic(expected = "not a member")]
    fn test_unknown_node_is_fatal() {
        let tree = Tree::new(members(4), 2);
        tree.children(&"n9".into());
    }

    #[test]
    #[should_panic(expected = "duplicate node")]
    fn test_duplicate_membership_is_fatal() {
        Tree::new(ids(&["n0", "n1", "n0"]), 2);
    }

    #[test]
    #[should_panic(expected = "branching factor")]
    fn test_zero_branching_is_fatal() {
        Tree::new(members(3), 0);
    }
}
