use crate::hypergraph::{EdgeIndex, NodeId};

/// A node of a [`super::ContractionTree`]. Leaves are the inputs, internal nodes
/// are pairwise contractions of their two children.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Sorted indices of this node's tensor.
    pub(super) legs: Vec<EdgeIndex>,
    /// For every leg, how many leaves below this node carry it.
    pub(super) counts: Vec<u32>,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Option<(NodeId, NodeId)>,
    /// Elements of this node's tensor (per slice).
    pub(super) size: f64,
    /// Operations of the contraction producing this node (per slice), zero for leaves.
    pub(super) flops: f64,
    pub(super) subtree_flops: f64,
    pub(super) subtree_write: f64,
    pub(super) subtree_max_size: f64,
    pub(super) num_leaves: usize,
}

impl Node {
    pub(super) fn leaf(legs: Vec<EdgeIndex>, size: f64) -> Self {
        let counts = vec![1; legs.len()];
        Self {
            legs,
            counts,
            parent: None,
            children: None,
            size,
            flops: 0.0,
            subtree_flops: 0.0,
            subtree_write: 0.0,
            subtree_max_size: 0.0,
            num_leaves: 1,
        }
    }

    pub(super) fn internal(
        legs: Vec<EdgeIndex>,
        counts: Vec<u32>,
        children: (NodeId, NodeId),
        num_leaves: usize,
    ) -> Self {
        Self {
            legs,
            counts,
            parent: None,
            children: Some(children),
            size: 0.0,
            flops: 0.0,
            subtree_flops: 0.0,
            subtree_write: 0.0,
            subtree_max_size: 0.0,
            num_leaves,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        self.children
    }

    #[inline]
    pub fn legs(&self) -> &[EdgeIndex] {
        &self.legs
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.size
    }

    #[inline]
    pub fn flops(&self) -> f64 {
        self.flops
    }

    /// Total flops of all contractions in the subtree rooted here.
    #[inline]
    pub fn subtree_flops(&self) -> f64 {
        self.subtree_flops
    }

    /// Total size of all intermediates in the subtree rooted here.
    #[inline]
    pub fn subtree_write(&self) -> f64 {
        self.subtree_write
    }

    /// Largest intermediate in the subtree rooted here.
    #[inline]
    pub fn subtree_max_size(&self) -> f64 {
        self.subtree_max_size
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }
}
