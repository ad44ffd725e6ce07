//! Contraction trees where intermediate bonds are truncated to a maximal dimension.

use itertools::Itertools;

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::error::Result;
use crate::hypergraph::{EdgeIndex, HyperGraph, NodeId};

/// Compression state of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedNode {
    /// Effective dimension of every leg, parallel to the node's legs.
    pub dims: Vec<f64>,
    /// The bond cap applied when creating this node, `None` for leaves.
    pub cap: Option<f64>,
    /// Number of elements with compressed dimensions.
    pub size: f64,
    /// Operations of the contraction with compressed operands.
    pub flops: f64,
    /// Cost of truncating the exact result down to the capped dimensions.
    pub truncation: f64,
}

/// A [`ContractionTree`] that additionally truncates every non-output bond of an
/// intermediate to at most `chi`, tracking the cost of doing so.
///
/// The exact tree is kept alongside, so exact and compressed costs of the same
/// contraction order can be compared.
#[derive(Debug, Clone)]
pub struct ContractionTreeCompressed {
    tree: ContractionTree,
    chi: f64,
    nodes: Vec<CompressedNode>,
    flops: f64,
    truncation: f64,
    max_size: f64,
    live_size: f64,
    peak: f64,
}

impl ContractionTreeCompressed {
    /// Creates the leaves of `graph` with bond cap `chi` for all later merges.
    pub fn new(graph: &HyperGraph, chi: u64) -> Self {
        let tree = ContractionTree::new(graph);
        let problem = tree.problem();
        let nodes = problem
            .inputs()
            .iter()
            .map(|legs| {
                let dims = legs.iter().map(|&ix| problem.size(ix) as f64).collect_vec();
                CompressedNode {
                    size: dims.iter().product(),
                    dims,
                    cap: None,
                    flops: 0.0,
                    truncation: 0.0,
                }
            })
            .collect_vec();
        let live_size = nodes.iter().map(|node| node.size).sum();
        Self {
            tree,
            chi: chi as f64,
            nodes,
            flops: 0.0,
            truncation: 0.0,
            max_size: 0.0,
            live_size,
            peak: live_size,
        }
    }

    /// Replays the contractions of `tree` with bond cap `chi`.
    pub fn from_tree(graph: &HyperGraph, tree: &ContractionTree, chi: u64) -> Result<Self> {
        let mut compressed = Self::new(graph, chi);
        for (a, b) in tree.ssa_path() {
            compressed.insert(a, b)?;
        }
        Ok(compressed)
    }

    /// Merges `a` and `b` using the default bond cap.
    pub fn insert(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.insert_with_cap(a, b, self.chi)
    }

    /// Merges `a` and `b`, truncating the non-output bonds of the result to `cap`.
    pub fn insert_with_cap(&mut self, a: NodeId, b: NodeId, cap: f64) -> Result<NodeId> {
        let id = self.tree.insert(a, b)?;
        let problem = self.tree.problem();

        let (la, lb) = (self.tree.legs(a), self.tree.legs(b));
        let (da, db) = (&self.nodes[a].dims, &self.nodes[b].dims);
        // effective dimension of every index touched by this contraction
        let mut touched: Vec<(EdgeIndex, f64)> = Vec::with_capacity(la.len() + lb.len());
        let (mut i, mut j) = (0, 0);
        while i < la.len() || j < lb.len() {
            match (la.get(i), lb.get(j)) {
                (Some(&x), Some(&y)) if x == y => {
                    touched.push((x, da[i].min(db[j])));
                    i += 1;
                    j += 1;
                }
                (Some(&x), Some(&y)) if x < y => {
                    touched.push((x, da[i]));
                    i += 1;
                }
                (Some(&x), None) => {
                    touched.push((x, da[i]));
                    i += 1;
                }
                (_, Some(&y)) => {
                    touched.push((y, db[j]));
                    j += 1;
                }
                (None, None) => break,
            }
        }
        let flops = touched.iter().map(|&(_, dim)| dim).product::<f64>();

        let mut uncompressed = 1.0;
        let mut capped = false;
        let dims = self
            .tree
            .legs(id)
            .iter()
            .map(|&ix| {
                let exact = touched
                    .iter()
                    .find(|&&(other, _)| other == ix)
                    .map_or(problem.size(ix) as f64, |&(_, dim)| dim);
                uncompressed *= exact;
                if problem.is_output(ix) || exact <= cap {
                    exact
                } else {
                    capped = true;
                    cap
                }
            })
            .collect_vec();
        let size = dims.iter().product::<f64>();
        let truncation = if capped { uncompressed * cap } else { 0.0 };

        let freed = self.nodes[a].size + self.nodes[b].size;
        self.flops += flops;
        self.truncation += truncation;
        self.max_size = self.max_size.max(size);
        self.peak = self.peak.max(self.live_size + size);
        self.live_size += size - freed;
        self.nodes.push(CompressedNode {
            dims,
            cap: Some(cap),
            size,
            flops,
            truncation,
        });
        Ok(id)
    }

    /// The underlying exact tree.
    #[inline]
    pub fn tree(&self) -> &ContractionTree {
        &self.tree
    }

    #[inline]
    pub fn chi(&self) -> f64 {
        self.chi
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &CompressedNode {
        &self.nodes[id]
    }

    /// The bond cap used for node `id`, `None` for leaves.
    #[inline]
    pub fn bond_cap(&self, id: NodeId) -> Option<f64> {
        self.nodes[id].cap
    }

    #[inline]
    pub fn total_flops(&self) -> f64 {
        self.flops
    }

    #[inline]
    pub fn total_truncation(&self) -> f64 {
        self.truncation
    }

    /// Contraction plus truncation cost.
    #[inline]
    pub fn total_cost(&self) -> f64 {
        self.flops + self.truncation
    }

    #[inline]
    pub fn max_size(&self) -> f64 {
        self.max_size
    }

    #[inline]
    pub fn peak_size(&self) -> f64 {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::error::ErrorKind;
    use crate::path;

    /// A ring of four rank-3 tensors, each with one open leg.
    fn ring() -> HyperGraph {
        let sizes = FxHashMap::from_iter([
            ('a', 8),
            ('b', 8),
            ('c', 8),
            ('d', 8),
            ('w', 2),
            ('x', 2),
            ('y', 2),
            ('z', 2),
        ]);
        HyperGraph::from_equation("awb,bxc,cyd,dza->wxyz", &sizes).unwrap()
    }

    #[test]
    fn test_large_cap_matches_exact_tree() {
        let graph = ring();
        let tree = ContractionTree::from_path(&graph, &path![(0, 1), (4, 2), (5, 3)]).unwrap();
        let compressed = ContractionTreeCompressed::from_tree(&graph, &tree, 1 << 20).unwrap();
        assert_approx_eq!(f64, compressed.total_flops(), tree.total_flops());
        assert_approx_eq!(f64, compressed.total_truncation(), 0.0);
        assert_approx_eq!(f64, compressed.max_size(), tree.max_size());
        assert_approx_eq!(f64, compressed.peak_size(), tree.peak_size());
        assert_eq!(compressed.bond_cap(0), None);
        assert_eq!(compressed.bond_cap(4), Some((1 << 20) as f64));
    }

    #[test]
    fn test_cap_truncates_internal_bonds() {
        let graph = ring();
        let mut compressed = ContractionTreeCompressed::new(&graph, 4);
        let ab = compressed.insert(0, 1).unwrap();
        // legs a, c, w, x: the 8-dim bonds are capped, the open legs are not
        assert_eq!(compressed.node(ab).dims, vec![4.0, 4.0, 2.0, 2.0]);
        assert_approx_eq!(f64, compressed.node(ab).size, 64.0);
        assert_approx_eq!(f64, compressed.node(ab).flops, 8.0 * 8.0 * 8.0 * 4.0);
        assert_approx_eq!(f64, compressed.node(ab).truncation, 256.0 * 4.0);

        // the contraction with the next tensor only sees the capped bond
        let abc = compressed.insert(ab, 2).unwrap();
        assert_approx_eq!(f64, compressed.node(abc).flops, 4.0 * 4.0 * 8.0 * 8.0);
        assert!(compressed.total_cost() > compressed.total_flops());
        assert!(compressed.max_size() < compressed.tree().max_size());
    }

    #[test]
    fn test_insert_with_cap_overrides_default() {
        let graph = ring();
        let mut compressed = ContractionTreeCompressed::new(&graph, 4);
        let ab = compressed.insert_with_cap(0, 1, 2.0).unwrap();
        assert_eq!(compressed.bond_cap(ab), Some(2.0));
        assert_eq!(compressed.node(ab).dims, vec![2.0, 2.0, 2.0, 2.0]);
        assert_eq!(
            compressed.insert(0, 2).unwrap_err().kind(),
            ErrorKind::InvalidMerge
        );
    }
}
