//! Arena based contraction trees with incrementally maintained costs.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;
use rustc_hash::FxHasher;

use crate::contractionpath::contraction_cost::{
    contract_cost_legs, log2_cost, sliced_legs_size, Objective,
};
use crate::contractionpath::{
    ssa_to_linear, ssa_to_replace, validate_ssa_path, SimplePath, SimplePathRef,
};
use crate::error::{Error, Result};
use crate::hypergraph::{EdgeIndex, HyperGraph, NodeId, Problem};

pub mod compressed;
pub mod multi;
mod node;

pub use node::Node;

/// Order in which [`ContractionTree::traverse`] yields internal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// The order in which contractions were inserted, i.e. SSA order.
    #[default]
    Insertion,
    /// Depth first, left child before right child, children before parents.
    PostOrder,
}

/// A (possibly partial) binary contraction tree over the inputs of a problem.
///
/// Nodes live in an arena: leaves are `0..n` and every [`ContractionTree::insert`]
/// appends a new internal node, so node ids coincide with SSA path ids. Per-node
/// costs and the aggregates over the whole tree are kept up to date on every insert.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::contraction_tree::ContractionTree;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let mut tree = ContractionTree::new(&graph);
/// let ab = tree.insert(0, 1).unwrap();
/// tree.insert(ab, 2).unwrap();
/// assert!(tree.is_complete());
/// assert_eq!(tree.total_flops(), 40.0);
/// ```
#[derive(Debug, Clone)]
pub struct ContractionTree {
    problem: Arc<Problem>,
    nodes: Vec<Node>,
    sliced: Vec<EdgeIndex>,
    multiplicity: f64,
    num_roots: usize,
    /// Total size of the live tensors after the last inserted contraction.
    live_size: f64,
    peak: f64,
    /// Aggregates per slice.
    flops: f64,
    write: f64,
    max_size: f64,
}

impl ContractionTree {
    /// Creates a tree consisting only of the leaves of `graph`'s problem.
    pub fn new(graph: &HyperGraph) -> Self {
        Self::from_problem(Arc::clone(graph.problem()))
    }

    pub(crate) fn from_problem(problem: Arc<Problem>) -> Self {
        let nodes = problem
            .inputs()
            .iter()
            .map(|legs| Node::leaf(legs.clone(), problem.legs_size(legs)))
            .collect_vec();
        let live_size = nodes.iter().map(Node::size).sum();
        Self {
            num_roots: nodes.len(),
            problem,
            nodes,
            sliced: Vec::new(),
            multiplicity: 1.0,
            live_size,
            peak: live_size,
            flops: 0.0,
            write: 0.0,
            max_size: 0.0,
        }
    }

    /// Creates a complete or partial tree from a path in SSA format.
    pub fn from_path(graph: &HyperGraph, path: SimplePathRef) -> Result<Self> {
        validate_ssa_path(path, graph.num_inputs())?;
        let mut tree = Self::new(graph);
        for &(a, b) in path {
            tree.insert(a, b)?;
        }
        Ok(tree)
    }

    #[inline]
    pub fn problem(&self) -> &Arc<Problem> {
        &self.problem
    }

    /// Number of nodes, leaves included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.problem.num_inputs()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn legs(&self, id: NodeId) -> &[EdgeIndex] {
        &self.nodes[id].legs
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    #[inline]
    pub fn children(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        self.nodes[id].children
    }

    /// All unparented nodes, sorted.
    pub fn roots(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| self.nodes[id].is_root())
            .collect()
    }

    /// The root if the tree has been contracted into a single node.
    pub fn root(&self) -> Option<NodeId> {
        if self.num_roots == 1 {
            (0..self.nodes.len()).rev().find(|&id| self.nodes[id].is_root())
        } else {
            None
        }
    }

    #[inline]
    pub fn num_roots(&self) -> usize {
        self.num_roots
    }

    /// The indices the tensor at `id` keeps once indices appearing nowhere else are
    /// summed out. Differs from [`Self::legs`] only for leaves.
    pub fn result_legs(&self, id: NodeId) -> Vec<EdgeIndex> {
        let node = &self.nodes[id];
        node.legs
            .iter()
            .zip(&node.counts)
            .filter(|&(&ix, &count)| count < self.problem.appearances(ix))
            .map(|(&ix, _)| ix)
            .collect()
    }

    /// Whether a single root spans all inputs and carries exactly the output indices.
    pub fn is_complete(&self) -> bool {
        let Some(root) = self.root() else {
            return false;
        };
        let output = self.problem.output().iter().copied().sorted().collect_vec();
        self.result_legs(root) == output
    }

    /// Merges the two roots `a` and `b` under a new internal node and returns its id.
    ///
    /// Fails with [`Error::InvalidMerge`] if `a` and `b` are not two distinct,
    /// currently unparented nodes of this tree.
    pub fn insert(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let n = self.nodes.len();
        if a == b || a >= n || b >= n || !self.nodes[a].is_root() || !self.nodes[b].is_root() {
            return Err(Error::InvalidMerge { a, b });
        }

        let (legs, counts) = self.merged_legs(a, b);
        let mut node = Node::internal(
            legs,
            counts,
            (a, b),
            self.nodes[a].num_leaves + self.nodes[b].num_leaves,
        );
        self.compute_local(&mut node);
        self.compute_aggregates(&mut node);

        let id = n;
        let freed = self.nodes[a].size + self.nodes[b].size;
        self.nodes[a].parent = Some(id);
        self.nodes[b].parent = Some(id);

        self.flops += node.flops;
        self.write += node.size;
        self.max_size = self.max_size.max(node.size);
        self.peak = self.peak.max(self.live_size + node.size);
        self.live_size += node.size - freed;
        self.num_roots -= 1;
        self.nodes.push(node);
        Ok(id)
    }

    /// Union of the children's legs, dropping every index whose occurrences are
    /// now all below the new node.
    fn merged_legs(&self, a: NodeId, b: NodeId) -> (Vec<EdgeIndex>, Vec<u32>) {
        let (left, right) = (&self.nodes[a], &self.nodes[b]);
        let mut legs = Vec::with_capacity(left.legs.len() + right.legs.len());
        let mut counts = Vec::with_capacity(legs.capacity());
        let (mut i, mut j) = (0, 0);
        loop {
            let (ix, count) = match (left.legs.get(i), right.legs.get(j)) {
                (Some(&x), Some(&y)) if x == y => {
                    let count = left.counts[i] + right.counts[j];
                    i += 1;
                    j += 1;
                    (x, count)
                }
                (Some(&x), Some(&y)) if x < y => {
                    i += 1;
                    (x, left.counts[i - 1])
                }
                (Some(&x), None) => {
                    i += 1;
                    (x, left.counts[i - 1])
                }
                (_, Some(&y)) => {
                    j += 1;
                    (y, right.counts[j - 1])
                }
                (None, None) => break,
            };
            if count < self.problem.appearances(ix) {
                legs.push(ix);
                counts.push(count);
            }
        }
        (legs, counts)
    }

    /// Recomputes size and flops of `node` from its legs and children.
    fn compute_local(&self, node: &mut Node) {
        node.size = sliced_legs_size(&self.problem, &node.legs, &self.sliced);
        node.flops = match node.children {
            Some((a, b)) => contract_cost_legs(
                &self.problem,
                &self.nodes[a].legs,
                &self.nodes[b].legs,
                &self.sliced,
            ),
            None => 0.0,
        };
    }

    /// Recomputes the subtree aggregates of `node` from its children.
    fn compute_aggregates(&self, node: &mut Node) {
        if let Some((a, b)) = node.children {
            let (left, right) = (&self.nodes[a], &self.nodes[b]);
            node.subtree_flops = left.subtree_flops + right.subtree_flops + node.flops;
            node.subtree_write = left.subtree_write + right.subtree_write + node.size;
            node.subtree_max_size = left
                .subtree_max_size
                .max(right.subtree_max_size)
                .max(node.size);
        }
    }

    /// Total number of operations, including the repeats caused by slicing.
    #[inline]
    pub fn total_flops(&self) -> f64 {
        self.multiplicity * self.flops
    }

    /// Total number of written elements, including the repeats caused by slicing.
    #[inline]
    pub fn total_write(&self) -> f64 {
        self.multiplicity * self.write
    }

    /// Peak size of the live tensor set when executing contractions in insertion
    /// order, for a single slice.
    #[inline]
    pub fn peak_size(&self) -> f64 {
        self.peak
    }

    /// Size of the largest intermediate (per slice).
    #[inline]
    pub fn max_size(&self) -> f64 {
        self.max_size
    }

    /// Operations of a single slice.
    #[inline]
    pub fn flops_per_slice(&self) -> f64 {
        self.flops
    }

    #[inline]
    pub fn log2_flops(&self) -> f64 {
        log2_cost(self.total_flops())
    }

    /// `log2` of the largest intermediate.
    #[inline]
    pub fn contraction_width(&self) -> f64 {
        log2_cost(self.max_size)
    }

    /// Number of slices, i.e. the product of the sizes of all sliced indices.
    #[inline]
    pub fn multiplicity(&self) -> f64 {
        self.multiplicity
    }

    /// The sliced indices in the order they were sliced.
    #[inline]
    pub fn sliced_indices(&self) -> &[EdgeIndex] {
        &self.sliced
    }

    /// Evaluates `objective` on this tree.
    pub fn score(&self, objective: Objective) -> f64 {
        match objective {
            Objective::Flops => self.total_flops(),
            Objective::Size => self.max_size(),
            Objective::Write => self.total_write(),
            Objective::Combo { factor } => self.total_flops() + factor * self.total_write(),
            Objective::Limit { .. } => {
                self.multiplicity
                    * self
                        .traverse(TraversalOrder::Insertion)
                        .map(|id| objective.step_cost(self.nodes[id].flops, self.nodes[id].size))
                        .sum::<f64>()
            }
            Objective::PeakMemory => self.peak_size(),
        }
    }

    /// Lazily yields the internal nodes in the given order. The tree is not
    /// modified, so the traversal can be restarted at any time.
    pub fn traverse(&self, order: TraversalOrder) -> Traversal<'_> {
        Traversal {
            tree: self,
            order,
            next: self.num_leaves(),
            stack: Vec::new(),
            roots: match order {
                TraversalOrder::Insertion => Vec::new(),
                TraversalOrder::PostOrder => self.roots(),
            },
            root_pos: 0,
        }
    }

    /// The sorted leaves below `id`.
    pub fn leaves_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut leaves = Vec::with_capacity(self.nodes[id].num_leaves);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.nodes[current].children {
                Some((a, b)) => {
                    stack.push(a);
                    stack.push(b);
                }
                None => leaves.push(current),
            }
        }
        leaves.sort_unstable();
        leaves
    }

    /// Peak size of the live tensor set when executing the internal nodes in
    /// `order`. Initially all inputs are live, every contraction adds its result
    /// and then frees its operands.
    pub fn peak_size_for<I>(&self, order: I) -> f64
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut live = self.nodes[..self.num_leaves()]
            .iter()
            .map(Node::size)
            .sum::<f64>();
        let mut peak = live;
        for id in order {
            let node = &self.nodes[id];
            if let Some((a, b)) = node.children {
                peak = peak.max(live + node.size);
                live += node.size - self.nodes[a].size - self.nodes[b].size;
            }
        }
        peak
    }

    /// The contractions of this tree in SSA format, in insertion order.
    pub fn ssa_path(&self) -> SimplePath {
        self.traverse(TraversalOrder::Insertion)
            .filter_map(|id| self.nodes[id].children)
            .collect()
    }

    /// The contractions in replace-left format.
    pub fn replace_path(&self) -> SimplePath {
        ssa_to_replace(&self.ssa_path(), self.num_leaves())
    }

    /// The contractions in the linear format of `opt_einsum`.
    pub fn linear_path(&self) -> SimplePath {
        ssa_to_linear(&self.ssa_path(), self.num_leaves())
    }

    /// Structural hash of the tree that ignores node ids and the order of
    /// independent contractions. Leaves are identified by their indices, internal
    /// nodes by the unordered pair of their children's hashes.
    pub fn canonical_hash(&self) -> u64 {
        let mut hashes: Vec<u64> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut hasher = FxHasher::default();
            match node.children {
                None => {
                    0u8.hash(&mut hasher);
                    for &ix in &node.legs {
                        (ix, self.problem.size(ix)).hash(&mut hasher);
                    }
                }
                Some((a, b)) => {
                    let (ha, hb) = (hashes[a], hashes[b]);
                    1u8.hash(&mut hasher);
                    ha.min(hb).hash(&mut hasher);
                    ha.max(hb).hash(&mut hasher);
                    node.legs.hash(&mut hasher);
                }
            }
            hashes.push(hasher.finish());
        }

        let mut hasher = FxHasher::default();
        self.roots()
            .into_iter()
            .map(|root| hashes[root])
            .sorted()
            .collect_vec()
            .hash(&mut hasher);
        self.sliced.iter().sorted().collect_vec().hash(&mut hasher);
        hasher.finish()
    }

    /// Removes index `ix` from every tensor and loops over it externally instead.
    /// Only indices that are summed over, i.e. not part of the output, can be
    /// sliced.
    pub fn slice_index(&mut self, ix: EdgeIndex) -> Result<()> {
        if !self.problem.has_index(ix) {
            return Err(Error::malformed(format!("index {ix} is not part of the problem")));
        }
        if self.problem.is_output(ix) {
            return Err(Error::malformed(format!("output index {ix} cannot be sliced")));
        }
        if self.sliced.contains(&ix) {
            return Err(Error::malformed(format!("index {ix} is already sliced")));
        }

        self.sliced.push(ix);
        self.multiplicity *= self.problem.size(ix) as f64;

        let affected = (0..self.nodes.len())
            .filter(|&id| {
                let node = &self.nodes[id];
                node.legs.binary_search(&ix).is_ok()
                    || node.children.is_some_and(|(a, b)| {
                        self.nodes[a].legs.binary_search(&ix).is_ok()
                            || self.nodes[b].legs.binary_search(&ix).is_ok()
                    })
            })
            .collect_vec();
        for &id in &affected {
            let mut node = self.nodes[id].clone();
            self.compute_local(&mut node);
            self.nodes[id] = node;
        }
        self.update_ancestors(&affected);
        self.refresh_totals();
        Ok(())
    }

    /// Recomputes the aggregates of `affected` nodes and all their ancestors, each
    /// exactly once, children first.
    fn update_ancestors(&mut self, affected: &[NodeId]) {
        let mut dirty = BTreeSet::new();
        for &id in affected {
            let mut current = Some(id);
            while let Some(node) = current {
                if !dirty.insert(node) {
                    break;
                }
                current = self.nodes[node].parent;
            }
        }
        // parents are always created after their children
        for id in dirty {
            let mut node = self.nodes[id].clone();
            self.compute_aggregates(&mut node);
            self.nodes[id] = node;
        }
    }

    fn refresh_totals(&mut self) {
        let roots = self.roots();
        self.flops = roots.iter().map(|&r| self.nodes[r].subtree_flops).sum();
        self.write = roots.iter().map(|&r| self.nodes[r].subtree_write).sum();
        self.max_size = roots
            .iter()
            .map(|&r| self.nodes[r].subtree_max_size)
            .fold(0.0, f64::max);
        self.live_size = roots.iter().map(|&r| self.nodes[r].size).sum();
        self.peak = self.peak_size_for(self.num_leaves()..self.nodes.len());
    }
}

/// Lazy iterator over the internal nodes of a [`ContractionTree`], see
/// [`ContractionTree::traverse`].
#[derive(Debug, Clone)]
pub struct Traversal<'a> {
    tree: &'a ContractionTree,
    order: TraversalOrder,
    next: NodeId,
    stack: Vec<(NodeId, bool)>,
    roots: Vec<NodeId>,
    root_pos: usize,
}

impl Iterator for Traversal<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        match self.order {
            TraversalOrder::Insertion => {
                let id = self.next;
                if id < self.tree.nodes.len() {
                    self.next += 1;
                    Some(id)
                } else {
                    None
                }
            }
            TraversalOrder::PostOrder => loop {
                if let Some((id, expanded)) = self.stack.pop() {
                    let Some((a, b)) = self.tree.nodes[id].children else {
                        continue;
                    };
                    if expanded {
                        return Some(id);
                    }
                    self.stack.push((id, true));
                    self.stack.push((b, false));
                    self.stack.push((a, false));
                } else if self.root_pos < self.roots.len() {
                    self.stack.push((self.roots[self.root_pos], false));
                    self.root_pos += 1;
                } else {
                    return None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::error::ErrorKind;
    use crate::path;

    fn chain() -> HyperGraph {
        let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
        HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap()
    }

    fn setup_complex() -> HyperGraph {
        HyperGraph::build(
            vec![
                vec![4, 3, 2],
                vec![0, 1, 3, 2],
                vec![4, 5, 6],
                vec![6, 8, 9],
                vec![10, 8, 9],
                vec![5, 1, 0],
            ],
            vec![10],
            FxHashMap::from_iter([
                (0, 27),
                (1, 18),
                (2, 12),
                (3, 15),
                (4, 5),
                (5, 3),
                (6, 18),
                (8, 45),
                (9, 65),
                (10, 5),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_costs() {
        let graph = chain();
        let mut tree = ContractionTree::new(&graph);
        assert_eq!(tree.num_roots(), 3);
        assert_approx_eq!(f64, tree.peak_size(), 26.0);

        let ab = tree.insert(0, 1).unwrap();
        assert_eq!(ab, 3);
        assert_eq!(tree.legs(ab), &[0, 2]);
        assert_approx_eq!(f64, tree.node(ab).flops(), 24.0);
        assert_approx_eq!(f64, tree.node(ab).size(), 8.0);
        assert_approx_eq!(f64, tree.peak_size(), 34.0);
        assert!(!tree.is_complete());

        let abc = tree.insert(ab, 2).unwrap();
        assert_eq!(tree.legs(abc), &[0, 3]);
        assert!(tree.is_complete());
        assert_eq!(tree.root(), Some(abc));
        assert_approx_eq!(f64, tree.total_flops(), 40.0);
        assert_approx_eq!(f64, tree.total_write(), 12.0);
        assert_approx_eq!(f64, tree.max_size(), 8.0);
        assert_approx_eq!(f64, tree.peak_size(), 34.0);
        assert_approx_eq!(f64, tree.node(abc).subtree_flops(), 40.0);
        assert_eq!(tree.node(abc).num_leaves(), 3);
    }

    #[test]
    fn test_insert_invalid_merge() {
        let graph = chain();
        let mut tree = ContractionTree::new(&graph);
        let ab = tree.insert(0, 1).unwrap();
        for (a, b) in [(0, 2), (ab, ab), (2, 7)] {
            assert_eq!(tree.insert(a, b).unwrap_err().kind(), ErrorKind::InvalidMerge);
        }
        // failed inserts leave the tree untouched
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots(), vec![2, 3]);
    }

    #[test]
    fn test_from_path_complex() {
        let graph = setup_complex();
        let tree =
            ContractionTree::from_path(&graph, &path![(1, 5), (0, 6), (2, 7), (3, 8), (4, 9)])
                .unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.ssa_path(), path![(1, 5), (0, 6), (2, 7), (3, 8), (4, 9)]);
        assert_eq!(
            tree.replace_path(),
            path![(1, 5), (0, 1), (2, 0), (3, 2), (4, 3)]
        );
        assert_eq!(tree.linear_path().len(), 5);
        assert_eq!(tree.leaves_of(8), vec![0, 1, 2, 5]);

        let err = ContractionTree::from_path(&graph, &path![(1, 5), (1, 6)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_traverse_is_lazy_and_restartable() {
        let graph = setup_complex();
        let tree =
            ContractionTree::from_path(&graph, &path![(0, 1), (2, 3), (4, 5), (6, 7), (8, 9)])
                .unwrap();
        let insertion = tree.traverse(TraversalOrder::Insertion).collect_vec();
        assert_eq!(insertion, vec![6, 7, 8, 9, 10]);

        let mut post = tree.traverse(TraversalOrder::PostOrder);
        assert_eq!(post.next(), Some(8));
        let rest = post.collect_vec();
        assert_eq!(rest, vec![6, 7, 9, 10]);
        // a second traversal starts over
        assert_eq!(
            tree.traverse(TraversalOrder::PostOrder).collect_vec(),
            vec![8, 6, 7, 9, 10]
        );
    }

    #[test]
    fn test_peak_depends_on_order() {
        let graph = setup_complex();
        let tree =
            ContractionTree::from_path(&graph, &path![(0, 1), (2, 3), (4, 5), (6, 7), (8, 9)])
                .unwrap();
        let insertion = tree.peak_size_for(tree.traverse(TraversalOrder::Insertion));
        assert_approx_eq!(f64, insertion, tree.peak_size());
        let post = tree.peak_size_for(tree.traverse(TraversalOrder::PostOrder));
        assert!(post >= tree.max_size());
        let leaves = (0..tree.num_leaves()).map(|id| tree.node(id).size()).sum::<f64>();
        assert!(tree.peak_size() >= leaves);
    }

    #[test]
    fn test_canonical_hash() {
        let graph = chain();
        let a = ContractionTree::from_path(&graph, &path![(0, 1), (3, 2)]).unwrap();
        let b = ContractionTree::from_path(&graph, &path![(1, 0), (2, 3)]).unwrap();
        let c = ContractionTree::from_path(&graph, &path![(1, 2), (0, 3)]).unwrap();
        assert_eq!(a.canonical_hash(), b.canonical_hash());
        assert_ne!(a.canonical_hash(), c.canonical_hash());

        // relabeling the inputs yields the same structure
        let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
        let permuted = HyperGraph::from_equation("kl,ij,jk->il", &sizes).unwrap();
        let d = ContractionTree::from_path(&permuted, &path![(1, 2), (3, 0)]).unwrap();
        assert_eq!(a.canonical_hash(), d.canonical_hash());
    }

    #[test]
    fn test_canonical_hash_independent_subtrees() {
        let graph = setup_complex();
        let a = ContractionTree::from_path(&graph, &path![(0, 1), (2, 3), (6, 7)]).unwrap();
        let b = ContractionTree::from_path(&graph, &path![(2, 3), (0, 1), (7, 6)]).unwrap();
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn test_slice_index() {
        let graph = chain();
        let mut tree = ContractionTree::from_path(&graph, &path![(0, 1), (3, 2)]).unwrap();
        let flops = tree.total_flops();
        let peak = tree.peak_size();

        // slice k (size 4)
        tree.slice_index(2).unwrap();
        assert_eq!(tree.sliced_indices(), &[2]);
        assert_approx_eq!(f64, tree.multiplicity(), 4.0);
        assert_approx_eq!(f64, tree.flops_per_slice(), 6.0 + 4.0);
        assert_approx_eq!(f64, tree.total_flops(), 40.0);
        assert!(tree.total_flops() >= flops);
        assert!(tree.peak_size() < peak);
        assert_approx_eq!(f64, tree.node(3).size(), 2.0);
        assert_approx_eq!(f64, tree.node(4).subtree_flops(), 10.0);

        assert_eq!(tree.slice_index(2).unwrap_err().kind(), ErrorKind::MalformedProblem);
        assert_eq!(tree.slice_index(0).unwrap_err().kind(), ErrorKind::MalformedProblem);
    }

    #[test]
    fn test_score() {
        let graph = chain();
        let tree = ContractionTree::from_path(&graph, &path![(0, 1), (3, 2)]).unwrap();
        assert_approx_eq!(f64, tree.score(Objective::Flops), 40.0);
        assert_approx_eq!(f64, tree.score(Objective::Size), 8.0);
        assert_approx_eq!(f64, tree.score(Objective::Write), 12.0);
        assert_approx_eq!(f64, tree.score(Objective::Combo { factor: 2.0 }), 64.0);
        // max(24, 16) + max(16, 8)
        assert_approx_eq!(f64, tree.score(Objective::Limit { factor: 2.0 }), 40.0);
        assert_approx_eq!(f64, tree.score(Objective::PeakMemory), 34.0);
    }

    #[test]
    fn test_single_input_reduces_dangling() {
        let graph = HyperGraph::build(
            vec![vec![0, 1]],
            vec![0],
            FxHashMap::from_iter([(0, 2), (1, 3)]),
        )
        .unwrap();
        let tree = ContractionTree::new(&graph);
        assert!(tree.is_complete());
        assert_eq!(tree.result_legs(0), vec![0]);
        assert!(tree.ssa_path().is_empty());
        assert_approx_eq!(f64, tree.total_flops(), 0.0);
    }

    #[test]
    fn test_clone_is_independent() {
        let graph = chain();
        let mut tree = ContractionTree::new(&graph);
        tree.insert(0, 1).unwrap();
        let snapshot = tree.clone();
        tree.insert(3, 2).unwrap();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.num_roots(), 2);
        assert!(tree.is_complete());
    }
}
