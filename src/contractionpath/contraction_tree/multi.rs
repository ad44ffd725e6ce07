//! Several contraction trees over the same inputs, one per requested output, that
//! share identical intermediates.

use rustc_hash::FxHashMap;

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::paths::greedy::{Greedy, GreedyOptions};
use crate::contractionpath::paths::FindPath;
use crate::error::{Error, Result};
use crate::hypergraph::{EdgeIndex, HyperGraph, NodeId};

/// Identifies an intermediate independently of the tree it lives in: the leaves
/// it spans and the legs it keeps.
type IntermediateKey = (Vec<NodeId>, Vec<EdgeIndex>);

#[derive(Debug, Clone)]
struct Shared {
    flops: f64,
    size: f64,
    uses: usize,
}

/// A set of contraction trees computing different outputs of the same inputs.
///
/// An intermediate that appears in more than one tree (same leaves, same legs) is
/// only computed once, so the totals count it once.
#[derive(Debug, Clone)]
pub struct ContractionTreeMulti {
    trees: Vec<ContractionTree>,
    intermediates: FxHashMap<IntermediateKey, Shared>,
    flops: f64,
    write: f64,
}

impl ContractionTreeMulti {
    /// Creates empty trees for each of `outputs` over the inputs of `graph`.
    pub fn new(graph: &HyperGraph, outputs: &[Vec<EdgeIndex>]) -> Result<Self> {
        let trees = outputs
            .iter()
            .map(|output| Ok(ContractionTree::new(&graph.with_output(output.clone())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::empty(trees))
    }

    fn empty(trees: Vec<ContractionTree>) -> Self {
        Self {
            trees,
            intermediates: FxHashMap::default(),
            flops: 0.0,
            write: 0.0,
        }
    }

    /// Combines already built trees. All trees must be over the same inputs.
    pub fn from_trees(trees: Vec<ContractionTree>) -> Result<Self> {
        if let Some(first) = trees.first() {
            let inputs = first.problem().inputs();
            if trees[1..]
                .iter()
                .any(|tree| tree.problem().inputs() != inputs)
            {
                return Err(Error::malformed(
                    "all trees of a multi-output contraction must share their inputs",
                ));
            }
        }
        let mut multi = Self::empty(trees);
        for which in 0..multi.trees.len() {
            for id in multi.trees[which].num_leaves()..multi.trees[which].len() {
                multi.register(which, id);
            }
        }
        Ok(multi)
    }

    /// Builds every tree with the greedy heuristic.
    pub fn greedy(
        graph: &HyperGraph,
        outputs: &[Vec<EdgeIndex>],
        options: &GreedyOptions,
    ) -> Result<Self> {
        let mut trees = Vec::with_capacity(outputs.len());
        for output in outputs {
            let graph = graph.with_output(output.clone())?;
            let mut greedy = Greedy::new(&graph, options.clone());
            greedy.find_path()?;
            trees.push(greedy.take_best_tree()?);
        }
        Self::from_trees(trees)
    }

    /// Merges `a` and `b` in the tree for output number `which`.
    pub fn insert(&mut self, which: usize, a: NodeId, b: NodeId) -> Result<NodeId> {
        let Some(tree) = self.trees.get_mut(which) else {
            return Err(Error::InvalidMerge { a, b });
        };
        let id = tree.insert(a, b)?;
        self.register(which, id);
        Ok(id)
    }

    fn register(&mut self, which: usize, id: NodeId) {
        let tree = &self.trees[which];
        let key = (tree.leaves_of(id), tree.legs(id).to_vec());
        let node = tree.node(id);
        let shared = self.intermediates.entry(key).or_insert_with(|| Shared {
            flops: node.flops(),
            size: node.size(),
            uses: 0,
        });
        if shared.uses == 0 {
            self.flops += shared.flops;
            self.write += shared.size;
        }
        shared.uses += 1;
    }

    #[inline]
    pub fn trees(&self) -> &[ContractionTree] {
        &self.trees
    }

    #[inline]
    pub fn tree(&self, which: usize) -> &ContractionTree {
        &self.trees[which]
    }

    /// Whether every tree is complete.
    pub fn is_complete(&self) -> bool {
        self.trees.iter().all(ContractionTree::is_complete)
    }

    /// Operations over all trees, counting shared intermediates once.
    #[inline]
    pub fn total_flops(&self) -> f64 {
        self.flops
    }

    /// Written elements over all trees, counting shared intermediates once.
    #[inline]
    pub fn total_write(&self) -> f64 {
        self.write
    }

    /// Number of distinct intermediates used by more than one tree.
    pub fn num_shared(&self) -> usize {
        self.intermediates
            .values()
            .filter(|shared| shared.uses > 1)
            .count()
    }
}
