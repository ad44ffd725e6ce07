use itertools::Itertools;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::paths::greedy::{greedy_contract, join_remaining, mirror, GreedyOptions};
use crate::error::Result;
use crate::hypergraph::partitioning::PartitionOracle;
use crate::hypergraph::{HyperGraph, NodeId};

use super::{not_searched, FindPath};

/// Options of the [`PartitionGreedy`] path finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionGreedyOptions {
    /// Parts with at most this many nodes are not split further.
    pub cutoff: usize,
    /// Allowed relative deviation from an even split, passed to the oracle.
    pub imbalance: f64,
    /// Options of the greedy search inside every part.
    pub greedy: GreedyOptions,
}

impl Default for PartitionGreedyOptions {
    fn default() -> Self {
        Self {
            cutoff: 10,
            imbalance: 0.2,
            greedy: GreedyOptions::default(),
        }
    }
}

/// Recursively bisects the problem with a [`PartitionOracle`] until parts are
/// small, contracts every part greedily and then combines the parts bottom-up.
pub struct PartitionGreedy<'a> {
    graph: &'a HyperGraph,
    oracle: &'a dyn PartitionOracle,
    options: PartitionGreedyOptions,
    best_tree: Option<ContractionTree>,
}

impl<'a> PartitionGreedy<'a> {
    pub fn new(
        graph: &'a HyperGraph,
        oracle: &'a dyn PartitionOracle,
        options: PartitionGreedyOptions,
    ) -> Self {
        Self {
            graph,
            oracle,
            options,
            best_tree: None,
        }
    }

    /// Contracts the nodes of one part and returns the nodes that are left of it.
    fn contract_part<R: Rng + ?Sized>(
        &self,
        graph: &mut HyperGraph,
        tree: &mut ContractionTree,
        nodes: Vec<NodeId>,
        depth: usize,
        rng: &mut R,
    ) -> Result<Vec<NodeId>> {
        let nodes = if nodes.len() > self.options.cutoff.max(1) {
            let (left, right) = self
                .oracle
                .partition(graph, &nodes, self.options.imbalance)?;
            if left.is_empty() || right.is_empty() {
                debug!(depth, size = nodes.len(); "Partition oracle returned an empty part");
                nodes
            } else {
                debug!(depth, left = left.len(), right = right.len(); "Bisected part");
                let mut merged = self.contract_part(graph, tree, left, depth + 1, rng)?;
                merged.extend(self.contract_part(graph, tree, right, depth + 1, rng)?);
                merged
            }
        } else {
            nodes
        };

        let first_new = graph.next_id();
        greedy_contract(graph, tree, Some(&nodes), &self.options.greedy, rng)?;
        Ok(nodes
            .into_iter()
            .chain(first_new..graph.next_id())
            .filter(|&node| graph.contains(node))
            .sorted()
            .collect())
    }
}

impl FindPath for PartitionGreedy<'_> {
    fn find_path(&mut self) -> Result<()> {
        let mut graph = self.graph.pristine();
        let mut tree = ContractionTree::new(&graph);
        if self.options.greedy.simplify {
            let path = graph.simplify()?;
            mirror(&mut tree, &path)?;
        }
        let mut rng = StdRng::seed_from_u64(self.options.greedy.seed);
        let nodes = graph.nodes();
        self.contract_part(&mut graph, &mut tree, nodes, 0, &mut rng)?;
        join_remaining(&mut graph, &mut tree, self.options.greedy.join_disconnected)?;
        self.best_tree = Some(tree);
        Ok(())
    }

    fn best_tree(&self) -> Option<&ContractionTree> {
        self.best_tree.as_ref()
    }

    fn take_best_tree(&mut self) -> Result<ContractionTree> {
        self.best_tree.take().ok_or_else(not_searched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    use crate::contractionpath::paths::greedy::Greedy;
    use crate::hypergraph::partitioning::BfsBisector;

    /// Two rings of six nodes, joined by a single index.
    fn dumbbell() -> HyperGraph {
        let mut inputs = Vec::new();
        for offset in [0, 6] {
            for i in 0..6 {
                inputs.push(vec![offset + i, offset + (i + 1) % 6]);
            }
        }
        inputs[0].push(12);
        inputs[6].push(12);
        let mut sizes = (0..12).map(|i| (i, 4)).collect::<FxHashMap<_, _>>();
        sizes.insert(12, 2);
        HyperGraph::build(inputs, vec![], sizes).unwrap()
    }

    struct Lopsided;

    impl PartitionOracle for Lopsided {
        fn partition(
            &self,
            _graph: &HyperGraph,
            nodes: &[NodeId],
            _imbalance: f64,
        ) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
            Ok((nodes.to_vec(), Vec::new()))
        }
    }

    #[test]
    fn test_partitioned_is_complete() {
        let graph = dumbbell();
        let mut finder = PartitionGreedy::new(
            &graph,
            &BfsBisector,
            PartitionGreedyOptions {
                cutoff: 3,
                ..Default::default()
            },
        );
        finder.find_path().unwrap();
        let tree = finder.best_tree().unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.len(), 2 * 12 - 1);
        // the rings are contracted before the bridge
        let root = tree.root().unwrap();
        let (a, b) = tree.children(root).unwrap();
        let mut halves = [tree.leaves_of(a), tree.leaves_of(b)];
        halves.sort();
        assert_eq!(halves[0], (0..6).collect::<Vec<_>>());
        assert_eq!(halves[1], (6..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_large_cutoff_is_greedy() {
        let graph = dumbbell();
        let mut finder = PartitionGreedy::new(
            &graph,
            &BfsBisector,
            PartitionGreedyOptions {
                cutoff: 12,
                ..Default::default()
            },
        );
        finder.find_path().unwrap();
        let mut greedy = Greedy::new(&graph, GreedyOptions::default());
        greedy.find_path().unwrap();
        assert_eq!(finder.get_best_path(), greedy.get_best_path());
    }

    #[test]
    fn test_degenerate_oracle() {
        let graph = dumbbell();
        let mut finder = PartitionGreedy::new(
            &graph,
            &Lopsided,
            PartitionGreedyOptions {
                cutoff: 2,
                ..Default::default()
            },
        );
        finder.find_path().unwrap();
        assert!(finder.best_tree().unwrap().is_complete());
    }
}
