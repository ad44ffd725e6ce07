use std::collections::BinaryHeap;

use itertools::Itertools;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::contractionpath::candidates::Candidate;
use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::SimplePathRef;
use crate::error::{Error, Result};
use crate::hypergraph::{HyperGraph, NodeId};

use super::{not_searched, FindPath};

/// Options of the [`Greedy`] path finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyOptions {
    /// Weight of the removed operand sizes in the score
    /// `size(ab) - costmod * (size(a) + size(b))`.
    pub costmod: f64,
    /// Weight of the contraction flops added to the score.
    pub flops_weight: f64,
    /// Scale of the random jitter. Zero gives a deterministic search.
    pub temperature: f64,
    pub seed: u64,
    /// Run the scalar and Hadamard pre-simplifications first.
    pub simplify: bool,
    /// Join disconnected components by size instead of failing.
    pub join_disconnected: bool,
}

impl Default for GreedyOptions {
    fn default() -> Self {
        Self {
            costmod: 1.0,
            flops_weight: 0.0,
            temperature: 0.0,
            seed: 0,
            simplify: true,
            join_disconnected: true,
        }
    }
}

/// Greedy path finder that always performs the locally best pairwise contraction.
///
/// Candidate pairs are kept in a priority queue. After a merge only the pairs of
/// the new node with its neighbors are scored and pushed; entries referring to
/// consumed nodes are skipped when popped.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::paths::greedy::{Greedy, GreedyOptions};
/// # use tnc_paths::contractionpath::paths::FindPath;
/// # use tnc_paths::path;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let mut greedy = Greedy::new(&graph, GreedyOptions::default());
/// greedy.find_path().unwrap();
/// assert_eq!(greedy.get_best_path(), path![(1, 2), (0, 3)]);
/// assert_eq!(greedy.get_best_flops(), 36.0);
/// ```
pub struct Greedy<'a> {
    graph: &'a HyperGraph,
    options: GreedyOptions,
    best_tree: Option<ContractionTree>,
}

impl<'a> Greedy<'a> {
    pub fn new(graph: &'a HyperGraph, options: GreedyOptions) -> Self {
        Self {
            graph,
            options,
            best_tree: None,
        }
    }
}

impl FindPath for Greedy<'_> {
    fn find_path(&mut self) -> Result<()> {
        let mut graph = self.graph.pristine();
        let mut tree = ContractionTree::new(&graph);
        if self.options.simplify {
            let path = graph.simplify()?;
            mirror(&mut tree, &path)?;
        }
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        greedy_contract(&mut graph, &mut tree, None, &self.options, &mut rng)?;
        join_remaining(&mut graph, &mut tree, self.options.join_disconnected)?;
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

/// Repeats merges already performed on a graph in `tree`. Graph and tree hand out
/// ids in the same order, so SSA ids carry over unchanged.
pub(crate) fn mirror(tree: &mut ContractionTree, path: SimplePathRef) -> Result<()> {
    for &(a, b) in path {
        tree.insert(a, b)?;
    }
    Ok(())
}

/// Maps the raw greedy score through a signed logarithm and subtracts a uniform
/// jitter, so that the temperature acts on relative rather than absolute scores.
fn perturb<R: Rng + ?Sized>(score: f64, temperature: f64, rng: &mut R) -> f64 {
    let scaled = if score > 0.0 {
        score.ln_1p()
    } else if score < 0.0 {
        -(-score).ln_1p()
    } else {
        0.0
    };
    scaled - temperature * rng.gen::<f64>()
}

fn score_pair<R: Rng + ?Sized>(
    graph: &HyperGraph,
    a: NodeId,
    b: NodeId,
    options: &GreedyOptions,
    rng: &mut R,
) -> Result<Candidate> {
    let cost = graph.cost_of_contraction(a, b)?;
    let mut score = cost.memory - options.costmod * (graph.node_size(a) + graph.node_size(b))
        + options.flops_weight * cost.flops;
    if options.temperature > 0.0 {
        score = perturb(score, options.temperature, rng);
    }
    Ok(Candidate::new(score, cost.flops, a, b))
}

/// Greedily contracts connected pairs of `graph`, mirroring every merge in `tree`.
///
/// If `group` is given, only nodes of that group (and the nodes created from them)
/// are considered. Stops when no connected pair is left; disconnected leftovers are
/// not joined.
pub(crate) fn greedy_contract<R: Rng + ?Sized>(
    graph: &mut HyperGraph,
    tree: &mut ContractionTree,
    group: Option<&[NodeId]>,
    options: &GreedyOptions,
    rng: &mut R,
) -> Result<NodeId> {
    let mut members: Option<FxHashSet<NodeId>> =
        group.map(|nodes| nodes.iter().copied().collect());
    let allowed = |members: &Option<FxHashSet<NodeId>>, node: NodeId| {
        members
            .as_ref()
            .map_or(true, |members| members.contains(&node))
    };

    let nodes = match group {
        Some(nodes) => nodes.to_vec(),
        None => graph.nodes(),
    };
    let mut seen = FxHashSet::default();
    let mut queue = BinaryHeap::new();
    for &a in &nodes {
        for b in graph.neighbors(a) {
            if a < b && allowed(&members, b) && seen.insert((a, b)) {
                queue.push(score_pair(graph, a, b, options, rng)?);
            }
        }
    }

    let mut last = nodes.last().copied().unwrap_or_default();
    while let Some(Candidate {
        parent_ids: (a, b), ..
    }) = queue.pop()
    {
        if !graph.contains(a) || !graph.contains(b) {
            continue;
        }
        let (k, _) = graph.contract(a, b)?;
        let id = tree.insert(a, b)?;
        debug_assert_eq!(k, id, "graph and tree ids diverged");
        if let Some(members) = members.as_mut() {
            members.insert(k);
        }
        last = k;

        for l in graph.neighbors(k) {
            if allowed(&members, l) {
                queue.push(score_pair(graph, k, l, options, rng)?);
            }
        }
    }
    Ok(last)
}

/// Joins the remaining disconnected components, or fails if `join` is false and
/// more than one node is left.
pub(crate) fn join_remaining(
    graph: &mut HyperGraph,
    tree: &mut ContractionTree,
    join: bool,
) -> Result<()> {
    let remaining = graph.remaining_node_count();
    if remaining > 1 {
        if !join {
            return Err(incomplete(graph));
        }
        debug!(remaining; "Joining disconnected components by size");
        let path = graph.optimize_remaining_by_size()?;
        mirror(tree, &path)?;
    }
    if tree.is_complete() {
        Ok(())
    } else {
        Err(incomplete(graph))
    }
}

fn incomplete(graph: &HyperGraph) -> Error {
    Error::IncompleteContraction {
        remaining: graph.remaining_node_count(),
        found: graph
            .nodes()
            .into_iter()
            .flat_map(|node| graph.node_legs(node).unwrap_or_default().to_vec())
            .sorted()
            .dedup()
            .collect(),
        expected: graph.output().iter().copied().sorted().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::error::ErrorKind;
    use crate::path;

    fn setup_simple() -> HyperGraph {
        HyperGraph::build(
            vec![vec![4, 3, 2], vec![0, 1, 3, 2], vec![4, 5, 6]],
            vec![0, 1, 5, 6],
            FxHashMap::from_iter([(0, 5), (1, 2), (2, 6), (3, 8), (4, 1), (5, 3), (6, 4)]),
        )
        .unwrap()
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
    fn test_chain_finds_optimum() {
        let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
        let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
        let mut opt = Greedy::new(&graph, GreedyOptions::default());
        opt.find_path().unwrap();
        assert_eq!(opt.get_best_path(), path![(1, 2), (0, 3)]);
        assert_eq!(opt.get_best_replace_path(), path![(1, 2), (0, 1)]);
        assert_approx_eq!(f64, opt.get_best_flops(), 36.0);
        assert_approx_eq!(f64, opt.get_best_size(), 6.0);
    }

    #[test]
    fn test_contract_order_simple() {
        let graph = setup_simple();
        let mut opt = Greedy::new(&graph, GreedyOptions::default());
        opt.find_path().unwrap();
        let tree = opt.best_tree().unwrap();
        assert!(tree.is_complete());
        assert_eq!(opt.get_best_path(), path![(0, 1), (2, 3)]);
        // 1*8*6*5*2 + 5*2*1*3*4
        assert_approx_eq!(f64, opt.get_best_flops(), 600.0);
    }

    #[test]
    fn test_contract_order_complex() {
        let graph = setup_complex();
        let mut opt = Greedy::new(&graph, GreedyOptions::default());
        opt.find_path().unwrap();
        let tree = opt.take_best_tree().unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.ssa_path().len(), 5);
        assert_eq!(tree.result_legs(tree.root().unwrap()), vec![10]);
        assert!(opt.best_tree().is_none());
    }

    #[test]
    fn test_deterministic_and_seeded() {
        let graph = setup_complex();
        let run = |options: GreedyOptions| {
            let mut opt = Greedy::new(&graph, options);
            opt.find_path().unwrap();
            opt.get_best_path()
        };
        assert_eq!(run(GreedyOptions::default()), run(GreedyOptions::default()));
        let hot = GreedyOptions {
            temperature: 1.0,
            seed: 7,
            ..Default::default()
        };
        assert_eq!(run(hot.clone()), run(hot));
    }

    #[test]
    fn test_disconnected() {
        let graph = HyperGraph::build(
            vec![vec![0, 1], vec![1], vec![2, 3], vec![3]],
            vec![0, 2],
            FxHashMap::from_iter([(0, 2), (1, 3), (2, 4), (3, 5)]),
        )
        .unwrap();
        let mut joined = Greedy::new(&graph, GreedyOptions::default());
        joined.find_path().unwrap();
        assert!(joined.best_tree().unwrap().is_complete());

        let mut strict = Greedy::new(
            &graph,
            GreedyOptions {
                join_disconnected: false,
                ..Default::default()
            },
        );
        assert_eq!(
            strict.find_path().unwrap_err().kind(),
            ErrorKind::IncompleteContraction
        );
        assert_eq!(
            strict.take_best_tree().unwrap_err().kind(),
            ErrorKind::InvalidPath
        );
    }

    #[test]
    fn test_single_input() {
        let graph =
            HyperGraph::build(vec![vec![0]], vec![0], FxHashMap::from_iter([(0, 3)])).unwrap();
        let mut opt = Greedy::new(&graph, GreedyOptions::default());
        opt.find_path().unwrap();
        assert!(opt.get_best_path().is_empty());
        assert_approx_eq!(f64, opt.get_best_flops(), 0.0);
    }

    #[test]
    fn test_options_from_json() {
        let options: GreedyOptions = serde_json::from_str(r#"{"costmod": 0.5}"#).unwrap();
        assert_approx_eq!(f64, options.costmod, 0.5);
        assert!(options.simplify);
    }
}
