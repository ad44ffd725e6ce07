use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::hypergraph::{EdgeIndex, HyperGraph, NodeId};

/// Splits a set of live nodes into two parts with a small cut.
pub trait PartitionOracle: Send + Sync {
    /// Splits `nodes` (live nodes of `graph`, at least two) into two non-empty
    /// parts. `imbalance` is the allowed relative deviation of the part sizes from
    /// an even split.
    fn partition(
        &self,
        graph: &HyperGraph,
        nodes: &[NodeId],
        imbalance: f64,
    ) -> Result<(Vec<NodeId>, Vec<NodeId>)>;
}

/// Produces an elimination order of the indices of a hypergraph, as known from
/// tree decompositions of its line graph.
pub trait DecompositionOracle: Send + Sync {
    fn decompose(&self, graph: &HyperGraph) -> Result<Vec<EdgeIndex>>;
}

/// Weight of a cut through index `ix`.
#[inline]
fn edge_weight(graph: &HyperGraph, ix: EdgeIndex) -> f64 {
    (graph.size(ix) as f64).log2()
}

/// Bisection by growing one part breadth-first from a peripheral node, always
/// adding the frontier node most strongly connected to the part.
///
/// The part is grown to the lower size limit given by the imbalance. Beyond that,
/// nodes are only added while they are more strongly connected to the growing part
/// than to the rest, up to the upper size limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct BfsBisector;

impl BfsBisector {
    /// Sum of the weights of the indices `node` shares with nodes in `part`.
    fn connection(
        graph: &HyperGraph,
        node: NodeId,
        part: &FxHashSet<NodeId>,
        candidates: &FxHashSet<NodeId>,
    ) -> (f64, f64) {
        let mut inside = 0.0;
        let mut outside = 0.0;
        for &ix in graph.node_legs(node).unwrap_or_default() {
            let weight = edge_weight(graph, ix);
            let others = graph
                .edge_nodes(ix)
                .iter()
                .filter(|&&other| other != node && candidates.contains(&other));
            let (mut to_part, mut to_rest) = (false, false);
            for other in others {
                if part.contains(other) {
                    to_part = true;
                } else {
                    to_rest = true;
                }
            }
            if to_part {
                inside += weight;
            }
            if to_rest {
                outside += weight;
            }
        }
        (inside, outside)
    }
}

impl PartitionOracle for BfsBisector {
    fn partition(
        &self,
        graph: &HyperGraph,
        nodes: &[NodeId],
        imbalance: f64,
    ) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        if nodes.len() < 2 {
            return Err(Error::malformed(format!(
                "cannot bisect a set of {} nodes",
                nodes.len()
            )));
        }
        if let Some(&missing) = nodes.iter().find(|&&node| !graph.contains(node)) {
            return Err(Error::malformed(format!("node {missing} is not live")));
        }

        let candidates: FxHashSet<NodeId> = nodes.iter().copied().collect();
        let half = nodes.len() as f64 / 2.0;
        let imbalance = imbalance.clamp(0.0, 1.0);
        let lower = ((half * (1.0 - imbalance)).floor() as usize).clamp(1, nodes.len() - 1);
        let upper = ((half * (1.0 + imbalance)).ceil() as usize).clamp(lower, nodes.len() - 1);

        let degree = |node: NodeId| {
            graph
                .neighbors(node)
                .into_iter()
                .filter(|other| candidates.contains(other))
                .count()
        };
        let Some(start) = nodes
            .iter()
            .copied()
            .min_by_key(|&node| (degree(node), node))
        else {
            return Err(Error::malformed("cannot bisect an empty set of nodes"));
        };

        let mut part = FxHashSet::default();
        part.insert(start);
        while part.len() < upper {
            let best = nodes
                .iter()
                .copied()
                .filter(|node| !part.contains(node))
                .map(|node| {
                    let (inside, outside) = Self::connection(graph, node, &part, &candidates);
                    (node, inside, outside)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
            let Some((node, inside, outside)) = best else {
                break;
            };
            if part.len() >= lower && inside < outside {
                break;
            }
            part.insert(node);
        }

        let (left, right): (Vec<_>, Vec<_>) = nodes
            .iter()
            .copied()
            .sorted()
            .partition(|node| part.contains(node));
        Ok((left, right))
    }
}

/// Greedy min-fill elimination over the line graph of the hypergraph.
///
/// Two indices are adjacent when some input carries both. The index whose
/// elimination adds the fewest new adjacencies goes next, ties broken by degree
/// and then by index. Output indices are never eliminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinFillDecomposer;

impl MinFillDecomposer {
    fn fill_in(adjacency: &FxHashMap<EdgeIndex, FxHashSet<EdgeIndex>>, ix: EdgeIndex) -> usize {
        let neighbors = &adjacency[&ix];
        neighbors
            .iter()
            .tuple_combinations()
            .filter(|(a, b)| !adjacency[*a].contains(*b))
            .count()
    }
}

impl DecompositionOracle for MinFillDecomposer {
    fn decompose(&self, graph: &HyperGraph) -> Result<Vec<EdgeIndex>> {
        let problem = graph.problem();
        let mut adjacency: FxHashMap<EdgeIndex, FxHashSet<EdgeIndex>> = FxHashMap::default();
        for legs in problem.inputs() {
            for &ix in legs {
                adjacency.entry(ix).or_default();
            }
            for (&a, &b) in legs.iter().tuple_combinations() {
                adjacency.entry(a).or_default().insert(b);
                adjacency.entry(b).or_default().insert(a);
            }
        }

        let mut remaining = adjacency
            .keys()
            .copied()
            .filter(|&ix| !problem.is_output(ix))
            .collect::<Vec<_>>();
        remaining.sort_unstable();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let Some((position, &ix)) = remaining.iter().enumerate().min_by_key(|(_, &ix)| {
                (Self::fill_in(&adjacency, ix), adjacency[&ix].len(), ix)
            }) else {
                break;
            };
            remaining.remove(position);
            order.push(ix);

            let neighbors = adjacency.remove(&ix).unwrap_or_default();
            for &other in &neighbors {
                if let Some(adjacent) = adjacency.get_mut(&other) {
                    adjacent.remove(&ix);
                    adjacent.extend(neighbors.iter().copied().filter(|&n| n != other));
                }
            }
        }
        Ok(order)
    }
}
