use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::debug;
use ordered_float::OrderedFloat;

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::SimplePath;
use crate::error::{Error, Result};
use crate::hypergraph::partitioning::DecompositionOracle;
use crate::hypergraph::{EdgeIndex, HyperGraph};

use super::{not_searched, FindPath};

/// Turns an elimination order of indices into an SSA contraction path.
///
/// Eliminating an index contracts all live nodes carrying it, always merging the
/// two smallest first. Nodes left over at the end are joined by size. Indices that
/// no live node carries anymore are skipped.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::paths::elimination::path_from_elimination_order;
/// # use tnc_paths::path;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// // eliminate k, then j
/// let path = path_from_elimination_order(&graph, &[2, 1]).unwrap();
/// assert_eq!(path, path![(1, 2), (0, 3)]);
/// ```
pub fn path_from_elimination_order(graph: &HyperGraph, order: &[EdgeIndex]) -> Result<SimplePath> {
    let mut graph = graph.pristine();
    let mut path = Vec::with_capacity(graph.num_inputs().saturating_sub(1));
    for &ix in order {
        if !graph.problem().has_index(ix) {
            return Err(Error::malformed(format!(
                "elimination order contains unknown index {ix}"
            )));
        }
        let mut queue = graph
            .edge_nodes(ix)
            .iter()
            .map(|&node| Reverse((OrderedFloat(graph.node_size(node)), node)))
            .collect::<BinaryHeap<_>>();
        while queue.len() > 1 {
            let (Some(Reverse((_, a))), Some(Reverse((_, b)))) = (queue.pop(), queue.pop())
            else {
                break;
            };
            path.push((a.min(b), a.max(b)));
            let (merged, _) = graph.contract(a, b)?;
            queue.push(Reverse((OrderedFloat(graph.node_size(merged)), merged)));
        }
    }
    path.extend(graph.optimize_remaining_by_size()?);
    Ok(path)
}

/// Path finder following the elimination order of a [`DecompositionOracle`].
pub struct Elimination<'a> {
    graph: &'a HyperGraph,
    oracle: &'a dyn DecompositionOracle,
    best_tree: Option<ContractionTree>,
}

impl<'a> Elimination<'a> {
    pub fn new(graph: &'a HyperGraph, oracle: &'a dyn DecompositionOracle) -> Self {
        Self {
            graph,
            oracle,
            best_tree: None,
        }
    }
}

impl FindPath for Elimination<'_> {
    fn find_path(&mut self) -> Result<()> {
        let order = self.oracle.decompose(self.graph)?;
        debug!(order:serde; "Eliminating indices");
        let path = path_from_elimination_order(self.graph, &order)?;
        self.best_tree = Some(ContractionTree::from_path(self.graph, &path)?);
        Ok(())
    }

    fn best_tree(&self) -> Option<&ContractionTree> {
        self.best_tree.as_ref()
    }

    fn take_best_tree(&mut self) -> Result<ContractionTree> {
        self.best_tree.take().ok_or_else(not_searched)
    }
}
