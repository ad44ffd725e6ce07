use std::collections::BinaryHeap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::contractionpath::candidates::Candidate;
use crate::contractionpath::contraction_cost::Objective;
use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::paths::greedy::{Greedy, GreedyOptions};
use crate::contractionpath::SimplePath;
use crate::error::Result;
use crate::hypergraph::HyperGraph;

use super::{not_searched, Budget, FindPath, TerminationCondition};

/// Options of the [`BranchBound`] path finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchBoundOptions {
    pub objective: Objective,
    /// Maximal number of candidate contractions explored per step, all if `None`.
    pub nbranch: Option<u32>,
    /// Prunes a branch whose cost exceeds this factor times the best cost seen so
    /// far with the same number of remaining nodes.
    pub cutoff_flops_factor: f64,
    pub termination: Option<TerminationCondition>,
}

impl Default for BranchBoundOptions {
    fn default() -> Self {
        Self {
            objective: Objective::Flops,
            nbranch: None,
            cutoff_flops_factor: 20.0,
            termination: None,
        }
    }
}

/// A path finder that explores possible pair contractions in a depth-first manner.
///
/// Starts from the greedy path as upper bound. A branch is cut when its cost plus
/// a lower bound on the remaining cost cannot beat the best complete path, when
/// the same remaining problem was already reached more cheaply, or when it is
/// much worse than the best partial path of the same depth.
pub struct BranchBound<'a> {
    graph: &'a HyperGraph,
    options: BranchBoundOptions,
    cancel: Option<Arc<AtomicBool>>,
    best_cost: f64,
    best_path: SimplePath,
    best_tree: Option<ContractionTree>,
    best_progress: FxHashMap<usize, f64>,
    visited: FxHashMap<u64, f64>,
    output_size: f64,
    completed: bool,
}

impl<'a> BranchBound<'a> {
    pub fn new(graph: &'a HyperGraph, options: BranchBoundOptions) -> Self {
        let output_size = graph.problem().legs_size(graph.output());
        Self {
            graph,
            options,
            cancel: None,
            best_cost: f64::INFINITY,
            best_path: Vec::new(),
            best_tree: None,
            best_progress: FxHashMap::default(),
            visited: FxHashMap::default(),
            output_size,
            completed: false,
        }
    }

    /// Stops the search once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether the last search explored the whole (pruned) search space.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn objective(&self) -> Objective {
        match self.options.objective {
            Objective::PeakMemory => Objective::Size,
            objective => objective,
        }
    }

    /// A lower bound on the cost of contracting `graph`, given the cost `cost`
    /// accumulated so far.
    fn lower_bound(&self, graph: &HyperGraph, cost: f64) -> f64 {
        if graph.remaining_node_count() < 2 {
            return cost;
        }
        // every live tensor is an operand of some future contraction, whose flops
        // are at least the size of its larger operand
        let flops = 0.5
            * graph
                .nodes()
                .into_iter()
                .map(|node| graph.node_size(node))
                .sum::<f64>();
        match self.objective() {
            Objective::Flops => cost + flops,
            Objective::Size | Objective::PeakMemory => cost.max(self.output_size),
            Objective::Write => cost + self.output_size,
            Objective::Combo { factor } => cost + flops + factor * self.output_size,
            Objective::Limit { factor } => cost + flops.max(factor * self.output_size),
        }
    }

    fn assess_candidate(
        &mut self,
        graph: &HyperGraph,
        a: usize,
        b: usize,
        cost: f64,
    ) -> Result<Option<Candidate>> {
        let objective = self.objective();
        let contraction = graph.cost_of_contraction(a, b)?;
        let new_cost = objective.combine(
            cost,
            objective.step_cost(contraction.flops, contraction.memory),
        );
        if new_cost >= self.best_cost {
            return Ok(None);
        }

        let remaining = graph.remaining_node_count();
        let best_progress = *self.best_progress.entry(remaining).or_insert(new_cost);
        if new_cost < best_progress {
            self.best_progress.insert(remaining, new_cost);
        } else if new_cost > self.options.cutoff_flops_factor * best_progress {
            return Ok(None);
        }

        Ok(Some(Candidate::new(new_cost, contraction.flops, a, b)))
    }

    /// Explores possible pair contractions in a depth-first recursive manner, with
    /// extra heuristic early pruning of branches. Follows the `branch` strategies
    /// of `opt_einsum`, found at <https://github.com/dgasmith/opt_einsum>.
    fn branch_iterate(
        &mut self,
        graph: &HyperGraph,
        path: &mut SimplePath,
        cost: f64,
        budget: &Budget,
    ) -> Result<()> {
        if !budget.tick() {
            self.completed = false;
            return Ok(());
        }
        if graph.remaining_node_count() <= 1 {
            if cost < self.best_cost {
                debug!(cost, steps = budget.steps(); "Found better path");
                self.best_cost = cost;
                self.best_path.clone_from(path);
            }
            return Ok(());
        }
        if self.lower_bound(graph, cost) >= self.best_cost {
            return Ok(());
        }
        let key = graph.state_key();
        match self.visited.get(&key) {
            Some(&seen) if seen <= cost => return Ok(()),
            _ => {
                self.visited.insert(key, cost);
            }
        }

        let nodes = graph.nodes();
        let mut pairs = nodes
            .iter()
            .flat_map(|&a| {
                graph
                    .neighbors(a)
                    .into_iter()
                    .filter(move |&b| a < b)
                    .map(move |b| (a, b))
            })
            .collect_vec();
        if pairs.is_empty() {
            pairs = nodes.into_iter().tuple_combinations().collect();
        }

        let mut candidates = BinaryHeap::new();
        for (a, b) in pairs {
            if let Some(candidate) = self.assess_candidate(graph, a, b, cost)? {
                candidates.push(candidate);
            }
        }

        let mut branches = 0;
        while self.options.nbranch.map_or(true, |nbranch| branches < nbranch) {
            let Some(Candidate {
                score, parent_ids, ..
            }) = candidates.pop()
            else {
                break;
            };
            if score >= self.best_cost {
                break;
            }
            let mut next = graph.clone();
            next.contract(parent_ids.0, parent_ids.1)?;
            path.push(parent_ids);
            self.branch_iterate(&next, path, score, budget)?;
            path.pop();
            if budget.is_exhausted() {
                self.completed = false;
                break;
            }
            branches += 1;
        }
        Ok(())
    }
}

impl FindPath for BranchBound<'_> {
    fn find_path(&mut self) -> Result<()> {
        let mut greedy = Greedy::new(
            self.graph,
            GreedyOptions {
                simplify: false,
                ..Default::default()
            },
        );
        greedy.find_path()?;
        let seed = greedy.take_best_tree()?;

        self.best_cost = seed.score(self.objective());
        self.best_path = seed.ssa_path();
        self.best_progress.clear();
        self.visited.clear();
        self.completed = true;

        let budget = Budget::new(self.options.termination, self.cancel.clone());
        let graph = self.graph.pristine();
        self.branch_iterate(&graph, &mut Vec::new(), 0.0, &budget)?;
        self.best_tree = Some(ContractionTree::from_path(self.graph, &self.best_path)?);
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

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::contractionpath::paths::optimal::{Optimal, OptimalOptions, OuterProducts};
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
    fn test_contract_order_simple() {
        let graph = setup_simple();
        let mut opt = BranchBound::new(&graph, BranchBoundOptions::default());
        opt.find_path().unwrap();
        assert!(opt.is_completed());
        assert_approx_eq!(f64, opt.get_best_flops(), 600.0);
        assert_eq!(opt.get_best_path(), path![(0, 1), (2, 3)]);
        assert_eq!(opt.get_best_replace_path(), path![(0, 1), (2, 0)]);
    }

    #[test]
    fn test_contract_order_complex_matches_optimal() {
        let graph = setup_complex();
        let mut opt = BranchBound::new(
            &graph,
            BranchBoundOptions {
                cutoff_flops_factor: f64::INFINITY,
                ..Default::default()
            },
        );
        opt.find_path().unwrap();
        let mut exact = Optimal::new(
            &graph,
            OptimalOptions {
                outer_products: OuterProducts::Included,
                ..Default::default()
            },
        );
        exact.find_path().unwrap();
        assert_approx_eq!(f64, opt.get_best_flops(), exact.get_best_flops());
        assert!(opt.best_tree().unwrap().is_complete());
    }

    #[test]
    fn test_narrow_branching_never_worse_than_greedy() {
        let graph = setup_complex();
        let mut narrow = BranchBound::new(
            &graph,
            BranchBoundOptions {
                nbranch: Some(1),
                ..Default::default()
            },
        );
        narrow.find_path().unwrap();
        let mut greedy = Greedy::new(&graph, GreedyOptions::default());
        greedy.find_path().unwrap();
        assert!(narrow.get_best_flops() <= greedy.get_best_flops());
    }

    #[test]
    fn test_budget_keeps_greedy_path() {
        let graph = setup_complex();
        let mut opt = BranchBound::new(
            &graph,
            BranchBoundOptions {
                termination: Some(TerminationCondition::Iterations { n_iter: 1 }),
                ..Default::default()
            },
        );
        opt.find_path().unwrap();
        assert!(!opt.is_completed());
        assert!(opt.best_tree().unwrap().is_complete());
    }

    #[test]
    fn test_cancelled_keeps_greedy_path() {
        let graph = setup_complex();
        let mut greedy = Greedy::new(
            &graph,
            GreedyOptions {
                simplify: false,
                ..Default::default()
            },
        );
        greedy.find_path().unwrap();

        let mut opt = BranchBound::new(&graph, BranchBoundOptions::default())
            .with_cancel(Arc::new(AtomicBool::new(true)));
        opt.find_path().unwrap();
        assert!(!opt.is_completed());
        let tree = opt.best_tree().unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.ssa_path(), greedy.best_tree().unwrap().ssa_path());
    }

    #[test]
    fn test_size_objective() {
        let graph = setup_complex();
        let mut opt = BranchBound::new(
            &graph,
            BranchBoundOptions {
                objective: Objective::Size,
                cutoff_flops_factor: f64::INFINITY,
                ..Default::default()
            },
        );
        opt.find_path().unwrap();
        let mut exact = Optimal::new(
            &graph,
            OptimalOptions {
                objective: Objective::Size,
                outer_products: OuterProducts::Included,
                ..Default::default()
            },
        );
        exact.find_path().unwrap();
        assert_approx_eq!(f64, opt.get_best_size(), exact.get_best_size());
    }
}
