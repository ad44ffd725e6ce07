//! Exact contraction path search by dynamic programming over subsets of inputs.
//!
//! A subset of inputs is a bitmask. The best way to contract a subset is found by
//! combining the best ways to contract any two disjoint subsets covering it, which
//! are available since subsets are processed in increasing popcount order. Subsets
//! whose cost exceeds a cap are sieved out; if the full set is not reached the cap
//! is doubled and the search is repeated.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::debug;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_cost::Objective;
use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::paths::greedy::{join_remaining, Greedy, GreedyOptions};
use crate::error::{Error, Result};
use crate::hypergraph::{HyperGraph, NodeId};
use crate::utils::datastructures::SharedBound;

use super::{not_searched, Budget, FindPath, TerminationCondition};

/// Largest subset for which the memo table is a dense array.
const MAX_DENSE: usize = 20;
/// Largest subset that fits into a mask.
const MAX_INPUTS: usize = 64;

/// How pairs of subsets without a shared index are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OuterProducts {
    /// Connected components are searched separately and joined smallest first.
    #[default]
    Excluded,
    /// Outer products only create subsets that no connected split creates.
    Fallback,
    /// Every split is considered, the result is optimal over all binary trees.
    Included,
}

/// Options of the [`Optimal`] path finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimalOptions {
    pub objective: Objective,
    pub outer_products: OuterProducts,
    /// Initial cost cap. Defaults to the cost of a greedy path.
    pub cost_cap: Option<f64>,
    /// Evaluate every popcount layer in parallel.
    pub parallel: bool,
    pub termination: Option<TerminationCondition>,
}

impl Default for OptimalOptions {
    fn default() -> Self {
        Self {
            objective: Objective::Flops,
            outer_products: OuterProducts::default(),
            cost_cap: None,
            parallel: false,
            termination: None,
        }
    }
}

/// Result of an exact search that may have run out of budget.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub tree: ContractionTree,
    /// Whether the search completed. Otherwise `tree` is the greedy fallback.
    pub optimal: bool,
}

impl SearchOutcome {
    /// Returns the tree if it is proven optimal.
    pub fn into_optimal(self, objective: Objective) -> Result<ContractionTree> {
        if self.optimal {
            Ok(self.tree)
        } else {
            Err(Error::SearchInfeasible {
                best_cost: self.tree.score(objective),
            })
        }
    }
}

/// Exact path finder. See the [module documentation](self).
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::paths::optimal::{Optimal, OptimalOptions};
/// # use tnc_paths::contractionpath::paths::FindPath;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let mut optimal = Optimal::new(&graph, OptimalOptions::default());
/// optimal.find_path().unwrap();
/// assert_eq!(optimal.get_best_flops(), 36.0);
/// ```
pub struct Optimal<'a> {
    graph: &'a HyperGraph,
    options: OptimalOptions,
    cancel: Option<Arc<AtomicBool>>,
    best_tree: Option<ContractionTree>,
    optimal: bool,
}

impl<'a> Optimal<'a> {
    pub fn new(graph: &'a HyperGraph, options: OptimalOptions) -> Self {
        Self {
            graph,
            options,
            cancel: None,
            best_tree: None,
            optimal: false,
        }
    }

    /// Stops the search once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether the last search completed within its budget.
    pub fn is_optimal(&self) -> bool {
        self.optimal
    }

    /// The objective the subset search minimizes. The peak memory depends on the
    /// execution order, which subsets cannot express, so it is replaced by the
    /// largest intermediate.
    fn exact_objective(&self) -> Objective {
        match self.options.objective {
            Objective::PeakMemory => Objective::Size,
            objective => objective,
        }
    }

    /// Runs the search. Running out of budget is not an error: the greedy tree is
    /// returned instead, marked as not optimal.
    pub fn search(&self) -> Result<SearchOutcome> {
        let objective = self.exact_objective();
        let mut graph = self.graph.pristine();
        let groups = match self.options.outer_products {
            OuterProducts::Excluded => graph.subgraphs(),
            OuterProducts::Fallback | OuterProducts::Included => vec![graph.nodes()],
        };
        if let Some(largest) = groups.iter().map(Vec::len).max() {
            if largest > MAX_INPUTS {
                return Err(Error::ExactSearchTooLarge {
                    n: largest,
                    max: MAX_INPUTS,
                });
            }
        }

        let mut greedy = Greedy::new(self.graph, GreedyOptions::default());
        greedy.find_path()?;
        let fallback = greedy.take_best_tree()?;
        let initial_cap = self
            .options
            .cost_cap
            .unwrap_or_else(|| fallback.score(objective) * (1.0 + 1e-9));

        let budget = Budget::new(self.options.termination, self.cancel.clone());
        let mut tree = ContractionTree::new(&graph);
        for group in groups.into_iter().filter(|group| group.len() > 1) {
            let mut search = SubsetSearch::new(&graph, &group, objective, self.options.clone());
            if !search.run(initial_cap, &budget)? {
                debug!(steps = budget.steps(); "Exact search ran out of budget");
                return Ok(SearchOutcome {
                    tree: fallback,
                    optimal: false,
                });
            }
            search.replay(search.full, &mut graph, &mut tree)?;
        }
        join_remaining(&mut graph, &mut tree, true)?;
        Ok(SearchOutcome {
            tree,
            optimal: true,
        })
    }
}

impl FindPath for Optimal<'_> {
    /// Keeps the greedy tree when the budget runs out, see [`Optimal::is_optimal`].
    /// Use [`Optimal::search`] and [`SearchOutcome::into_optimal`] to treat that
    /// case as [`Error::SearchInfeasible`] instead.
    fn find_path(&mut self) -> Result<()> {
        let outcome = self.search()?;
        self.optimal = outcome.optimal;
        self.best_tree = Some(outcome.tree);
        Ok(())
    }

    fn best_tree(&self) -> Option<&ContractionTree> {
        self.best_tree.as_ref()
    }

    fn take_best_tree(&mut self) -> Result<ContractionTree> {
        self.best_tree.take().ok_or_else(not_searched)
    }
}

/// An index as seen from within the searched group.
#[derive(Debug, Clone, Copy)]
struct IndexInfo {
    /// Group members carrying the index.
    mask: u64,
    /// Whether the index survives even when all carrying members are merged.
    keep: bool,
    size: f64,
}

impl IndexInfo {
    /// Whether the tensor of subset `s` carries this index. Single inputs keep all
    /// of their indices, larger subsets drop the indices they fully contain.
    #[inline]
    fn is_leg_of(&self, s: u64) -> bool {
        self.mask & s != 0 && (s.count_ones() == 1 || self.keep || self.mask & !s != 0)
    }
}

/// Best known split of a subset.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    score: f64,
    left: u64,
    right: u64,
}

impl Entry {
    /// Lower score wins, equal scores are decided by the split masks.
    #[inline]
    fn is_better_than(&self, other: &Self) -> bool {
        self.score < other.score
            || (self.score == other.score && (self.left, self.right) < (other.left, other.right))
    }
}

#[derive(Debug)]
enum Table {
    Dense(Vec<Option<Entry>>),
    Sparse(FxHashMap<u64, Entry>),
}

impl Table {
    fn new(members: usize) -> Self {
        if members <= MAX_DENSE {
            Self::Dense(vec![None; 1 << members])
        } else {
            Self::Sparse(FxHashMap::default())
        }
    }

    #[inline]
    fn get(&self, s: u64) -> Option<&Entry> {
        match self {
            Self::Dense(entries) => entries[s as usize].as_ref(),
            Self::Sparse(entries) => entries.get(&s),
        }
    }

    #[inline]
    fn contains(&self, s: u64) -> bool {
        self.get(s).is_some()
    }

    /// Stores `entry` if it beats the current one. Returns whether `s` is new.
    fn offer(&mut self, s: u64, entry: Entry) -> bool {
        let slot = match self {
            Self::Dense(entries) => &mut entries[s as usize],
            Self::Sparse(entries) => {
                return match entries.get_mut(&s) {
                    Some(current) => {
                        if entry.is_better_than(current) {
                            *current = entry;
                        }
                        false
                    }
                    None => {
                        entries.insert(s, entry);
                        true
                    }
                };
            }
        };
        match slot {
            Some(current) => {
                if entry.is_better_than(current) {
                    *current = entry;
                }
                false
            }
            None => {
                *slot = Some(entry);
                true
            }
        }
    }
}

/// Which splits a pass over a layer considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pairs {
    Connected,
    Outer,
    All,
}

/// Best proposals per subset collected while scanning a layer.
type Proposals = FxHashMap<u64, Entry>;

fn merge_proposals(mut into: Proposals, from: Proposals) -> Proposals {
    for (s, entry) in from {
        into.entry(s)
            .and_modify(|current| {
                if entry.is_better_than(current) {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }
    into
}

/// Subset dynamic program over one group of graph nodes.
struct SubsetSearch {
    members: Vec<NodeId>,
    indices: Vec<IndexInfo>,
    objective: Objective,
    options: OptimalOptions,
    full: u64,
    table: Table,
    layers: Vec<Vec<u64>>,
    bound: SharedBound,
}

impl SubsetSearch {
    fn new(
        graph: &HyperGraph,
        members: &[NodeId],
        objective: Objective,
        options: OptimalOptions,
    ) -> Self {
        let position: FxHashMap<NodeId, usize> = members
            .iter()
            .enumerate()
            .map(|(pos, &node)| (node, pos))
            .collect();
        let mut masks: FxHashMap<usize, u64> = FxHashMap::default();
        for (pos, &node) in members.iter().enumerate() {
            for &ix in graph.node_legs(node).unwrap_or_default() {
                *masks.entry(ix).or_default() |= 1 << pos;
            }
        }
        let mut indices = masks
            .into_iter()
            .map(|(ix, mask)| {
                let outside = graph
                    .edge_nodes(ix)
                    .iter()
                    .any(|node| !position.contains_key(node));
                (
                    ix,
                    IndexInfo {
                        mask,
                        keep: graph.problem().is_output(ix) || outside,
                        size: graph.size(ix) as f64,
                    },
                )
            })
            .collect::<Vec<_>>();
        indices.sort_unstable_by_key(|(ix, _)| *ix);

        let n = members.len();
        let full = if n == MAX_INPUTS {
            u64::MAX
        } else {
            (1 << n) - 1
        };
        Self {
            members: members.to_vec(),
            indices: indices.into_iter().map(|(_, info)| info).collect(),
            objective,
            options,
            full,
            table: Table::new(n),
            layers: Vec::new(),
            bound: SharedBound::default(),
        }
    }

    /// Runs the sieve with widening caps. Returns `false` if the budget ran out.
    fn run(&mut self, initial_cap: f64, budget: &Budget) -> Result<bool> {
        let n = self.members.len();
        let mut cap = initial_cap;
        loop {
            self.table = Table::new(n);
            self.bound = SharedBound::default();
            self.layers = vec![Vec::new(); n + 1];
            for pos in 0..n {
                let s = 1 << pos;
                self.table.offer(
                    s,
                    Entry {
                        score: 0.0,
                        left: 0,
                        right: 0,
                    },
                );
                self.layers[1].push(s);
            }

            for m in 2..=n {
                match self.options.outer_products {
                    OuterProducts::Excluded => self.fill_layer(m, Pairs::Connected, cap, budget),
                    OuterProducts::Fallback => {
                        self.fill_layer(m, Pairs::Connected, cap, budget);
                        self.fill_layer(m, Pairs::Outer, cap, budget);
                    }
                    OuterProducts::Included => self.fill_layer(m, Pairs::All, cap, budget),
                }
                if budget.is_exhausted() {
                    return Ok(false);
                }
                self.layers[m].sort_unstable();
                debug!(layer = m, subsets = self.layers[m].len(), cap; "Finished subset layer");
            }

            if self.table.contains(self.full) {
                return Ok(true);
            }
            if !cap.is_finite() {
                return Err(Error::SearchInfeasible {
                    best_cost: f64::INFINITY,
                });
            }
            cap = (cap * 2.0).max(1.0);
            debug!(cap; "Widening cost cap");
        }
    }

    /// Creates the subsets of popcount `m`.
    fn fill_layer(&mut self, m: usize, pairs: Pairs, cap: f64, budget: &Budget) {
        let items = (1..=m / 2)
            .flat_map(|k| (0..self.layers[k].len()).map(move |i| (k, i)))
            .collect::<Vec<_>>();
        let this: &Self = self;
        let proposals = if this.options.parallel {
            items
                .par_iter()
                .fold(Proposals::default, |acc, &(k, i)| {
                    this.scan(acc, m, k, i, pairs, cap, budget)
                })
                .reduce(Proposals::default, merge_proposals)
        } else {
            items.iter().fold(Proposals::default(), |acc, &(k, i)| {
                this.scan(acc, m, k, i, pairs, cap, budget)
            })
        };

        let mut proposals = proposals.into_iter().collect::<Vec<_>>();
        proposals.sort_unstable_by_key(|(s, _)| *s);
        for (s, entry) in proposals {
            if self.table.offer(s, entry) {
                self.layers[m].push(s);
            }
        }
    }

    /// Combines the `i`-th subset of popcount `k` with all disjoint subsets of
    /// popcount `m - k`.
    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        mut acc: Proposals,
        m: usize,
        k: usize,
        i: usize,
        pairs: Pairs,
        cap: f64,
        budget: &Budget,
    ) -> Proposals {
        if !budget.tick() {
            return acc;
        }
        let s1 = self.layers[k][i];
        let partners = if 2 * k == m {
            &self.layers[k][i + 1..]
        } else {
            &self.layers[m - k][..]
        };
        let Some(e1) = self.table.get(s1) else {
            return acc;
        };
        for (j, &s2) in partners.iter().enumerate() {
            if j % 1024 == 1023 && budget.is_exhausted() {
                break;
            }
            if s1 & s2 != 0 {
                continue;
            }
            let s = s1 | s2;
            if pairs == Pairs::Outer && self.table.contains(s) {
                continue;
            }
            let Some(e2) = self.table.get(s2) else {
                continue;
            };
            let (flops, size, connected) = self.pair_cost(s1, s2, s);
            match pairs {
                Pairs::Connected if !connected => continue,
                Pairs::Outer if connected => continue,
                _ => {}
            }
            let score = self.objective.combine(
                self.objective.combine(e1.score, e2.score),
                self.objective.step_cost(flops, size),
            );
            if score > cap || score > self.bound.get() {
                continue;
            }
            if s == self.full {
                self.bound.offer(score);
            }
            let (left, right) = if s1 < s2 { (s1, s2) } else { (s2, s1) };
            let entry = Entry { score, left, right };
            acc.entry(s)
                .and_modify(|current| {
                    if entry.is_better_than(current) {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }
        acc
    }

    /// Flops and result size of merging `s1` and `s2` into `s`, and whether the
    /// two share an index.
    fn pair_cost(&self, s1: u64, s2: u64, s: u64) -> (f64, f64, bool) {
        let mut flops = 1.0;
        let mut size = 1.0;
        let mut connected = false;
        for info in &self.indices {
            if info.mask & s == 0 {
                continue;
            }
            let in1 = info.is_leg_of(s1);
            let in2 = info.is_leg_of(s2);
            if in1 || in2 {
                flops *= info.size;
                connected |= in1 && in2;
                if info.is_leg_of(s) {
                    size *= info.size;
                }
            }
        }
        (flops, size, connected)
    }

    /// Performs the best contraction order of `s` on `graph` and `tree`, returning
    /// the node holding the result.
    fn replay(&self, s: u64, graph: &mut HyperGraph, tree: &mut ContractionTree) -> Result<NodeId> {
        if s.count_ones() == 1 {
            return Ok(self.members[s.trailing_zeros() as usize]);
        }
        let Some(&Entry { left, right, .. }) = self.table.get(s) else {
            return Err(Error::invalid_path(format!("subset {s:#x} was never reached")));
        };
        let a = self.replay(left, graph, tree)?;
        let b = self.replay(right, graph, tree)?;
        let (k, _) = graph.contract(a, b)?;
        let id = tree.insert(a, b)?;
        debug_assert_eq!(k, id, "graph and tree ids diverged");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

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
    fn test_chain_optimum() {
        let graph = chain();
        for outer_products in [
            OuterProducts::Excluded,
            OuterProducts::Fallback,
            OuterProducts::Included,
        ] {
            let mut opt = Optimal::new(
                &graph,
                OptimalOptions {
                    outer_products,
                    ..Default::default()
                },
            );
            opt.find_path().unwrap();
            assert!(opt.is_optimal());
            assert_eq!(opt.get_best_path(), path![(1, 2), (0, 3)]);
            assert_approx_eq!(f64, opt.get_best_flops(), 36.0);
        }
    }

    #[test]
    fn test_complex_not_worse_than_greedy() {
        let graph = setup_complex();
        let mut greedy = Greedy::new(&graph, GreedyOptions::default());
        greedy.find_path().unwrap();
        for parallel in [false, true] {
            let mut opt = Optimal::new(
                &graph,
                OptimalOptions {
                    parallel,
                    ..Default::default()
                },
            );
            opt.find_path().unwrap();
            assert!(opt.best_tree().unwrap().is_complete());
            assert!(opt.get_best_flops() <= greedy.get_best_flops());
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let graph = setup_complex();
        let run = |parallel| {
            let mut opt = Optimal::new(
                &graph,
                OptimalOptions {
                    parallel,
                    outer_products: OuterProducts::Included,
                    ..Default::default()
                },
            );
            opt.find_path().unwrap();
            opt.get_best_path()
        };
        assert_eq!(run(false), run(true));
    }

    #[test]
    fn test_small_cost_cap_is_widened() {
        let graph = setup_complex();
        let mut capped = Optimal::new(
            &graph,
            OptimalOptions {
                cost_cap: Some(2.0),
                ..Default::default()
            },
        );
        capped.find_path().unwrap();
        let mut uncapped = Optimal::new(&graph, OptimalOptions::default());
        uncapped.find_path().unwrap();
        assert_approx_eq!(f64, capped.get_best_flops(), uncapped.get_best_flops());
    }

    #[test]
    fn test_size_objective() {
        let graph = setup_complex();
        let mut opt = Optimal::new(
            &graph,
            OptimalOptions {
                objective: Objective::Size,
                ..Default::default()
            },
        );
        opt.find_path().unwrap();
        let mut greedy = Greedy::new(&graph, GreedyOptions::default());
        greedy.find_path().unwrap();
        assert!(opt.get_best_size() <= greedy.get_best_size());
    }

    #[test]
    fn test_budget_exhaustion_returns_greedy() {
        let graph = setup_complex();
        let mut opt = Optimal::new(
            &graph,
            OptimalOptions {
                termination: Some(TerminationCondition::Iterations { n_iter: 1 }),
                ..Default::default()
            },
        );
        opt.find_path().unwrap();
        assert!(!opt.is_optimal());
        let mut greedy = Greedy::new(&graph, GreedyOptions::default());
        greedy.find_path().unwrap();
        assert_eq!(opt.get_best_path(), greedy.get_best_path());

        let outcome = Optimal::new(
            &graph,
            OptimalOptions {
                termination: Some(TerminationCondition::Time {
                    max_time: Duration::ZERO,
                }),
                ..Default::default()
            },
        )
        .search()
        .unwrap();
        assert!(!outcome.optimal);
        assert_eq!(
            outcome.into_optimal(Objective::Flops).unwrap_err().kind(),
            ErrorKind::SearchInfeasible
        );
    }

    #[test]
    fn test_cancelled() {
        let graph = setup_complex();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = Optimal::new(&graph, OptimalOptions::default())
            .with_cancel(cancel)
            .search()
            .unwrap();
        assert!(!outcome.optimal);
    }

    #[test]
    fn test_disconnected_components() {
        let graph = HyperGraph::build(
            vec![vec![0, 1], vec![1, 2], vec![3, 4], vec![4], vec![]],
            vec![0, 2, 3],
            FxHashMap::from_iter([(0, 2), (1, 3), (2, 4), (3, 5), (4, 6)]),
        )
        .unwrap();
        let mut excluded = Optimal::new(&graph, OptimalOptions::default());
        excluded.find_path().unwrap();
        let mut included = Optimal::new(
            &graph,
            OptimalOptions {
                outer_products: OuterProducts::Included,
                ..Default::default()
            },
        );
        included.find_path().unwrap();
        assert!(excluded.best_tree().unwrap().is_complete());
        assert!(included.best_tree().unwrap().is_complete());
        assert!(included.get_best_flops() <= excluded.get_best_flops());
    }

    #[test]
    fn test_too_large() {
        let inputs = (0..65).map(|i| vec![i, i + 1]).collect::<Vec<_>>();
        let sizes = (0..=65).map(|i| (i, 2)).collect::<FxHashMap<_, _>>();
        let graph = HyperGraph::build(inputs, vec![0, 65], sizes).unwrap();
        let mut opt = Optimal::new(&graph, OptimalOptions::default());
        assert_eq!(
            opt.find_path().unwrap_err().kind(),
            ErrorKind::ExactSearchTooLarge
        );
    }
}
