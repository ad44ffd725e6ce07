//! Black-box search over path finding methods and their parameters.
//!
//! Every trial asks a [`ParameterOracle`] for a method and parameters, builds a
//! tree with it, optionally slices the tree and scores it. Trials are independent,
//! so they can run in parallel, and finished trials can be appended to a
//! [`TrialCache`] to resume the search later.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_cost::{log2_cost, Objective};
use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::paths::branchbound::{BranchBound, BranchBoundOptions};
use crate::contractionpath::paths::elimination::Elimination;
use crate::contractionpath::paths::greedy::{Greedy, GreedyOptions};
use crate::contractionpath::paths::optimal::{Optimal, OptimalOptions};
use crate::contractionpath::paths::partitioned::{PartitionGreedy, PartitionGreedyOptions};
use crate::contractionpath::paths::{Budget, FindPath, TerminationCondition};
use crate::contractionpath::slicing::{slice_tree, SliceOptions};
use crate::error::{Error, ErrorKind, Result};
use crate::hypergraph::partitioning::{
    BfsBisector, DecompositionOracle, MinFillDecomposer, PartitionOracle,
};
use crate::hypergraph::{Fingerprint, HyperGraph};
use crate::utils::datastructures::SharedBound;

pub mod oracle;
pub mod space;
pub mod trials;

pub use oracle::{ParameterOracle, RandomSampler};
pub use space::{Method, ParamSpec, ParamValue, ParameterSet, ParameterSpace};
pub use trials::{TrialCache, TrialRecord, TrialState};

use trials::TrialMachine;

/// Options of the [`HyperOptimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperOptions {
    /// Methods the default [`RandomSampler`] chooses from.
    pub methods: Vec<Method>,
    pub objective: Objective,
    /// Number of new trials or wall-clock time of one run.
    pub termination: TerminationCondition,
    /// Seed of the default [`RandomSampler`].
    pub seed: u64,
    /// Slice every tree to this target before scoring it.
    pub slicing: Option<SliceOptions>,
    /// JSON-lines file to resume from and append finished trials to.
    pub cache: Option<PathBuf>,
}

impl Default for HyperOptions {
    fn default() -> Self {
        Self {
            methods: vec![Method::Greedy, Method::PartitionGreedy],
            objective: Objective::Flops,
            termination: TerminationCondition::Iterations { n_iter: 32 },
            seed: 0,
            slicing: None,
            cache: None,
        }
    }
}

/// The outcome of a [`HyperOptimizer`] run.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The best tree, either found in this run or restored from the cache.
    pub tree: ContractionTree,
    /// The record of the best trial.
    pub best: TrialRecord,
    /// Number of new trials run.
    pub trials: usize,
    /// Number of new trials that failed.
    pub failures: usize,
    /// Number of trials loaded from the cache.
    pub resumed: usize,
}

/// The best trial seen so far, shared between workers.
#[derive(Default)]
struct BestTrial {
    bound: SharedBound,
    entry: Mutex<Option<(TrialRecord, ContractionTree)>>,
}

impl BestTrial {
    /// Stores the trial if it beats the current best. Returns whether it did.
    fn offer(&self, record: &TrialRecord, tree: &ContractionTree) -> bool {
        let Some(score) = record.score else {
            return false;
        };
        if score >= self.bound.get() {
            return false;
        }
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        let better = entry
            .as_ref()
            .and_then(|(best, _)| best.score)
            .map_or(true, |best| score < best);
        if better {
            self.bound.offer(score);
            *entry = Some((record.clone(), tree.clone()));
        }
        better
    }

    fn into_inner(self) -> Option<(TrialRecord, ContractionTree)> {
        self.entry
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The oracle together with every trial reported to it.
struct OracleState<'a> {
    oracle: Box<dyn ParameterOracle + 'a>,
    history: Vec<TrialRecord>,
}

/// State of one run, shared by all its workers.
struct Shared {
    fingerprint: Fingerprint,
    /// Handed to the path finders, so a cancelled run also stops running trials.
    cancel: Arc<AtomicBool>,
    cache: Option<TrialCache>,
    budget: Budget,
    best: BestTrial,
    failures: Mutex<BTreeMap<ErrorKind, usize>>,
    next_trial: AtomicUsize,
    completed: AtomicUsize,
    resumed: usize,
}

/// Searches for the best contraction tree by sampling path finding methods and
/// their parameters.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::paths::TerminationCondition;
/// # use tnc_paths::contractionpath::paths::hyperoptimization::{HyperOptimizer, HyperOptions, Method};
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let options = HyperOptions {
///     methods: vec![Method::Greedy, Method::Optimal],
///     termination: TerminationCondition::Iterations { n_iter: 8 },
///     ..Default::default()
/// };
/// let result = HyperOptimizer::new(&graph, options).run().unwrap();
/// assert_eq!(result.tree.total_flops(), 36.0);
/// ```
pub struct HyperOptimizer<'a> {
    graph: &'a HyperGraph,
    options: HyperOptions,
    oracle: Mutex<OracleState<'a>>,
    partitioner: Arc<dyn PartitionOracle>,
    decomposer: Arc<dyn DecompositionOracle>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> HyperOptimizer<'a> {
    /// Creates an optimizer sampling `options.methods` with a seeded
    /// [`RandomSampler`], and with the built-in partitioning oracles.
    pub fn new(graph: &'a HyperGraph, options: HyperOptions) -> Self {
        let sampler = RandomSampler::new(
            ParameterSpace::for_methods(&options.methods),
            options.seed,
        );
        Self {
            graph,
            options,
            oracle: Mutex::new(OracleState {
                oracle: Box::new(sampler),
                history: Vec::new(),
            }),
            partitioner: Arc::new(BfsBisector),
            decomposer: Arc::new(MinFillDecomposer),
            cancel: None,
        }
    }

    /// Replaces the parameter oracle.
    pub fn with_oracle(mut self, oracle: Box<dyn ParameterOracle + 'a>) -> Self {
        self.oracle = Mutex::new(OracleState {
            oracle,
            history: Vec::new(),
        });
        self
    }

    pub fn with_partitioner(mut self, partitioner: Arc<dyn PartitionOracle>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn DecompositionOracle>) -> Self {
        self.decomposer = decomposer;
        self
    }

    /// Stops the search at the next trial boundary once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs trials one after another until the budget is used up or the oracle has
    /// nothing left to propose.
    pub fn run(&mut self) -> Result<SearchResult> {
        let shared = self.prepare()?;
        self.worker(0, &shared);
        self.finish(shared)
    }

    /// Runs trials on `workers` threads. Only the oracle, the best trial and the
    /// cache are shared, each behind its own lock.
    pub fn run_parallel(&mut self, workers: usize) -> Result<SearchResult> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
        let shared = self.prepare()?;
        let this: &Self = self;
        let shared_ref = &shared;
        pool.scope(|scope| {
            for worker in 0..workers {
                scope.spawn(move |_| this.worker(worker, shared_ref));
            }
        });
        self.finish(shared)
    }

    /// Loads cached trials, restores the best of them and opens the cache for
    /// appending.
    fn prepare(&self) -> Result<Shared> {
        let fingerprint = self
            .graph
            .fingerprint()
            .with_objective(&self.options.objective);
        let history = match &self.options.cache {
            Some(path) => TrialCache::load(path, fingerprint)?,
            None => Vec::new(),
        };

        let mut state = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
        let best = BestTrial::default();
        for record in &history {
            state.oracle.report(&record.params, record.score);
            if record.score.is_none() {
                continue;
            }
            match record.rebuild(self.graph) {
                Ok(Some(tree)) => {
                    best.offer(record, &tree);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(trial = record.trial, error:% = err; "Cannot restore cached trial");
                }
            }
        }
        if !history.is_empty() {
            info!(
                fingerprint:% = fingerprint,
                trials = history.len(),
                best = best.bound.get();
                "Resuming search"
            );
        }

        let cache = self
            .options
            .cache
            .as_ref()
            .map(TrialCache::open)
            .transpose()?;
        let next_trial = history
            .iter()
            .map(|record| record.trial + 1)
            .max()
            .unwrap_or_default();
        let resumed = history.len();
        state.history = history;
        let cancel = self.cancel.clone().unwrap_or_default();
        Ok(Shared {
            fingerprint,
            cache,
            budget: Budget::new(Some(self.options.termination), Some(cancel.clone())),
            cancel,
            best,
            failures: Mutex::new(BTreeMap::new()),
            next_trial: AtomicUsize::new(next_trial),
            completed: AtomicUsize::new(0),
            resumed,
        })
    }

    fn finish(&self, shared: Shared) -> Result<SearchResult> {
        let Shared {
            best,
            failures,
            completed,
            resumed,
            ..
        } = shared;
        let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        let failed = failures.values().sum::<usize>();
        let trials = completed.into_inner();

        match best.into_inner() {
            Some((best, tree)) => {
                info!(
                    trials,
                    failed,
                    method:% = best.params.method,
                    score = best.score.unwrap_or(f64::INFINITY);
                    "Search finished"
                );
                Ok(SearchResult {
                    tree,
                    best,
                    trials,
                    failures: failed,
                    resumed,
                })
            }
            None => match failures.into_iter().max_by_key(|&(kind, count)| (count, kind)) {
                Some((dominant, _)) => Err(Error::AllTrialsFailed {
                    failures: failed,
                    dominant,
                }),
                None => Err(Error::invalid_path("no trial was run")),
            },
        }
    }

    /// One worker of the search loop.
    fn worker(&self, worker: usize, shared: &Shared) {
        let mut machine = TrialMachine::new(worker);
        while shared.budget.try_step() {
            machine.enter(TrialState::Proposing);
            let params = {
                let mut guard = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
                let state = &mut *guard;
                state.oracle.suggest(&state.history)
            };
            let Some(params) = params else {
                debug!(worker; "Oracle has nothing left to propose");
                machine.enter(TrialState::Done);
                return;
            };
            let trial = shared.next_trial.fetch_add(1, Ordering::Relaxed);

            machine.enter(TrialState::Building);
            let record = match self.build(&params, shared) {
                Ok(mut tree) => {
                    machine.enter(TrialState::Scoring);
                    match self.score(&mut tree) {
                        Ok(score) => {
                            let record = TrialRecord::success(
                                shared.fingerprint,
                                trial,
                                params.clone(),
                                score,
                                &tree,
                            );
                            if shared.best.offer(&record, &tree) {
                                info!(
                                    trial,
                                    method:% = params.method,
                                    score,
                                    flops = tree.total_flops(),
                                    peak = tree.peak_size();
                                    "New best trial"
                                );
                            }
                            record
                        }
                        Err(err) => self.failed(shared, trial, &params, &err),
                    }
                }
                Err(err) => self.failed(shared, trial, &params, &err),
            };

            if let Some(cache) = &shared.cache {
                if let Err(err) = cache.append(&record) {
                    warn!(trial, error:% = err; "Cannot append trial to cache");
                }
            }
            {
                let mut guard = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
                guard.oracle.report(&record.params, record.score);
                guard.history.push(record);
            }
            shared.completed.fetch_add(1, Ordering::Relaxed);
            if machine.state() != TrialState::Idle {
                machine.enter(TrialState::Idle);
            }
        }
        machine.enter(TrialState::Done);
    }

    fn failed(
        &self,
        shared: &Shared,
        trial: usize,
        params: &ParameterSet,
        err: &Error,
    ) -> TrialRecord {
        warn!(trial, method:% = params.method, error:% = err; "Trial failed");
        *shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(err.kind())
            .or_default() += 1;
        TrialRecord::failure(shared.fingerprint, trial, params.clone(), err.kind())
    }

    /// The budget of a single exact search: whatever is left of the run's time. An
    /// iteration budget counts trials, so it does not limit a single search.
    fn trial_termination(&self, shared: &Shared) -> Option<TerminationCondition> {
        match self.options.termination {
            TerminationCondition::Time { max_time } => Some(TerminationCondition::Time {
                max_time: max_time.saturating_sub(shared.budget.elapsed()),
            }),
            TerminationCondition::Iterations { .. } => None,
        }
    }

    /// Builds the tree of one trial.
    fn build(&self, params: &ParameterSet, shared: &Shared) -> Result<ContractionTree> {
        let objective = self.options.objective;
        let termination = self.trial_termination(shared);
        let greedy = GreedyOptions {
            costmod: params.float("costmod", 1.0),
            temperature: params.float("temperature", 0.0),
            seed: params.int("seed", 0).unsigned_abs(),
            ..Default::default()
        };
        match params.method {
            Method::Greedy => search(Greedy::new(self.graph, greedy)),
            Method::Optimal => search(
                Optimal::new(
                    self.graph,
                    OptimalOptions {
                        objective,
                        termination,
                        ..Default::default()
                    },
                )
                .with_cancel(Arc::clone(&shared.cancel)),
            ),
            Method::BranchBound => search(
                BranchBound::new(
                    self.graph,
                    BranchBoundOptions {
                        objective,
                        nbranch: u32::try_from(params.int("nbranch", 0))
                            .ok()
                            .filter(|&nbranch| nbranch > 0),
                        cutoff_flops_factor: params.float("cutoff_flops_factor", 20.0),
                        termination,
                    },
                )
                .with_cancel(Arc::clone(&shared.cancel)),
            ),
            Method::PartitionGreedy => search(PartitionGreedy::new(
                self.graph,
                self.partitioner.as_ref(),
                PartitionGreedyOptions {
                    cutoff: usize::try_from(params.int("cutoff", 10)).unwrap_or(10),
                    imbalance: params.float("imbalance", 0.2),
                    greedy,
                },
            )),
            Method::Elimination => search(Elimination::new(self.graph, self.decomposer.as_ref())),
        }
    }

    /// Slices the tree if configured and returns its `log2` score.
    fn score(&self, tree: &mut ContractionTree) -> Result<f64> {
        if let Some(slicing) = &self.options.slicing {
            slice_tree(tree, slicing)?;
        }
        Ok(log2_cost(tree.score(self.options.objective)))
    }
}

/// Runs a path finder and moves its tree out.
fn search<F: FindPath>(mut finder: F) -> Result<ContractionTree> {
    finder.find_path()?;
    finder.take_best_tree()
}
