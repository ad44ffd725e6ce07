use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::contractionpath::SimplePath;
use crate::error::{Error, Result};

pub mod branchbound;
pub mod elimination;
pub mod greedy;
pub mod hyperoptimization;
pub mod optimal;
pub mod partitioned;

/// Common interface of all path finders.
pub trait FindPath {
    /// Runs the search. Calling it again restarts the search.
    fn find_path(&mut self) -> Result<()>;

    /// The best tree found by the last call to [`FindPath::find_path`].
    fn best_tree(&self) -> Option<&ContractionTree>;

    /// Moves the best tree out of the path finder.
    fn take_best_tree(&mut self) -> Result<ContractionTree>;

    /// The best path in SSA format, empty if nothing was searched yet.
    fn get_best_path(&self) -> SimplePath {
        self.best_tree()
            .map(ContractionTree::ssa_path)
            .unwrap_or_default()
    }

    /// The best path in replace-left format.
    fn get_best_replace_path(&self) -> SimplePath {
        self.best_tree()
            .map(ContractionTree::replace_path)
            .unwrap_or_default()
    }

    fn get_best_flops(&self) -> f64 {
        self.best_tree()
            .map_or(f64::INFINITY, ContractionTree::total_flops)
    }

    fn get_best_size(&self) -> f64 {
        self.best_tree()
            .map_or(f64::INFINITY, ContractionTree::max_size)
    }
}

/// Error for taking a tree from a path finder that has none.
pub(crate) fn not_searched() -> Error {
    Error::invalid_path("no path has been found yet, call `find_path` first")
}

/// When a search should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCondition {
    /// Stop after a number of steps (trials, subsets or search nodes).
    Iterations { n_iter: usize },
    /// Stop after a wall-clock duration.
    Time { max_time: Duration },
}

/// Tracks the consumption of a [`TerminationCondition`] together with an optional
/// cancellation flag. Searchers call [`Budget::tick`] at every step boundary.
#[derive(Debug)]
pub struct Budget {
    condition: Option<TerminationCondition>,
    cancel: Option<Arc<AtomicBool>>,
    start: Instant,
    steps: AtomicUsize,
}

impl Budget {
    pub fn new(condition: Option<TerminationCondition>, cancel: Option<Arc<AtomicBool>>) -> Self {
        Self {
            condition,
            cancel,
            start: Instant::now(),
            steps: AtomicUsize::new(0),
        }
    }

    /// A budget that never runs out.
    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Counts one step. Returns `false` once the budget is exhausted.
    pub fn tick(&self) -> bool {
        self.steps.fetch_add(1, Ordering::Relaxed);
        !self.is_exhausted()
    }

    /// Reserves one step before doing it. Returns `false`, without counting the
    /// step, if the budget is already used up. Concurrent callers never reserve
    /// more than `n_iter` steps in total.
    pub fn try_step(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.condition {
            Some(TerminationCondition::Iterations { n_iter }) => self
                .steps
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |steps| {
                    (steps < n_iter).then_some(steps + 1)
                })
                .is_ok(),
            Some(TerminationCondition::Time { max_time }) if self.start.elapsed() >= max_time => {
                false
            }
            _ => {
                self.steps.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }

    /// Whether the budget is used up or the search was cancelled.
    pub fn is_exhausted(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.condition {
            Some(TerminationCondition::Iterations { n_iter }) => {
                self.steps.load(Ordering::Relaxed) >= n_iter
            }
            Some(TerminationCondition::Time { max_time }) => self.start.elapsed() >= max_time,
            None => false,
        }
    }

    /// Steps counted so far.
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}
