//! Slicing of contraction trees to fit a memory target.
//!
//! Slicing an index fixes it to each of its values in turn and sums the partial
//! results. Every tensor loses the index, which lowers the peak memory, while the
//! whole contraction is repeated once per value of the index.

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::contractionpath::contraction_tree::ContractionTree;
use crate::error::{Error, Result};
use crate::hypergraph::EdgeIndex;

/// Options of [`slice_tree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceOptions {
    /// Maximal peak memory in elements, per slice.
    pub target_size: f64,
    /// Maximal ratio of the sliced total flops to the total flops before slicing.
    /// Candidates exceeding it are not considered.
    pub max_overhead: Option<f64>,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            target_size: 2f64.powi(27),
            max_overhead: None,
        }
    }
}

/// A single applied slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceStep {
    pub index: EdgeIndex,
    pub size: u64,
    pub peak_before: f64,
    pub peak_after: f64,
    pub flops_before: f64,
    pub flops_after: f64,
}

/// The outcome of [`slice_tree`], listing the memory and flops trade-off of every
/// step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceReport {
    pub steps: Vec<SliceStep>,
}

impl SliceReport {
    /// The indices sliced by this run, in order.
    pub fn sliced(&self) -> Vec<EdgeIndex> {
        self.steps.iter().map(|step| step.index).collect()
    }

    /// Factor by which the total flops grew, 1 if nothing was sliced.
    pub fn overhead(&self) -> f64 {
        match (self.steps.first(), self.steps.last()) {
            (Some(first), Some(last)) if first.flops_before > 0.0 => {
                last.flops_after / first.flops_before
            }
            _ => 1.0,
        }
    }
}

/// Indices that could still be sliced: summed over, not yet sliced and of size
/// larger than one.
fn candidates(tree: &ContractionTree) -> Vec<EdgeIndex> {
    let problem = tree.problem();
    problem
        .indices()
        .into_iter()
        .filter(|&ix| {
            !problem.is_output(ix) && problem.size(ix) > 1 && !tree.sliced_indices().contains(&ix)
        })
        .sorted()
        .collect()
}

/// Slices indices of `tree` until its peak memory is at most
/// [`SliceOptions::target_size`].
///
/// Each step picks the index with the largest peak reduction per repeat, i.e.
/// `(peak before - peak after) / size(index)`, ties going to the lower index.
/// Indices that do not reduce the peak are never sliced, so every step strictly
/// lowers the peak while the total flops do not decrease.
///
/// Fails with [`Error::MemoryTargetUnreachable`] if no index is left to slice
/// before the target is met. The slices applied so far remain on the tree.
///
/// # Examples
/// ```
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use tnc_paths::contractionpath::contraction_tree::ContractionTree;
/// # use tnc_paths::contractionpath::slicing::{slice_tree, SliceOptions};
/// # use tnc_paths::path;
/// # use rustc_hash::FxHashMap;
/// let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
/// let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
/// let mut tree = ContractionTree::from_path(&graph, &path![(0, 1), (2, 3)]).unwrap();
/// let options = SliceOptions { target_size: 16.0, max_overhead: None };
/// let report = slice_tree(&mut tree, &options).unwrap();
/// assert!(tree.peak_size() <= 16.0);
/// assert_eq!(report.sliced(), tree.sliced_indices());
/// ```
pub fn slice_tree(tree: &mut ContractionTree, options: &SliceOptions) -> Result<SliceReport> {
    let initial_flops = tree.total_flops();
    let mut report = SliceReport::default();

    while tree.peak_size() > options.target_size {
        let peak_before = tree.peak_size();
        let flops_before = tree.total_flops();

        let mut best: Option<(f64, EdgeIndex, ContractionTree)> = None;
        for ix in candidates(tree) {
            let mut sliced = tree.clone();
            sliced.slice_index(ix)?;
            let reduction = peak_before - sliced.peak_size();
            if reduction <= 0.0 {
                continue;
            }
            if let Some(max_overhead) = options.max_overhead {
                if sliced.total_flops() > max_overhead * initial_flops {
                    continue;
                }
            }
            let ratio = reduction / tree.problem().size(ix) as f64;
            if best.as_ref().map_or(true, |(score, _, _)| ratio > *score) {
                best = Some((ratio, ix, sliced));
            }
        }

        let Some((_, index, sliced)) = best else {
            return Err(Error::MemoryTargetUnreachable {
                target: options.target_size,
                best_peak: peak_before,
                sliced: tree.sliced_indices().to_vec(),
            });
        };
        *tree = sliced;

        let step = SliceStep {
            index,
            size: tree.problem().size(index),
            peak_before,
            peak_after: tree.peak_size(),
            flops_before,
            flops_after: tree.total_flops(),
        };
        debug!(
            index = step.index,
            size = step.size,
            peak = step.peak_after,
            flops = step.flops_after;
            "Sliced index"
        );
        report.steps.push(step);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::error::ErrorKind;
    use crate::hypergraph::HyperGraph;
    use crate::path;

    fn chain_tree() -> ContractionTree {
        let sizes = FxHashMap::from_iter([('i', 2), ('j', 3), ('k', 4), ('l', 2)]);
        let graph = HyperGraph::from_equation("ij,jk,kl->il", &sizes).unwrap();
        ContractionTree::from_path(&graph, &path![(0, 1), (2, 3)]).unwrap()
    }

    #[test]
    fn test_slice_until_target() {
        let mut tree = chain_tree();
        // leaves 6 + 12 + 8, then ij,jk -> ik of size 8
        assert_approx_eq!(f64, tree.peak_size(), 34.0);
        let report = slice_tree(
            &mut tree,
            &SliceOptions {
                target_size: 20.0,
                max_overhead: None,
            },
        )
        .unwrap();
        assert!(tree.peak_size() <= 20.0);
        assert!(!report.steps.is_empty());
        for step in &report.steps {
            assert!(step.peak_after < step.peak_before);
            assert!(step.flops_after >= step.flops_before);
        }
        assert_eq!(report.sliced(), tree.sliced_indices());
        assert!(report.overhead() >= 1.0);
    }

    #[test]
    fn test_target_already_met() {
        let mut tree = chain_tree();
        let report = slice_tree(
            &mut tree,
            &SliceOptions {
                target_size: 100.0,
                max_overhead: None,
            },
        )
        .unwrap();
        assert!(report.steps.is_empty());
        assert_approx_eq!(f64, report.overhead(), 1.0);
        assert_approx_eq!(f64, tree.multiplicity(), 1.0);
    }

    #[test]
    fn test_unreachable_target() {
        let mut tree = chain_tree();
        let err = slice_tree(
            &mut tree,
            &SliceOptions {
                target_size: 1.0,
                max_overhead: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryTargetUnreachable);
        let Error::MemoryTargetUnreachable {
            best_peak, sliced, ..
        } = err
        else {
            unreachable!()
        };
        // only j and k are summed over
        assert_eq!(sliced.len(), 2);
        assert_approx_eq!(f64, best_peak, tree.peak_size());
    }

    #[test]
    fn test_overhead_cap() {
        let mut tree = chain_tree();
        let err = slice_tree(
            &mut tree,
            &SliceOptions {
                target_size: 10.0,
                max_overhead: Some(1.0),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryTargetUnreachable);
        // slicing k is free, slicing j as well would repeat work
        assert_eq!(tree.sliced_indices(), &[2]);
        assert_approx_eq!(f64, tree.total_flops(), 40.0);
    }
}
