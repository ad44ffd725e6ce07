//! Cost model of pairwise contractions.
//!
//! Costs are plain `f64` values in the linear domain. Index sizes are multiplied as
//! floats, so huge contractions saturate towards infinity instead of wrapping, and
//! every product below 2^53 is exact.

use serde::{Deserialize, Serialize};

use crate::hypergraph::{EdgeIndex, Problem};

/// Default weight of the write cost in [`Objective::Combo`] and [`Objective::Limit`].
pub const DEFAULT_COMBO_FACTOR: f64 = 64.0;

/// Cost of a single pairwise contraction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContractionCost {
    /// Number of scalar operations: the product over the union of both operands' indices.
    pub flops: f64,
    /// Number of elements of the result.
    pub memory: f64,
    /// Number of elements written, equal to `memory`.
    pub write: f64,
}

/// The quantity a path finder minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Objective {
    /// Total number of operations.
    Flops,
    /// Size of the largest intermediate tensor.
    Size,
    /// Sum of the sizes of all intermediate tensors.
    Write,
    /// `flops + factor * write`.
    Combo { factor: f64 },
    /// Sum over all contractions of `max(flops, factor * write)`.
    Limit { factor: f64 },
    /// Peak memory of the live tensor set along the execution order. Exact searchers
    /// treat this like [`Objective::Size`].
    PeakMemory,
}

impl Default for Objective {
    fn default() -> Self {
        Self::Flops
    }
}

impl Objective {
    /// Cost contributed by one contraction with the given flops and result size.
    #[inline]
    pub fn step_cost(&self, flops: f64, size: f64) -> f64 {
        match *self {
            Self::Flops => flops,
            Self::Size | Self::PeakMemory | Self::Write => size,
            Self::Combo { factor } => flops + factor * size,
            Self::Limit { factor } => flops.max(factor * size),
        }
    }

    /// Whether costs of separate contractions are combined by `max` instead of `+`.
    #[inline]
    pub fn is_maximum(&self) -> bool {
        matches!(self, Self::Size | Self::PeakMemory)
    }

    /// Combines two accumulated costs.
    #[inline]
    pub fn combine(&self, a: f64, b: f64) -> f64 {
        if self.is_maximum() {
            a.max(b)
        } else {
            a + b
        }
    }

    /// Short name used in logs and cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flops => "flops",
            Self::Size => "size",
            Self::Write => "write",
            Self::Combo { .. } => "combo",
            Self::Limit { .. } => "limit",
            Self::PeakMemory => "peak-memory",
        }
    }

    /// A stable textual key of the objective, including its parameters.
    pub fn key(&self) -> String {
        match self {
            Self::Combo { factor } | Self::Limit { factor } => format!("{}-{factor}", self.name()),
            _ => self.name().to_string(),
        }
    }
}

/// Number of elements of a tensor with `legs`, treating `sliced` indices as size 1.
#[inline]
pub fn sliced_legs_size(problem: &Problem, legs: &[EdgeIndex], sliced: &[EdgeIndex]) -> f64 {
    legs.iter()
        .filter(|ix| !sliced.contains(ix))
        .map(|&ix| problem.size(ix) as f64)
        .product()
}

/// Returns the flops of contracting tensors with sorted legs `a` and `b`, that is the
/// product of the sizes of their union.
///
/// # Examples
/// ```
/// # use tnc_paths::contractionpath::contraction_cost::contract_cost_legs;
/// # use tnc_paths::hypergraph::HyperGraph;
/// # use rustc_hash::FxHashMap;
/// let graph = HyperGraph::build(
///     vec![vec![0, 1, 2], vec![2, 3, 4]],
///     vec![0, 1, 3, 4],
///     FxHashMap::from_iter([(0, 5), (1, 7), (2, 9), (3, 11), (4, 13)]),
/// ).unwrap();
/// let flops = contract_cost_legs(graph.problem(), &[0, 1, 2], &[2, 3, 4], &[]);
/// assert_eq!(flops, 45045.0);
/// ```
pub fn contract_cost_legs(
    problem: &Problem,
    a: &[EdgeIndex],
    b: &[EdgeIndex],
    sliced: &[EdgeIndex],
) -> f64 {
    let mut flops = 1.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let ix = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) if x == y => {
                i += 1;
                j += 1;
                x
            }
            (Some(&x), Some(&y)) if x < y => {
                i += 1;
                x
            }
            (Some(&x), None) => {
                i += 1;
                x
            }
            (_, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        if !sliced.contains(&ix) {
            flops *= problem.size(ix) as f64;
        }
    }
    flops
}

/// `log2` of a cost, with `log2(0) = 0` for empty trees.
#[inline]
pub fn log2_cost(cost: f64) -> f64 {
    if cost > 0.0 {
        cost.log2()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use float_cmp::assert_approx_eq;
    use rustc_hash::FxHashMap;

    use crate::hypergraph::HyperGraph;

    #[test]
    fn test_contract_cost_legs_sliced() {
        let graph = HyperGraph::build(
            vec![vec![0, 1], vec![1, 2]],
            vec![0, 2],
            FxHashMap::from_iter([(0, 2), (1, 3), (2, 4)]),
        )
        .unwrap();
        let problem = graph.problem();
        assert_approx_eq!(f64, contract_cost_legs(problem, &[0, 1], &[1, 2], &[]), 24.0);
        assert_approx_eq!(f64, contract_cost_legs(problem, &[0, 1], &[1, 2], &[1]), 8.0);
        assert_approx_eq!(f64, sliced_legs_size(problem, &[0, 2], &[2]), 2.0);
    }

    #[test]
    fn test_step_cost() {
        assert_approx_eq!(f64, Objective::Flops.step_cost(100.0, 10.0), 100.0);
        assert_approx_eq!(f64, Objective::Size.step_cost(100.0, 10.0), 10.0);
        assert_approx_eq!(
            f64,
            Objective::Combo { factor: 64.0 }.step_cost(100.0, 10.0),
            740.0
        );
        assert_approx_eq!(
            f64,
            Objective::Limit { factor: 64.0 }.step_cost(1000.0, 10.0),
            1000.0
        );
        assert_approx_eq!(f64, Objective::Size.combine(3.0, 7.0), 7.0);
        assert_approx_eq!(f64, Objective::Write.combine(3.0, 7.0), 10.0);
    }

    #[test]
    fn test_objective_serde() {
        let json = serde_json::to_string(&Objective::Combo { factor: 8.0 }).unwrap();
        assert_eq!(json, r#"{"combo":{"factor":8.0}}"#);
        let parsed: Objective = serde_json::from_str(r#""peak-memory""#).unwrap();
        assert_eq!(parsed, Objective::PeakMemory);
        assert_eq!(Objective::Limit { factor: 2.0 }.key(), "limit-2");
    }

    #[test]
    fn test_log2_cost() {
        assert_approx_eq!(f64, log2_cost(1024.0), 10.0);
        assert_approx_eq!(f64, log2_cost(0.0), 0.0);
    }
}
